use std::collections::BTreeSet;

use refbatch_core::{UpdateError, UpdateResult};

use super::change_message;
use crate::context::{ChangeContext, PostUpdateContext};
use crate::op::BatchUpdateOp;

/// Adds and removes hashtags
#[derive(Debug, Clone, Default)]
pub struct SetHashtagsOp {
    add: BTreeSet<String>,
    remove: BTreeSet<String>,
    added: BTreeSet<String>,
    removed: BTreeSet<String>,
    updated: BTreeSet<String>,
}

fn normalize(tag: &str) -> UpdateResult<String> {
    let tag = tag.trim().trim_start_matches('#').trim();
    if tag.is_empty() {
        return Err(UpdateError::bad_request("hashtag must not be empty"));
    }
    if tag.contains(',') || tag.chars().any(char::is_whitespace) {
        return Err(UpdateError::bad_request(format!(
            "hashtag '{}' must not contain commas or whitespace",
            tag
        )));
    }
    Ok(tag.to_lowercase())
}

impl SetHashtagsOp {
    /// Hashtags to add and to remove; a leading `#` is ignored
    pub fn new<A, R, S, T>(add: A, remove: R) -> Self
    where
        A: IntoIterator<Item = S>,
        R: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            add: add.into_iter().map(Into::into).collect(),
            remove: remove.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Hashtags that were actually added
    pub fn added(&self) -> &BTreeSet<String> {
        &self.added
    }

    /// Hashtags that were actually removed
    pub fn removed(&self) -> &BTreeSet<String> {
        &self.removed
    }

    /// Hashtags of the change afterwards
    pub fn updated_hashtags(&self) -> &BTreeSet<String> {
        &self.updated
    }
}

impl BatchUpdateOp for SetHashtagsOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        let add = self.add.iter().map(|t| normalize(t)).collect::<UpdateResult<BTreeSet<_>>>()?;
        let remove = self
            .remove
            .iter()
            .map(|t| normalize(t))
            .collect::<UpdateResult<BTreeSet<_>>>()?;

        let mut hashtags = ctx.view()?.hashtags;
        self.added = add.difference(&hashtags).cloned().collect();
        self.removed = remove
            .intersection(&hashtags)
            .filter(|t| !add.contains(*t))
            .cloned()
            .collect();
        for tag in &self.removed {
            hashtags.remove(tag);
        }
        hashtags.extend(self.added.iter().cloned());
        self.updated = hashtags;

        if self.added.is_empty() && self.removed.is_empty() {
            return Ok(false);
        }

        let mut text = Vec::new();
        if !self.added.is_empty() {
            text.push(format!("Hashtags added: {}", join(&self.added)));
        }
        if !self.removed.is_empty() {
            text.push(format!("Hashtags removed: {}", join(&self.removed)));
        }
        let message = change_message(ctx, text.join("\n"), Some("autogenerated:hashtags"), None);
        let update = ctx.update();
        update.add_hashtags(self.added.iter().cloned());
        update.remove_hashtags(self.removed.iter().cloned());
        update.add_message(message);
        Ok(true)
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> UpdateResult<()> {
        ctx.send_email(
            "hashtags",
            "Hashtags updated",
            format!("Hashtags: {}", join(&self.updated)),
        )
    }
}

fn join(tags: &BTreeSet<String>) -> String {
    tags.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
