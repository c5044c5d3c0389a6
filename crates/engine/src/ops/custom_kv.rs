use std::collections::{BTreeMap, BTreeSet};

use refbatch_core::{UpdateError, UpdateResult};

use crate::context::ChangeContext;
use crate::op::BatchUpdateOp;

/// Sets and deletes custom keyed values
#[derive(Debug, Clone, Default)]
pub struct SetCustomKeyedValuesOp {
    set: BTreeMap<String, String>,
    delete: BTreeSet<String>,
    updated: BTreeMap<String, String>,
}

fn check_key(key: &str) -> UpdateResult<()> {
    if key.trim().is_empty() {
        return Err(UpdateError::bad_request("custom keyed value key must not be empty"));
    }
    if key.contains('=') {
        return Err(UpdateError::bad_request(format!(
            "custom keyed value key '{}' must not contain '='",
            key
        )));
    }
    Ok(())
}

impl SetCustomKeyedValuesOp {
    /// Empty op; add entries with the builder methods
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.delete.remove(&key);
        self.set.insert(key, value.into());
        self
    }

    /// Delete `key`
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.set.remove(&key);
        self.delete.insert(key);
        self
    }

    /// Custom keyed values of the change afterwards
    pub fn updated(&self) -> &BTreeMap<String, String> {
        &self.updated
    }
}

impl BatchUpdateOp for SetCustomKeyedValuesOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        for key in self.set.keys().chain(self.delete.iter()) {
            check_key(key)?;
        }
        let current = ctx.view()?.custom_keyed_values;
        let to_set: Vec<(&String, &String)> = self
            .set
            .iter()
            .filter(|(k, v)| current.get(*k) != Some(*v))
            .collect();
        let to_delete: Vec<&String> = self
            .delete
            .iter()
            .filter(|k| current.contains_key(*k))
            .collect();

        let mut updated = current;
        for key in &to_delete {
            updated.remove(*key);
        }
        for (key, value) in &to_set {
            updated.insert((*key).clone(), (*value).clone());
        }
        self.updated = updated;

        if to_set.is_empty() && to_delete.is_empty() {
            return Ok(false);
        }
        let update = ctx.update();
        for (key, value) in to_set {
            update.set_custom_keyed_value(key.clone(), value.clone());
        }
        for key in to_delete {
            update.delete_custom_keyed_value(key.clone());
        }
        Ok(true)
    }
}
