//! Ref names and object ids
//!
//! A ref is a named pointer to an object in a content-addressed store. Change
//! state lives entirely on refs:
//!
//! ```text
//! refs/changes/<NN>/<id>/meta   metadata history of change <id>
//! refs/changes/<NN>/<id>/<ps>   commit of patch set <ps>
//! ```
//!
//! `<NN>` is the last two digits of the change id, zero padded.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{UpdateError, UpdateResult};
use crate::types::{ChangeId, PatchSetId};

/// Prefix shared by every change ref
pub const REFS_CHANGES: &str = "refs/changes/";

/// Prefix of branch refs
pub const REFS_HEADS: &str = "refs/heads/";

/// Suffix of the change metadata ref
pub const META_SUFFIX: &str = "meta";

/// Length of an object id in bytes (SHA-256)
pub const OBJECT_ID_LEN: usize = 32;

/// Content hash identifying an object
///
/// The all-zero id is reserved: as an expected value it means "ref must not
/// exist", as a new value it means "delete the ref".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// The reserved all-zero id
    pub const ZERO: ObjectId = ObjectId([0u8; OBJECT_ID_LEN]);

    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    /// Whether this is the reserved zero id
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Parse a 64-character lowercase or uppercase hex string
    pub fn from_hex(s: &str) -> UpdateResult<Self> {
        if s.len() != OBJECT_ID_LEN * 2 {
            return Err(UpdateError::bad_request(format!(
                "object id must be {} hex characters, got {}",
                OBJECT_ID_LEN * 2,
                s.len()
            )));
        }
        let mut bytes = [0u8; OBJECT_ID_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &s[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| {
                UpdateError::bad_request(format!("invalid hex in object id '{}'", s))
            })?;
        }
        Ok(Self(bytes))
    }

    /// Full lowercase hex representation
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Abbreviated id for log output
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short())
    }
}

/// Name of a ref
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RefName(String);

impl RefName {
    /// Parse and validate a ref name
    ///
    /// Ref names must start with `refs/`, must not end with `/`, and must not
    /// contain empty components, `..`, or whitespace.
    pub fn parse(name: impl Into<String>) -> UpdateResult<Self> {
        let name = name.into();
        let invalid = |reason: &str| {
            Err(UpdateError::bad_request(format!(
                "invalid ref name '{}': {}",
                name, reason
            )))
        };
        if !name.starts_with("refs/") {
            return invalid("must start with refs/");
        }
        if name.ends_with('/') {
            return invalid("must not end with /");
        }
        if name.contains("//") {
            return invalid("empty path component");
        }
        if name.contains("..") {
            return invalid("must not contain ..");
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return invalid("must not contain whitespace");
        }
        Ok(Self(name))
    }

    /// Metadata ref of a change
    pub fn change_meta(change: ChangeId) -> Self {
        Self(format!("{}{}", Self::change_prefix(change), META_SUFFIX))
    }

    /// Ref of a patch set's commit
    pub fn patch_set(ps: PatchSetId) -> Self {
        Self(format!("{}{}", Self::change_prefix(ps.change()), ps.number()))
    }

    /// Branch ref `refs/heads/<name>`
    pub fn branch(name: &str) -> UpdateResult<Self> {
        Self::parse(format!("{}{}", REFS_HEADS, name))
    }

    /// Prefix under which every ref of a change lives (ends with `/`)
    pub fn change_prefix(change: ChangeId) -> String {
        format!("{}{}/{}/", REFS_CHANGES, change.shard(), change)
    }

    /// Name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name starts with `prefix`
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Whether this is a branch under `refs/heads/`
    pub fn is_branch(&self) -> bool {
        self.0.starts_with(REFS_HEADS)
    }

    /// Change id if this is a change metadata ref
    pub fn parse_change_meta(&self) -> Option<ChangeId> {
        let rest = self.0.strip_prefix(REFS_CHANGES)?;
        let mut parts = rest.split('/');
        let shard = parts.next()?;
        let id: u32 = parts.next()?.parse().ok()?;
        let suffix = parts.next()?;
        if parts.next().is_some() || suffix != META_SUFFIX {
            return None;
        }
        let change = ChangeId::new(id);
        (change.shard() == shard).then_some(change)
    }

    /// Whether this is a change metadata ref
    pub fn is_change_meta(&self) -> bool {
        self.parse_change_meta().is_some()
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
