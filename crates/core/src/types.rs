//! Identifier types for refbatch
//!
//! This module defines the foundational identifiers:
//! - ChangeId: Stable numeric id of a change (the versioned entity)
//! - PatchSetId: One revision of a change
//! - AccountId: Acting identity / participant
//! - ProjectName: Repository a change lives in
//! - MessageId: Unique id of a change message

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable numeric identifier of a change
///
/// Change ids are allocated by the caller and never reused. Every change owns
/// exactly one metadata ref derived from its id (see [`crate::RefName::change_meta`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId(u32);

impl ChangeId {
    /// Create a change id
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw numeric value
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Two-digit shard used in ref names (last two decimal digits, zero padded)
    pub fn shard(&self) -> String {
        format!("{:02}", self.0 % 100)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single revision (patch set) of a change
///
/// Patch set numbers start at 1 and increase monotonically per change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatchSetId {
    change: ChangeId,
    number: u32,
}

impl PatchSetId {
    /// Create a patch set id
    pub const fn new(change: ChangeId, number: u32) -> Self {
        Self { change, number }
    }

    /// The change this patch set belongs to
    pub const fn change(&self) -> ChangeId {
        self.change
    }

    /// Patch set number (1-based)
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Id of the following patch set
    pub const fn next(&self) -> Self {
        Self::new(self.change, self.number + 1)
    }
}

impl fmt::Display for PatchSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.change, self.number)
    }
}

/// Identifier of an account (acting user, owner, reviewer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(u32);

impl AccountId {
    /// Identity used for updates performed on behalf of the server itself
    pub const SERVER: AccountId = AccountId(0);

    /// Create an account id
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw numeric value
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Whether this is the server identity
    pub const fn is_server(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a project (one repository of refs and objects)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectName(String);

impl ProjectName {
    /// Create a project name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Unique identifier of a change message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Create a new random MessageId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a MessageId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
