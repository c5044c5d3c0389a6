//! Content-addressed object store
//!
//! Objects are immutable. Their id is the SHA-256 of their MessagePack
//! encoding, so writing the same object twice yields the same id and stores
//! it once. Objects written by an attempt that later lost a ref race stay
//! behind as unreferenced garbage; they are never observable through a ref.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use refbatch_core::{AccountId, ObjectId, Timestamp, UpdateError, UpdateResult, OBJECT_ID_LEN};

/// A commit: one entry in a ref's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Previous commit on the same ref, `None` for the root
    pub parent: Option<ObjectId>,
    /// Account the commit is attributed to
    pub author: AccountId,
    /// Commit time
    pub timestamp: Timestamp,
    /// Human readable summary
    pub message: String,
    /// Opaque payload interpreted by the ref's owner
    pub body: Vec<u8>,
}

/// Anything stored in the object store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Object {
    /// Raw bytes
    Blob(Vec<u8>),
    /// History entry
    Commit(Commit),
}

impl Object {
    /// Encode with MessagePack
    pub fn encode(&self) -> UpdateResult<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| UpdateError::Serialization(e.to_string()))
    }

    /// Content id of this object
    pub fn id(&self) -> UpdateResult<ObjectId> {
        Ok(hash_bytes(&self.encode()?))
    }
}

fn hash_bytes(bytes: &[u8]) -> ObjectId {
    let digest = Sha256::digest(bytes);
    let mut id = [0u8; OBJECT_ID_LEN];
    id.copy_from_slice(&digest);
    ObjectId::from_bytes(id)
}

/// In-memory object store
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: DashMap<ObjectId, Arc<Object>>,
}

impl ObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object and return its id
    pub fn insert(&self, object: Object) -> UpdateResult<ObjectId> {
        let id = object.id()?;
        self.objects.entry(id).or_insert_with(|| Arc::new(object));
        Ok(id)
    }

    /// Store a blob
    pub fn insert_blob(&self, bytes: impl Into<Vec<u8>>) -> UpdateResult<ObjectId> {
        self.insert(Object::Blob(bytes.into()))
    }

    /// Store a commit
    pub fn insert_commit(&self, commit: Commit) -> UpdateResult<ObjectId> {
        self.insert(Object::Commit(commit))
    }

    /// Look up an object
    pub fn get(&self, id: &ObjectId) -> Option<Arc<Object>> {
        self.objects.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether the object exists
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Read an object that must be a commit
    pub fn read_commit(&self, id: &ObjectId) -> UpdateResult<Commit> {
        match self.get(id).as_deref() {
            Some(Object::Commit(commit)) => Ok(commit.clone()),
            Some(Object::Blob(_)) => Err(UpdateError::corruption(format!(
                "object {} is a blob, expected a commit",
                id.short()
            ))),
            None => Err(UpdateError::corruption(format!("missing object {}", id.short()))),
        }
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
