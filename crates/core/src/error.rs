//! Error types for refbatch
//!
//! Errors are classified into four kinds so callers can map them to the right
//! reaction without inspecting messages:
//!
//! | Kind | Meaning | Caller reaction |
//! |------|---------|-----------------|
//! | `Business` | precondition failed, not found, bad request | fix the request |
//! | `Contention` | retry ceiling reached on concurrent ref updates | try again later |
//! | `Storage` | I/O, corruption, serialization | report, operator attention |
//! | `Internal` | unexpected invariant breach | report |
//!
//! Business errors are raised by operations and are never retried by the
//! coordinator. Only storage-level lock failures are retried, and exhausting
//! them surfaces as [`UpdateError::ContentionExhausted`].

use thiserror::Error;

use crate::refs::RefName;

/// Result type alias for refbatch operations
pub type UpdateResult<T> = std::result::Result<T, UpdateError>;

/// Classification of an [`UpdateError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Business-rule rejection raised by an operation
    Business,
    /// Retry ceiling reached because of concurrent ref updates
    Contention,
    /// Storage failure (I/O, corrupt history, encoding)
    Storage,
    /// Invariant breach inside refbatch
    Internal,
}

/// Error type for batch updates and everything beneath them
#[derive(Debug, Error)]
pub enum UpdateError {
    /// A precondition of the operation does not hold (e.g. change is closed)
    #[error("conflict: {0}")]
    ResourceConflict(String),

    /// A referenced change, patch set, ref or project does not exist
    #[error("not found: {0}")]
    ResourceNotFound(String),

    /// The request itself is malformed
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Every commit attempt lost a compare-and-swap race
    #[error("too much contention: gave up after {attempts} attempt(s) on {}", format_refs(.refs))]
    ContentionExhausted {
        /// Number of commit attempts made
        attempts: u32,
        /// Refs whose expected value did not match on the final attempt
        refs: Vec<RefName>,
    },

    /// Backing store failure
    #[error("storage error: {message}")]
    Storage {
        /// Description of the failure
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Change history could not be interpreted
    #[error("corrupt metadata: {0}")]
    Corruption(String),

    /// Encoding or decoding of a stored object failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal state
    #[error("internal error: {0}")]
    Internal(String),
}

fn format_refs(refs: &[RefName]) -> String {
    if refs.is_empty() {
        return "<unknown refs>".to_string();
    }
    refs.iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl UpdateError {
    /// Create a [`UpdateError::ResourceConflict`]
    pub fn conflict(message: impl Into<String>) -> Self {
        UpdateError::ResourceConflict(message.into())
    }

    /// Create a [`UpdateError::ResourceNotFound`]
    pub fn not_found(message: impl Into<String>) -> Self {
        UpdateError::ResourceNotFound(message.into())
    }

    /// Create a [`UpdateError::BadRequest`]
    pub fn bad_request(message: impl Into<String>) -> Self {
        UpdateError::BadRequest(message.into())
    }

    /// Create a [`UpdateError::Storage`] without a source
    pub fn storage(message: impl Into<String>) -> Self {
        UpdateError::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a [`UpdateError::Corruption`]
    pub fn corruption(message: impl Into<String>) -> Self {
        UpdateError::Corruption(message.into())
    }

    /// Create a [`UpdateError::Internal`]
    pub fn internal(message: impl Into<String>) -> Self {
        UpdateError::Internal(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateError::ResourceConflict(_)
            | UpdateError::ResourceNotFound(_)
            | UpdateError::BadRequest(_) => ErrorKind::Business,
            UpdateError::ContentionExhausted { .. } => ErrorKind::Contention,
            UpdateError::Storage { .. }
            | UpdateError::Corruption(_)
            | UpdateError::Serialization(_) => ErrorKind::Storage,
            UpdateError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this is a business-rule rejection
    pub fn is_business(&self) -> bool {
        self.kind() == ErrorKind::Business
    }

    /// Whether the retry ceiling was reached
    pub fn is_contention(&self) -> bool {
        self.kind() == ErrorKind::Contention
    }

    /// Whether the same request may succeed if the caller simply retries it
    pub fn is_retryable_by_caller(&self) -> bool {
        self.is_contention()
    }
}

impl From<std::io::Error> for UpdateError {
    fn from(e: std::io::Error) -> Self {
        UpdateError::Storage {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}
