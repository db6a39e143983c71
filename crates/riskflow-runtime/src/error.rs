//! Runtime error types

use riskflow_core::CoreError;
use thiserror::Error;

/// Persistent store error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A row with the same primary key already exists
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    /// A referenced row does not exist
    #[error("Referential integrity violation: {0}")]
    ForeignKey(String),

    /// Connection, query or decoding failure
    #[error("Database error: {0}")]
    Database(String),
}

/// Cache error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// The key holds a value of another kind (string vs list)
    #[error("Wrong value type for key: {0}")]
    WrongType(String),
}

/// Event channel error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Commit failed: {0}")]
    Commit(String),
}

/// Scoring model error. Never surfaced to callers; the scorer falls back.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("Scoring model timed out after {0} ms")]
    Timeout(u64),

    #[error("Scoring model call failed: {0}")]
    Request(String),

    #[error("Invalid scoring response: {0}")]
    InvalidResponse(String),
}

/// Error returned by the intake service
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Malformed request, rejected without side effects
    #[error("Validation error: {0}")]
    Validation(#[from] CoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The synchronous write path failed; the transaction is not processed
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// A client retry key refers to an already stored transaction whose
    /// cached response has expired
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// HTTP status equivalent, also reported per item in batch responses
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::Storage(_) | ServiceError::Internal(_) => 500,
        }
    }
}

/// Error raised while applying a decision event in the feedback processor
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Undecodable event: {0}")]
    Decode(String),

    #[error("Unencodable event: {0}")]
    Encode(String),

    #[error("Store step failed: {0}")]
    Store(#[from] StoreError),

    #[error("Cache step failed: {0}")]
    Cache(#[from] CacheError),

    #[error("Channel step failed: {0}")]
    Channel(#[from] ChannelError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type CacheResult<T> = std::result::Result<T, CacheError>;
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;
