use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("snapshot already exists: {0}")]
    AlreadyExists(String),

    #[error("parent snapshot not found: {0}")]
    ParentNotFound(String),

    #[error("parent snapshot is not committed: {0}")]
    ParentNotCommitted(String),

    #[error("invalid snapshot state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
