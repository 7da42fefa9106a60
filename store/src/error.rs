use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
