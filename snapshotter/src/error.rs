use ssnap_metadata::MetadataError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotterError {
    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("snapshot already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid snapshot state: expected {expected}, got {actual}")]
    FailedPrecondition { expected: String, actual: String },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("failed to resolve store path: {0}")]
    ResolveFailed(#[from] ssnap_resolver::ResolverError),

    #[error("filesystem error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("overlay error: {0}")]
    Overlay(#[from] ssnap_mount::MountError),
}

impl From<MetadataError> for SnapshotterError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(key) => SnapshotterError::NotFound(key),
            MetadataError::AlreadyExists(key) => SnapshotterError::AlreadyExists(key),
            MetadataError::ParentNotFound(key) => {
                SnapshotterError::Invalid(format!("parent not found: {key}"))
            }
            MetadataError::ParentNotCommitted(key) => SnapshotterError::FailedPrecondition {
                expected: "committed".to_string(),
                actual: format!("parent {key} is not committed"),
            },
            MetadataError::InvalidState { expected, actual } => {
                SnapshotterError::FailedPrecondition { expected, actual }
            }
            other => SnapshotterError::Invalid(other.to_string()),
        }
    }
}
