use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("invalid image input: {0}")]
    Invalid(String),

    #[error("unrecognized base image format at {0}")]
    UnknownImageType(String),

    #[error("archive is malformed: {0}")]
    ArchiveFormat(String),

    #[error("store error: {0}")]
    Store(#[from] ssnap_store::StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
