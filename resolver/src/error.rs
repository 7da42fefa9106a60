use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("failed to run builder {builder}: {source}")]
    Spawn {
        builder: String,
        #[source]
        source: std::io::Error,
    },

    #[error("builder {builder} exited with {status}: {stderr}")]
    ResolveFailed {
        builder: String,
        status: String,
        stderr: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
