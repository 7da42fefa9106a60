pub use ssnap_metadata::{Kind, Record as Info};

/// Label marking a snapshot as a closure layer; its store paths are resolved and pinned at
/// Prepare time instead of contributing bind mounts.
pub const NIX_LAYER_LABEL: &str = "NIX_LAYER";

/// Prefix for labels naming a store path belonging to a snapshot's closure. The suffix is
/// opaque and only needs to be unique per snapshot.
pub const NIX_STORE_PATH_PREFIX: &str = "NIX_STORE_PATH.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub mount_type: String,
    pub source: String,
    pub target: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub size: i64,
    pub inodes: i64,
}
