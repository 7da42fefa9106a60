use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const MEDIA_TYPE_OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";

/// Label on the generated closure layer's descriptor marking it as one the snapshotter must
/// resolve store paths for rather than unpack directly.
pub const NIX_LAYER_ANNOTATION: &str = "NIX_LAYER";

/// Prefix for per-store-path annotations on the closure layer descriptor, `NIX_STORE_PATH.<i>`.
pub const NIX_STORE_PATH_ANNOTATION_PREFIX: &str = "NIX_STORE_PATH.";

/// The input/output of the image generator: a base image plus the nix store paths that make up
/// the application layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Image {
    pub config: ImageConfig,
    #[serde(rename = "base-image", skip_serializing_if = "String::is_empty", default)]
    pub base_image: String,
    pub architecture: String,
    pub os: String,
    #[serde(rename = "nix-store-paths", skip_serializing_if = "Vec::is_empty", default)]
    pub nix_store_paths: Vec<String>,
    #[serde(rename = "copy-to-roots", skip_serializing_if = "Vec::is_empty", default)]
    pub copy_to_roots: Vec<String>,
}

/// The subset of the OCI image config's `config` object that nix2container cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub exposed_ports: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub volumes: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
}

/// An OCI image manifest, schema version 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: i32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
            config: Descriptor::default(),
            layers: Vec::new(),
            annotations: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

/// The OCI image config blob: platform plus the `config` object, referenced by the manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfigBlob {
    pub architecture: String,
    pub os: String,
    pub config: ImageConfig,
    pub rootfs: RootFs,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    pub diff_ids: Vec<String>,
}

/// A single entry in an OCI archive's top-level `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveManifestEntry {
    #[serde(rename = "Config")]
    pub config: String,
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Vec<String>,
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
}

/// The kind of input a `base_image` path may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Unknown,
    OciTarball,
    Nix,
}
