use crate::error::StoreError;
use crate::types::{BlobInfo, Digest, ManifestInfo};
use sha2::{Digest as Sha2Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

const BLOBS_DIR: &str = "blobs";
const MANIFESTS_DIR: &str = "manifests";

/// Content-addressed blob and manifest storage: `<root>/blobs/<algorithm>/<hash>` plus a
/// JSON sidecar for media type. A deliberately small subset of a registry mirror: no tags, no
/// indexes, no garbage collection, no remote service. Those concerns belong to a registry
/// pusher, which this crate does not implement.
pub struct FileSystemStore {
    root: PathBuf,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Sidecar {
    media_type: String,
    size: i64,
}

impl FileSystemStore {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(BLOBS_DIR)).await?;
        fs::create_dir_all(root.join(MANIFESTS_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(BLOBS_DIR).join(&digest.algorithm).join(&digest.hash)
    }

    fn blob_meta_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join(BLOBS_DIR)
            .join(&digest.algorithm)
            .join(format!("{}.meta", digest.hash))
    }

    fn manifest_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(MANIFESTS_DIR).join(&digest.algorithm).join(&digest.hash)
    }

    fn manifest_meta_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join(MANIFESTS_DIR)
            .join(&digest.algorithm)
            .join(format!("{}.meta", digest.hash))
    }

    pub async fn put_blob(
        &self,
        media_type: &str,
        data: &[u8],
    ) -> Result<(Digest, i64), StoreError> {
        let digest = sha256_digest(data);

        let path = self.blob_path(&digest);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;

        let sidecar = Sidecar {
            media_type: media_type.to_string(),
            size: data.len() as i64,
        };
        fs::write(self.blob_meta_path(&digest), serde_json::to_vec(&sidecar)?).await?;

        Ok((digest, data.len() as i64))
    }

    pub async fn get_blob(&self, digest: &Digest) -> Result<Vec<u8>, StoreError> {
        let path = self.blob_path(digest);
        if !path.exists() {
            return Err(StoreError::BlobNotFound(digest.to_string()));
        }
        Ok(fs::read(&path).await?)
    }

    pub async fn stat_blob(&self, digest: &Digest) -> Result<Option<BlobInfo>, StoreError> {
        let path = self.blob_path(digest);
        if !path.exists() {
            return Ok(None);
        }
        let sidecar = self.read_sidecar(&self.blob_meta_path(digest), &path).await?;
        Ok(Some(BlobInfo {
            digest: digest.clone(),
            size: sidecar.size,
            media_type: sidecar.media_type,
        }))
    }

    pub async fn put_manifest(
        &self,
        content: &[u8],
        media_type: &str,
    ) -> Result<(Digest, i64), StoreError> {
        let digest = sha256_digest(content);

        let path = self.manifest_path(&digest);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content).await?;

        let sidecar = Sidecar {
            media_type: media_type.to_string(),
            size: content.len() as i64,
        };
        fs::write(self.manifest_meta_path(&digest), serde_json::to_vec(&sidecar)?).await?;

        Ok((digest, content.len() as i64))
    }

    pub async fn get_manifest(&self, digest: &Digest) -> Result<(Vec<u8>, ManifestInfo), StoreError> {
        let path = self.manifest_path(digest);
        if !path.exists() {
            return Err(StoreError::ManifestNotFound(digest.to_string()));
        }
        let content = fs::read(&path).await?;
        let sidecar = self.read_sidecar(&self.manifest_meta_path(digest), &path).await?;
        let info = ManifestInfo {
            digest: digest.clone(),
            size: sidecar.size,
            media_type: sidecar.media_type,
        };
        Ok((content, info))
    }

    async fn read_sidecar(&self, meta_path: &Path, content_path: &Path) -> Result<Sidecar, StoreError> {
        if meta_path.exists() {
            let bytes = fs::read(meta_path).await?;
            Ok(serde_json::from_slice(&bytes)?)
        } else {
            let size = fs::metadata(content_path).await?.len() as i64;
            Ok(Sidecar {
                media_type: "application/octet-stream".to_string(),
                size,
            })
        }
    }
}

fn sha256_digest(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Digest {
        algorithm: "sha256".to_string(),
        hash: hex::encode(hasher.finalize()),
    }
}
