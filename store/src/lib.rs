mod error;
mod storage;
mod types;

pub use error::StoreError;
pub use storage::FileSystemStore;
pub use types::{BlobInfo, Digest, ManifestInfo};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_then_get_blob_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path()).await.unwrap();

        let (digest, size) = store.put_blob("application/octet-stream", b"hello").await.unwrap();
        assert_eq!(size, 5);

        let data = store.get_blob(&digest).await.unwrap();
        assert_eq!(data, b"hello");

        let info = store.stat_blob(&digest).await.unwrap().unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.media_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn stat_blob_returns_none_when_missing() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path()).await.unwrap();
        let digest = Digest { algorithm: "sha256".to_string(), hash: "deadbeef".to_string() };
        assert!(store.stat_blob(&digest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_manifest_missing_errors() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path()).await.unwrap();
        let digest = Digest { algorithm: "sha256".to_string(), hash: "deadbeef".to_string() };
        assert!(matches!(store.get_manifest(&digest).await, Err(StoreError::ManifestNotFound(_))));
    }

    #[tokio::test]
    async fn identical_content_dedupes_to_same_digest() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path()).await.unwrap();

        let (d1, _) = store.put_blob("text/plain", b"same bytes").await.unwrap();
        let (d2, _) = store.put_blob("text/plain", b"same bytes").await.unwrap();
        assert_eq!(d1, d2);
    }

    #[tokio::test]
    async fn put_then_get_manifest_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path()).await.unwrap();

        let content = br#"{"schemaVersion":2}"#;
        let (digest, _) = store
            .put_manifest(content, "application/vnd.oci.image.manifest.v1+json")
            .await
            .unwrap();

        let (fetched, info) = store.get_manifest(&digest).await.unwrap();
        assert_eq!(fetched, content);
        assert_eq!(info.media_type, "application/vnd.oci.image.manifest.v1+json");
    }
}
