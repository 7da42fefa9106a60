mod engine;
mod error;
mod types;

pub use engine::Engine;
pub use error::SnapshotterError;
pub use types::{Info, Kind, Mount, Usage, NIX_LAYER_LABEL, NIX_STORE_PATH_PREFIX};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ssnap_resolver::{Resolver, ResolverError};
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default)]
    struct StubResolver {
        calls: Mutex<Vec<(std::path::PathBuf, String)>>,
    }

    #[async_trait]
    impl Resolver for StubResolver {
        async fn resolve(&self, out_link: &Path, store_path: &str) -> Result<(), ResolverError> {
            self.calls.lock().unwrap().push((out_link.to_path_buf(), store_path.to_string()));
            if let Some(parent) = out_link.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::symlink(store_path, out_link).await?;
            Ok(())
        }
    }

    async fn engine_with_stub(root: &Path) -> (Engine, Arc<StubResolver>) {
        let resolver = Arc::new(StubResolver::default());
        let engine = Engine::new(root, resolver.clone(), false, false).await.unwrap();
        (engine, resolver)
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    // S1
    #[tokio::test]
    async fn no_parent_active_no_labels_is_single_rw_bind() {
        let dir = TempDir::new().unwrap();
        let (engine, _resolver) = engine_with_stub(dir.path()).await;

        let mounts = engine.prepare("a", None, BTreeMap::new()).await.unwrap();

        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_type, "bind");
        assert!(mounts[0].options.contains(&"rw".to_string()));
        assert!(mounts[0].source.ends_with("snapshots/1/fs"));
    }

    // S2
    #[tokio::test]
    async fn two_layer_overlay_has_lowerdir_upperdir_workdir() {
        let dir = TempDir::new().unwrap();
        let (engine, _resolver) = engine_with_stub(dir.path()).await;

        engine.prepare("base-active", None, BTreeMap::new()).await.unwrap();
        engine.commit("base", "base-active").await.unwrap();

        let mounts = engine.prepare("top", Some("base"), BTreeMap::new()).await.unwrap();

        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_type, "overlay");
        assert!(mounts[0].options.iter().any(|o| o.starts_with("lowerdir=") && o.contains("snapshots/1/fs")));
        assert!(mounts[0].options.iter().any(|o| o.starts_with("upperdir=") && o.contains("snapshots/2/fs")));
        assert!(mounts[0].options.iter().any(|o| o.starts_with("workdir=") && o.contains("snapshots/2/work")));
    }

    // S3
    #[tokio::test]
    async fn closure_layer_resolves_store_paths_and_pins_gcroots() {
        let dir = TempDir::new().unwrap();
        let (engine, resolver) = engine_with_stub(dir.path()).await;

        let mounts = engine
            .prepare(
                "k",
                None,
                labels(&[
                    (NIX_LAYER_LABEL, "true"),
                    ("NIX_STORE_PATH.1", "/store/aaa-x"),
                    ("NIX_STORE_PATH.2", "/store/bbb-y"),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_type, "bind");

        let calls = resolver.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].0.ends_with("gcroots/1/aaa-x"));
        assert!(calls[1].0.ends_with("gcroots/1/bbb-y"));

        let gcroot_dir = dir.path().join("gcroots").join("1");
        let mut names: Vec<_> = std::fs::read_dir(&gcroot_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["aaa-x", "bbb-y"]);
    }

    // S4
    #[tokio::test]
    async fn bind_mounts_accumulate_leaf_to_root_with_dedup() {
        let dir = TempDir::new().unwrap();
        let (engine, _resolver) = engine_with_stub(dir.path()).await;

        engine
            .prepare(
                "k",
                None,
                labels(&[
                    (NIX_LAYER_LABEL, "true"),
                    ("NIX_STORE_PATH.1", "/store/aaa-x"),
                    ("NIX_STORE_PATH.2", "/store/bbb-y"),
                ]),
            )
            .await
            .unwrap();
        engine.commit("closure", "k").await.unwrap();

        engine
            .prepare("child", Some("closure"), labels(&[("NIX_STORE_PATH.1", "/store/ccc-z")]))
            .await
            .unwrap();

        let mounts = engine.mounts("child").await.unwrap();
        assert_eq!(mounts.len(), 4);
        assert_eq!(mounts[0].mount_type, "overlay");
        assert_eq!(mounts[1].source, "/store/ccc-z");
        assert_eq!(mounts[2].source, "/store/aaa-x");
        assert_eq!(mounts[3].source, "/store/bbb-y");
    }

    // S6
    #[tokio::test]
    async fn remove_then_view_fails_and_content_is_gone() {
        let dir = TempDir::new().unwrap();
        let (engine, _resolver) = engine_with_stub(dir.path()).await;

        engine.prepare("base-active", None, BTreeMap::new()).await.unwrap();
        engine.commit("base", "base-active").await.unwrap();

        let info = engine.stat("base").await.unwrap();
        let fs_dir = dir.path().join("snapshots").join(info.id.to_string()).join("fs");
        tokio::fs::write(fs_dir.join("foo"), b"hello").await.unwrap();

        engine.remove("base").await.unwrap();

        let result = engine.view("view1", Some("base"), BTreeMap::new()).await;
        assert!(matches!(result, Err(SnapshotterError::NotFound(_))));
        assert!(!fs_dir.exists());
    }

    #[tokio::test]
    async fn remove_with_live_dependents_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (engine, _resolver) = engine_with_stub(dir.path()).await;

        engine.prepare("parent-active", None, BTreeMap::new()).await.unwrap();
        engine.commit("parent", "parent-active").await.unwrap();
        engine.prepare("child", Some("parent"), BTreeMap::new()).await.unwrap();

        let result = engine.remove("parent").await;
        assert!(matches!(result, Err(SnapshotterError::FailedPrecondition { .. })));
    }

    #[tokio::test]
    async fn mounts_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (engine, _resolver) = engine_with_stub(dir.path()).await;

        engine.prepare("base-active", None, BTreeMap::new()).await.unwrap();
        engine.commit("base", "base-active").await.unwrap();
        engine.prepare("top", Some("base"), BTreeMap::new()).await.unwrap();

        let first = engine.mounts("top").await.unwrap();
        let second = engine.mounts("top").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cleanup_reclaims_orphan_directories() {
        let dir = TempDir::new().unwrap();
        let (engine, _resolver) = engine_with_stub(dir.path()).await;

        engine.prepare("a", None, BTreeMap::new()).await.unwrap();

        tokio::fs::create_dir_all(dir.path().join("snapshots").join("999").join("fs"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("snapshots").join("999").join("fs").join("junk"), b"xyz")
            .await
            .unwrap();

        let reclaimed = engine.cleanup().await.unwrap();
        assert_eq!(reclaimed, 3);
        assert!(!dir.path().join("snapshots").join("999").exists());
        assert!(dir.path().join("snapshots").join("1").exists());
    }
}
