//! End-to-end check that building the same image spec twice, with a real delay between runs,
//! yields byte-identical layer output (S5).

use ssnap_image::{generate, Image, ImageConfig};
use ssnap_store::FileSystemStore;
use std::path::Path;
use tempfile::TempDir;

async fn make_store_path(dir: &Path, name: &str, files: &[(&str, &str)]) -> std::path::PathBuf {
    let root = dir.join(name);
    for (rel, contents) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(&path, contents).await.unwrap();
    }
    root
}

#[tokio::test]
async fn deterministic_tarball_across_two_builds_five_seconds_apart() {
    let workdir = TempDir::new().unwrap();
    let a = make_store_path(workdir.path(), "a", &[("bin/a", "x")]).await;
    let b = make_store_path(workdir.path(), "b", &[("bin/b", "y")]).await;
    let paths = vec![a.to_string_lossy().into_owned(), b.to_string_lossy().into_owned()];

    let image = Image {
        config: ImageConfig::default(),
        base_image: String::new(),
        architecture: "amd64".to_string(),
        os: "linux".to_string(),
        nix_store_paths: paths.clone(),
        copy_to_roots: vec![],
    };

    let store_dir_1 = TempDir::new().unwrap();
    let store_1 = FileSystemStore::new(store_dir_1.path()).await.unwrap();
    let desc_1 = generate(&image, &store_1).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(5)).await;

    let store_dir_2 = TempDir::new().unwrap();
    let store_2 = FileSystemStore::new(store_dir_2.path()).await.unwrap();
    let desc_2 = generate(&image, &store_2).await.unwrap();

    assert_eq!(desc_1.digest, desc_2.digest);
}
