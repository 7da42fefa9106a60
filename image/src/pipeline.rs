//! Thin build/export/load pipeline matching the original `nix2container` CLI surface: `build`
//! performs step 1 of the image generator, `export` performs steps 2-7 plus archive export,
//! and `load` reads an archive back into the content store for local inspection.

use crate::archive::{export_archive, import_archive, ImportedBase};
use crate::error::ImageError;
use crate::generate::generate;
use crate::types::{Image, ImageConfig};
use crate::util::oci_arch;
use ssnap_store::FileSystemStore;
use std::path::Path;

/// Reads a config JSON, a newline-delimited store-path closure, and a copy-to-root JSON array,
/// and writes the resulting [`Image`] spec to `out_path`.
pub async fn build_image(
    config_path: &Path,
    closure_path: &Path,
    copy_to_root_path: &Path,
    out_path: &Path,
    from_image: Option<&str>,
) -> Result<(), ImageError> {
    let config_bytes = tokio::fs::read(config_path).await?;
    let config: ImageConfig = serde_json::from_slice(&config_bytes)?;

    let closure_text = tokio::fs::read_to_string(closure_path).await?;
    let nix_store_paths: Vec<String> =
        closure_text.lines().filter(|line| !line.is_empty()).map(str::to_string).collect();

    let copy_to_root_bytes = tokio::fs::read(copy_to_root_path).await?;
    let copy_to_roots: Vec<String> = serde_json::from_slice(&copy_to_root_bytes)?;

    let image = Image {
        config,
        base_image: from_image.unwrap_or_default().to_string(),
        architecture: oci_arch().to_string(),
        os: std::env::consts::OS.to_string(),
        nix_store_paths,
        copy_to_roots,
    };

    let json = serde_json::to_vec_pretty(&image)?;
    tokio::fs::write(out_path, json).await?;
    Ok(())
}

/// Generates `image_json_path`'s image into `store_root` and exports it as a single-manifest
/// OCI archive tarball named `out_path`, tagged with `reference`.
pub async fn export_image(
    image_json_path: &Path,
    reference: &str,
    out_path: &Path,
    store_root: &Path,
) -> Result<(), ImageError> {
    let bytes = tokio::fs::read(image_json_path).await?;
    let image: Image = serde_json::from_slice(&bytes)?;

    let store = FileSystemStore::new(store_root).await?;
    let desc = generate(&image, &store).await?;

    let digest = crate::util::parse_digest(&desc.digest)?;
    let (manifest_bytes, _) = store.get_manifest(&digest).await?;
    let manifest: crate::types::Manifest = serde_json::from_slice(&manifest_bytes)?;

    export_archive(&store, &manifest, reference, out_path).await
}

/// Reads an OCI archive tarball into the content store at `store_root` for local inspection.
pub async fn load_image(archive_path: &Path, store_root: &Path) -> Result<ImportedBase, ImageError> {
    let store = FileSystemStore::new(store_root).await?;
    import_archive(&store, archive_path).await
}
