//! Reads and writes the OCI archive layout (C6): a top-level `manifest.json` array with one
//! entry, alongside the config and layer blobs it references, all inside a single tar file.

use crate::error::ImageError;
use crate::types::{
    ArchiveManifestEntry, Descriptor, ImageConfigBlob, Manifest, MEDIA_TYPE_OCI_CONFIG,
    MEDIA_TYPE_OCI_LAYER,
};
use crate::util::parse_digest;
use ssnap_store::FileSystemStore;
use std::io::Write;
use std::path::Path;

pub struct ImportedBase {
    pub manifest: Manifest,
    pub config: ImageConfigBlob,
}

/// Streams `manifest`'s config and layer blobs, looked up from `store`, into a tar archive at
/// `out_path` alongside a top-level `manifest.json` naming them.
pub async fn export_archive(
    store: &FileSystemStore,
    manifest: &Manifest,
    reference: &str,
    out_path: &Path,
) -> Result<(), ImageError> {
    let (config_bytes, _) = store.get_manifest(&parse_digest(&manifest.config.digest)?).await?;
    let config_name = format!("{}.json", digest_hash(&manifest.config.digest));

    let mut layer_names = Vec::with_capacity(manifest.layers.len());
    let mut layer_blobs = Vec::with_capacity(manifest.layers.len());
    for layer in &manifest.layers {
        let bytes = store.get_blob(&parse_digest(&layer.digest)?).await?;
        let ext = if layer.media_type.ends_with("gzip") { "tar.gz" } else { "tar" };
        layer_names.push(format!("{}.{ext}", digest_hash(&layer.digest)));
        layer_blobs.push(bytes);
    }

    let entry = ArchiveManifestEntry {
        config: config_name.clone(),
        repo_tags: if reference.is_empty() { Vec::new() } else { vec![reference.to_string()] },
        layers: layer_names.clone(),
    };
    let manifest_json = serde_json::to_vec_pretty(&[entry])?;
    // The docker-archive `manifest.json` entry has no room for descriptor annotations
    // (NIX_LAYER, NIX_STORE_PATH.*), so the full OCI manifest rides alongside it for import
    // to recover them from.
    let oci_manifest_json = serde_json::to_vec_pretty(manifest)?;

    let out_path = out_path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::create(&out_path)?;
        let mut builder = tar::Builder::new(file);
        append_file(&mut builder, &config_name, &config_bytes)?;
        for (name, bytes) in layer_names.iter().zip(layer_blobs.iter()) {
            append_file(&mut builder, name, bytes)?;
        }
        append_file(&mut builder, "manifest.json", &manifest_json)?;
        append_file(&mut builder, "oci-manifest.json", &oci_manifest_json)?;
        builder.finish()?;
        Ok::<_, ImageError>(())
    })
    .await
    .expect("archive export task panicked")
}

/// Untars `archive_path` into a scratch directory, parses `manifest.json` (which must hold
/// exactly one entry), and writes the referenced config and layers into `store`.
pub async fn import_archive(store: &FileSystemStore, archive_path: &Path) -> Result<ImportedBase, ImageError> {
    let staging = tempfile::Builder::new().prefix("ssnap-image-import-").tempdir()?;
    let root = staging.path().to_path_buf();

    let archive_path_owned = archive_path.to_path_buf();
    let unpack_root = root.clone();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive_path_owned)?;
        let mut archive = tar::Archive::new(file);
        archive.unpack(&unpack_root)
    })
    .await
    .expect("archive import task panicked")?;

    let manifest_bytes = tokio::fs::read(root.join("manifest.json")).await?;
    let entries: Vec<ArchiveManifestEntry> = serde_json::from_slice(&manifest_bytes)?;
    if entries.len() != 1 {
        return Err(ImageError::ArchiveFormat(format!(
            "expected exactly 1 manifest entry, got {}",
            entries.len()
        )));
    }
    let entry = &entries[0];

    let config_bytes = tokio::fs::read(root.join(&entry.config)).await?;
    let config: ImageConfigBlob = serde_json::from_slice(&config_bytes)?;
    let (config_digest, config_size) = store.put_manifest(&config_bytes, MEDIA_TYPE_OCI_CONFIG).await?;

    // Recover layer annotations (NIX_LAYER, NIX_STORE_PATH.*) from the sidecar OCI manifest
    // written by export_archive, if present; older archives simply have none.
    let source_annotations: Vec<std::collections::HashMap<String, String>> =
        match tokio::fs::read(root.join("oci-manifest.json")).await {
            Ok(bytes) => match serde_json::from_slice::<Manifest>(&bytes) {
                Ok(m) => m.layers.into_iter().map(|d| d.annotations).collect(),
                Err(_) => Vec::new(),
            },
            Err(_) => Vec::new(),
        };

    let mut manifest = Manifest {
        config: Descriptor {
            media_type: MEDIA_TYPE_OCI_CONFIG.to_string(),
            digest: config_digest.to_string(),
            size: config_size,
            annotations: Default::default(),
        },
        ..Manifest::default()
    };

    for (i, layer_path) in entry.layers.iter().enumerate() {
        let layer_bytes = tokio::fs::read(root.join(layer_path)).await?;
        let (layer_digest, layer_size) = store.put_blob(MEDIA_TYPE_OCI_LAYER, &layer_bytes).await?;
        manifest.layers.push(Descriptor {
            media_type: MEDIA_TYPE_OCI_LAYER.to_string(),
            digest: layer_digest.to_string(),
            size: layer_size,
            annotations: source_annotations.get(i).cloned().unwrap_or_default(),
        });
    }

    Ok(ImportedBase { manifest, config })
}

fn digest_hash(digest: &str) -> &str {
    digest.split_once(':').map(|(_, hash)| hash).unwrap_or(digest)
}

fn append_file<W: Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8]) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(data.len() as u64);
    builder.append_data(&mut header, name, data)
}
