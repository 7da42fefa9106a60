//! Assembles an OCI manifest, config, and closure layer for a nix2container [`Image`] (C5).

use crate::archive::import_archive;
use crate::error::ImageError;
use crate::layer::write_nix_closure_layer;
use crate::types::{
    Descriptor, Image, ImageConfigBlob, ImageType, Manifest, RootFs, MEDIA_TYPE_OCI_CONFIG,
    MEDIA_TYPE_OCI_LAYER_GZIP, NIX_LAYER_ANNOTATION, NIX_STORE_PATH_ANNOTATION_PREFIX,
};
use crate::util::{parse_digest, BoxFuture};
use ssnap_store::FileSystemStore;
use std::path::Path;

/// Peeks at `image_path` to decide whether it holds an OCI archive tarball or another
/// nix2container image's JSON spec.
pub async fn detect_image_type(image_path: &Path) -> Result<ImageType, ImageError> {
    let path = image_path.to_path_buf();
    tokio::task::spawn_blocking(move || detect_image_type_blocking(&path))
        .await
        .expect("detect task panicked")
}

fn detect_image_type_blocking(path: &Path) -> Result<ImageType, ImageError> {
    let file = std::fs::File::open(path)?;
    let mut archive = tar::Archive::new(file);
    let is_tarball = match archive.entries() {
        Ok(mut entries) => matches!(entries.next(), Some(Ok(_))),
        Err(_) => false,
    };
    if is_tarball {
        return Ok(ImageType::OciTarball);
    }

    let bytes = std::fs::read(path)?;
    if serde_json::from_slice::<Image>(&bytes).is_ok() {
        return Ok(ImageType::Nix);
    }
    Ok(ImageType::Unknown)
}

/// Initializes a manifest and manifest config for `image`, inheriting layers, annotations and
/// diff-ids from its base image when one is set.
pub async fn initialize_manifest(
    image: &Image,
    store: &FileSystemStore,
) -> Result<(Manifest, ImageConfigBlob), ImageError> {
    let mut manifest = Manifest::default();
    let mut config = ImageConfigBlob {
        architecture: image.architecture.clone(),
        os: image.os.clone(),
        config: image.config.clone(),
        rootfs: RootFs { fs_type: "layers".to_string(), diff_ids: Vec::new() },
    };

    if !image.base_image.is_empty() {
        let base_path = Path::new(&image.base_image);
        let (base_manifest, base_config) = match detect_image_type(base_path).await? {
            ImageType::OciTarball => {
                let imported = import_archive(store, base_path).await?;
                (imported.manifest, imported.config)
            }
            ImageType::Nix => {
                let bytes = tokio::fs::read(base_path).await?;
                let base_image: Image = serde_json::from_slice(&bytes)?;
                let desc = generate(&base_image, store).await?;
                let (manifest_bytes, _) = store.get_manifest(&parse_digest(&desc.digest)?).await?;
                let base_manifest: Manifest = serde_json::from_slice(&manifest_bytes)?;
                let (config_bytes, _) =
                    store.get_manifest(&parse_digest(&base_manifest.config.digest)?).await?;
                let base_config: ImageConfigBlob = serde_json::from_slice(&config_bytes)?;
                (base_manifest, base_config)
            }
            ImageType::Unknown => {
                return Err(ImageError::UnknownImageType(image.base_image.clone()));
            }
        };

        manifest.layers.extend(base_manifest.layers);
        manifest.annotations.extend(base_manifest.annotations);
        config.rootfs.diff_ids.extend(base_config.rootfs.diff_ids);
    }

    Ok((manifest, config))
}

/// Generates a nix-snapshotter container image, writing its layer, config and manifest blobs
/// into `store`, and returns the manifest's descriptor.
pub fn generate<'a>(
    image: &'a Image,
    store: &'a FileSystemStore,
) -> BoxFuture<'a, Result<Descriptor, ImageError>> {
    Box::pin(async move {
        let (mut manifest, mut config) = initialize_manifest(image, store).await?;

        let layer = write_nix_closure_layer(&image.nix_store_paths, &image.copy_to_roots).await?;
        config.rootfs.diff_ids.push(layer.diff_id);

        let (layer_digest, layer_size) = store.put_blob(MEDIA_TYPE_OCI_LAYER_GZIP, &layer.compressed).await?;
        let mut annotations = std::collections::HashMap::new();
        annotations.insert(NIX_LAYER_ANNOTATION.to_string(), "true".to_string());
        for (i, store_path) in image.nix_store_paths.iter().enumerate() {
            annotations.insert(format!("{NIX_STORE_PATH_ANNOTATION_PREFIX}{i}"), store_path.clone());
        }
        manifest.layers.push(Descriptor {
            media_type: MEDIA_TYPE_OCI_LAYER_GZIP.to_string(),
            digest: layer_digest.to_string(),
            size: layer_size,
            annotations,
        });

        let config_bytes = serde_json::to_vec_pretty(&config)?;
        let (config_digest, config_size) = store.put_manifest(&config_bytes, MEDIA_TYPE_OCI_CONFIG).await?;
        manifest.config = Descriptor {
            media_type: MEDIA_TYPE_OCI_CONFIG.to_string(),
            digest: config_digest.to_string(),
            size: config_size,
            annotations: Default::default(),
        };

        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        let (manifest_digest, manifest_size) =
            store.put_manifest(&manifest_bytes, &manifest.media_type).await?;

        Ok(Descriptor {
            media_type: manifest.media_type.clone(),
            digest: manifest_digest.to_string(),
            size: manifest_size,
            annotations: Default::default(),
        })
    })
}
