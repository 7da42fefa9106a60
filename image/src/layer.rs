//! Builds the "closure layer": a small tarball containing mountpoints for every nix store path
//! plus symlinks that mirror copy-to-root paths onto the image's filesystem root. Bulk content
//! never enters the tarball; the snapshotter binds the real store paths in at mount time.

use crate::error::ImageError;
use crate::util::{sha256_hex, BoxFuture};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct ClosureLayer {
    pub compressed: Vec<u8>,
    pub diff_id: String,
    pub size: i64,
}

enum Entry {
    Dir,
    Symlink(PathBuf),
}

pub async fn write_nix_closure_layer(
    nix_store_paths: &[String],
    copy_to_roots: &[String],
) -> Result<ClosureLayer, ImageError> {
    let staging = tempfile::Builder::new().prefix("ssnap-image-closure-").tempdir()?;
    let root = staging.path().to_path_buf();

    for store_path in nix_store_paths {
        let meta = tokio::fs::metadata(store_path).await?;
        let rel = store_path.trim_start_matches('/');
        let mountpoint = if meta.is_dir() {
            root.join(rel)
        } else {
            root.join(rel).parent().map(Path::to_path_buf).unwrap_or_else(|| root.clone())
        };
        tokio::fs::create_dir_all(&mountpoint).await?;
    }

    for copy_to_root in copy_to_roots {
        let base = PathBuf::from(copy_to_root);
        mirror_copy_to_root(base.clone(), base, root.clone()).await?;
    }

    let entries = collect_entries(root.clone(), root.clone()).await?;
    tokio::task::spawn_blocking(move || build_tar_gzip(&entries))
        .await
        .expect("tar build task panicked")
}

fn mirror_copy_to_root(src: PathBuf, base: PathBuf, root: PathBuf) -> BoxFuture<'static, Result<(), ImageError>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let rel = path.strip_prefix(&base).expect("walked path under base");
            let dest = root.join(rel);
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                tokio::fs::create_dir_all(&dest).await?;
                mirror_copy_to_root(path, base.clone(), root.clone()).await?;
            } else {
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::symlink(&path, &dest).await?;
            }
        }
        Ok(())
    })
}

fn collect_entries(dir: PathBuf, root: PathBuf) -> BoxFuture<'static, Result<Vec<(String, Entry)>, ImageError>> {
    Box::pin(async move {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let rel = path
                .strip_prefix(&root)
                .expect("walked path under root")
                .to_string_lossy()
                .replace('\\', "/");
            let file_type = entry.file_type().await?;
            if file_type.is_symlink() {
                let target = tokio::fs::read_link(&path).await?;
                out.push((rel, Entry::Symlink(target)));
            } else if file_type.is_dir() {
                out.push((rel, Entry::Dir));
                out.extend(collect_entries(path, root.clone()).await?);
            }
        }
        Ok(out)
    })
}

fn build_tar_gzip(entries: &[(String, Entry)]) -> Result<ClosureLayer, ImageError> {
    let mut sorted: Vec<&(String, Entry)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for (rel, kind) in &sorted {
            match kind {
                Entry::Dir => append_dir(&mut builder, rel)?,
                Entry::Symlink(target) => append_symlink(&mut builder, rel, target)?,
            }
        }
        builder.finish()?;
    }

    let diff_id = format!("sha256:{}", sha256_hex(&tar_bytes));

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes)?;
    let compressed = encoder.finish()?;

    Ok(ClosureLayer { size: compressed.len() as i64, diff_id, compressed })
}

fn append_dir<W: Write>(builder: &mut tar::Builder<W>, rel: &str) -> Result<(), ImageError> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(0o755);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(0);
    let mut path = rel.to_string();
    path.push('/');
    builder.append_data(&mut header, &path, std::io::empty())?;
    Ok(())
}

fn append_symlink<W: Write>(builder: &mut tar::Builder<W>, rel: &str, target: &Path) -> Result<(), ImageError> {
    let mut header = tar::Header::new_gnu();
    header.set_mode(0o777);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(0);
    builder.append_link(&mut header, rel, target)?;
    Ok(())
}
