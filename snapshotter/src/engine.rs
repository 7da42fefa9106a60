use crate::error::SnapshotterError;
use crate::types::{Info, Mount, Usage, NIX_LAYER_LABEL, NIX_STORE_PATH_PREFIX};
use ssnap_metadata::{Kind, MetadataStore, Record};
use ssnap_mount::{MountKind, OverlayOptions};
use ssnap_resolver::Resolver;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task;

const SNAPSHOTS_DIR: &str = "snapshots";
const GCROOTS_DIR: &str = "gcroots";
const METADATA_FILE: &str = "metadata.db";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Orchestrates the metadata store, overlay driver, and store-path resolver to implement the
/// snapshotter contract: Prepare/View/Mounts/Commit/Remove/Cleanup/Stat/Update/List/Usage.
pub struct Engine {
    root: PathBuf,
    metadata: Arc<MetadataStore>,
    resolver: Arc<dyn Resolver>,
    overlay_opts: OverlayOptions,
    async_remove: bool,
}

impl Engine {
    /// Opens (or creates) the state root. `fuse` swaps the overlay mount type to the
    /// userspace `fuse.overlayfs` flavour; `async_remove` defers directory reclamation from
    /// `Remove` to the next `Cleanup`.
    pub async fn new(
        root: impl AsRef<Path>,
        resolver: Arc<dyn Resolver>,
        fuse: bool,
        async_remove: bool,
    ) -> Result<Self, SnapshotterError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join(SNAPSHOTS_DIR)).await?;
        tokio::fs::create_dir_all(root.join(GCROOTS_DIR)).await?;

        let db_path = root.join(METADATA_FILE);
        let metadata = task::spawn_blocking(move || MetadataStore::open(db_path))
            .await
            .expect("metadata open task panicked")?;

        let overlay_opts = ssnap_mount::probe_overlay_capabilities(fuse);

        Ok(Self {
            root,
            metadata: Arc::new(metadata),
            resolver,
            overlay_opts,
            async_remove,
        })
    }

    fn snapshot_dir(&self, id: u64) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR).join(id.to_string())
    }

    fn fs_dir(&self, id: u64) -> PathBuf {
        self.snapshot_dir(id).join("fs")
    }

    fn work_dir(&self, id: u64) -> PathBuf {
        self.snapshot_dir(id).join("work")
    }

    fn gcroot_dir(&self, id: u64) -> PathBuf {
        self.root.join(GCROOTS_DIR).join(id.to_string())
    }

    fn tmp_dir(&self) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(SNAPSHOTS_DIR)
            .join(format!(".tmp-{}-{}", std::process::id(), n))
    }

    pub async fn prepare(
        &self,
        key: &str,
        parent: Option<&str>,
        labels: BTreeMap<String, String>,
    ) -> Result<Vec<Mount>, SnapshotterError> {
        let is_closure_layer = labels.get(NIX_LAYER_LABEL).map(String::as_str) == Some("true");

        let record = self.create_snapshot(Kind::Active, key, parent, labels).await?;
        let root_mount = self.root_mount_for(record.id, key, Kind::Active).await?;

        if is_closure_layer {
            // The host is about to unpack the closure layer's tarball into fs/; bind mounts
            // from the parent chain would be redundant mountpoints at this point.
            self.resolve_closure(record.id, &record.labels).await?;
            return Ok(vec![root_mount]);
        }

        let mut mounts = vec![root_mount];
        mounts.extend(self.assemble_binds(key).await?);
        Ok(mounts)
    }

    /// As `prepare`, but store-path labels are only ever honoured for bind-mount assembly: a
    /// view never resolves/pins store paths, even when labelled `NIX_LAYER=true`.
    pub async fn view(
        &self,
        key: &str,
        parent: Option<&str>,
        labels: BTreeMap<String, String>,
    ) -> Result<Vec<Mount>, SnapshotterError> {
        let record = self.create_snapshot(Kind::View, key, parent, labels).await?;
        let root_mount = self.root_mount_for(record.id, key, Kind::View).await?;

        let mut mounts = vec![root_mount];
        mounts.extend(self.assemble_binds(key).await?);
        Ok(mounts)
    }

    /// Steps 1-3 of Prepare/View: create a pristine temp directory, inherit parent ownership,
    /// allocate the metadata record, and pivot the temp directory into place atomically.
    async fn create_snapshot(
        &self,
        kind: Kind,
        key: &str,
        parent: Option<&str>,
        labels: BTreeMap<String, String>,
    ) -> Result<Record, SnapshotterError> {
        let tmp = self.tmp_dir();
        let active = matches!(kind, Kind::Active);

        tokio::fs::create_dir_all(tmp.join("fs")).await?;
        if active {
            if let Err(e) = tokio::fs::create_dir_all(tmp.join("work")).await {
                let _ = tokio::fs::remove_dir_all(&tmp).await;
                return Err(e.into());
            }
        }

        let metadata = self.metadata.clone();
        let root = self.root.clone();
        let key = key.to_string();
        let parent = parent.map(String::from);
        let tmp_fs = tmp.join("fs");

        let result = task::spawn_blocking(move || -> Result<Record, SnapshotterError> {
            let txn = metadata.begin_write()?;

            if let Some(p) = &parent {
                let parent_record = match txn.get_info(p) {
                    Ok(r) => r,
                    Err(e) => {
                        let _ = txn.rollback();
                        return Err(e.into());
                    }
                };
                let parent_fs = root
                    .join(SNAPSHOTS_DIR)
                    .join(parent_record.id.to_string())
                    .join("fs");
                if let Err(e) = ssnap_mount::inherit_ownership(&tmp_fs, &parent_fs) {
                    let _ = txn.rollback();
                    return Err(e.into());
                }
            }

            let record = match txn.create_snapshot(kind, &key, parent.as_deref(), labels) {
                Ok(r) => r,
                Err(e) => {
                    let _ = txn.rollback();
                    return Err(e.into());
                }
            };

            let final_dir = root.join(SNAPSHOTS_DIR).join(record.id.to_string());
            if let Err(e) = std::fs::rename(&tmp, &final_dir) {
                let _ = txn.rollback();
                return Err(e.into());
            }

            txn.commit()?;
            Ok(record)
        })
        .await
        .expect("metadata write task panicked");

        if result.is_err() {
            let _ = tokio::fs::remove_dir_all(&tmp).await;
        }

        result
    }

    async fn root_mount_for(&self, id: u64, key: &str, kind: Kind) -> Result<Mount, SnapshotterError> {
        let metadata = self.metadata.clone();
        let root = self.root.clone();
        let key = key.to_string();

        let parent_fs_dirs = task::spawn_blocking(move || -> Result<Vec<PathBuf>, SnapshotterError> {
            let txn = metadata.begin_read()?;
            let (_id, parent_ids) = txn.get_snapshot(&key)?;
            Ok(parent_ids
                .into_iter()
                .map(|pid| root.join(SNAPSHOTS_DIR).join(pid.to_string()).join("fs"))
                .collect())
        })
        .await
        .expect("metadata read task panicked")?;

        let mount_kind = match kind {
            Kind::Active => MountKind::Active,
            Kind::View => MountKind::View,
            Kind::Committed => MountKind::Committed,
        };

        let self_fs = self.fs_dir(id);
        let self_work = active_work_dir(kind, self.work_dir(id));

        let spec = ssnap_mount::compute_root_mount(
            &self_fs,
            self_work.as_deref(),
            &parent_fs_dirs,
            mount_kind,
            &self.overlay_opts,
        );

        Ok(Mount {
            mount_type: spec.mount_type,
            source: spec.source,
            target: String::new(),
            options: spec.options,
        })
    }

    async fn resolve_closure(
        &self,
        id: u64,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), SnapshotterError> {
        let gcroot_dir = self.gcroot_dir(id);
        for (label_key, store_path) in labels {
            if !label_key.starts_with(NIX_STORE_PATH_PREFIX) {
                continue;
            }
            let basename = Path::new(store_path).file_name().ok_or_else(|| {
                SnapshotterError::Invalid(format!("store path has no basename: {store_path}"))
            })?;
            let out_link = gcroot_dir.join(basename);
            self.resolver.resolve(&out_link, store_path).await?;
        }
        Ok(())
    }

    /// §4.5: walk the parent chain starting at the queried key, collecting `NIX_STORE_PATH.*`
    /// values in sorted-label order at each level (duplicates suppressed, closest to the leaf
    /// wins) and emitting them in that same leaf-to-root order, so the snapshot's own store
    /// paths precede its ancestors'.
    async fn assemble_binds(&self, key: &str) -> Result<Vec<Mount>, SnapshotterError> {
        let metadata = self.metadata.clone();
        let key = key.to_string();

        task::spawn_blocking(move || -> Result<Vec<Mount>, SnapshotterError> {
            let txn = metadata.begin_read()?;

            let mut binds = Vec::new();
            let mut seen = HashSet::new();
            let mut current = Some(key);

            while let Some(k) = current {
                let record = txn.get_info(&k)?;
                for (label_key, store_path) in &record.labels {
                    if !label_key.starts_with(NIX_STORE_PATH_PREFIX) {
                        continue;
                    }
                    if seen.insert(store_path.clone()) {
                        binds.push(Mount {
                            mount_type: "bind".to_string(),
                            source: store_path.clone(),
                            target: store_path.clone(),
                            options: vec!["ro".to_string(), "rbind".to_string()],
                        });
                    }
                }
                current = record.parent;
            }

            Ok(binds)
        })
        .await
        .expect("metadata read task panicked")
    }

    pub async fn mounts(&self, key: &str) -> Result<Vec<Mount>, SnapshotterError> {
        let record = self.stat(key).await?;
        let root_mount = self.root_mount_for(record.id, key, record.kind).await?;
        let mut mounts = vec![root_mount];
        mounts.extend(self.assemble_binds(key).await?);
        Ok(mounts)
    }

    pub async fn commit(&self, name: &str, key: &str) -> Result<Info, SnapshotterError> {
        let metadata = self.metadata.clone();
        let name = name.to_string();
        let key = key.to_string();

        let record = task::spawn_blocking(move || -> Result<Record, SnapshotterError> {
            let txn = metadata.begin_write()?;
            match txn.commit_snapshot(&name, &key, BTreeMap::new()) {
                Ok(r) => {
                    txn.commit()?;
                    Ok(r)
                }
                Err(e) => {
                    let _ = txn.rollback();
                    Err(e.into())
                }
            }
        })
        .await
        .expect("metadata write task panicked")?;

        let work_dir = self.work_dir(record.id);
        if work_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
                tracing::warn!(id = record.id, error = %e, "failed to reclaim work directory after commit");
            }
        }

        Ok(record)
    }

    pub async fn remove(&self, key: &str) -> Result<(), SnapshotterError> {
        let metadata = self.metadata.clone();
        let key_owned = key.to_string();

        let id = task::spawn_blocking(move || -> Result<u64, SnapshotterError> {
            let txn = metadata.begin_write()?;
            match txn.remove(&key_owned) {
                Ok(id) => {
                    txn.commit()?;
                    Ok(id)
                }
                Err(e) => {
                    let _ = txn.rollback();
                    Err(e.into())
                }
            }
        })
        .await
        .expect("metadata write task panicked")?;

        if !self.async_remove {
            self.reclaim(id).await;
        }

        Ok(())
    }

    async fn reclaim(&self, id: u64) {
        for dir in [self.snapshot_dir(id), self.gcroot_dir(id)] {
            if dir.exists() {
                if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                    tracing::warn!(id, path = %dir.display(), error = %e, "failed to reclaim directory");
                }
            }
        }
    }

    pub async fn cleanup(&self) -> Result<i64, SnapshotterError> {
        let metadata = self.metadata.clone();

        let live_ids = task::spawn_blocking(move || -> Result<HashSet<u64>, SnapshotterError> {
            let txn = metadata.begin_write()?;
            let ids = txn.id_map()?.keys().copied().collect();
            txn.commit()?;
            Ok(ids)
        })
        .await
        .expect("metadata write task panicked")?;

        let mut reclaimed = 0i64;
        for base in [self.root.join(SNAPSHOTS_DIR), self.root.join(GCROOTS_DIR)] {
            let orphans = {
                let base = base.clone();
                let live_ids = live_ids.clone();
                task::spawn_blocking(move || ssnap_mount::orphan_directories(&base, &live_ids))
                    .await
                    .expect("orphan scan task panicked")?
            };

            for path in orphans {
                let (size, _) = dir_usage(&path).await.unwrap_or((0, 0));
                if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "failed to reclaim orphan directory");
                } else {
                    reclaimed += size;
                }
            }
        }

        Ok(reclaimed)
    }

    pub async fn stat(&self, key: &str) -> Result<Info, SnapshotterError> {
        let metadata = self.metadata.clone();
        let key = key.to_string();
        task::spawn_blocking(move || -> Result<Info, SnapshotterError> {
            let txn = metadata.begin_read()?;
            Ok(txn.get_info(&key)?)
        })
        .await
        .expect("metadata read task panicked")
    }

    pub async fn update(
        &self,
        key: &str,
        labels: BTreeMap<String, String>,
        field_mask: Option<Vec<String>>,
    ) -> Result<Info, SnapshotterError> {
        let metadata = self.metadata.clone();
        let key = key.to_string();
        task::spawn_blocking(move || -> Result<Info, SnapshotterError> {
            let txn = metadata.begin_write()?;
            match txn.update(&key, labels, field_mask.as_deref()) {
                Ok(record) => {
                    txn.commit()?;
                    Ok(record)
                }
                Err(e) => {
                    let _ = txn.rollback();
                    Err(e.into())
                }
            }
        })
        .await
        .expect("metadata write task panicked")
    }

    pub async fn list(&self, parent_filter: Option<&str>) -> Result<Vec<Info>, SnapshotterError> {
        let metadata = self.metadata.clone();
        let parent_filter = parent_filter.map(String::from);
        task::spawn_blocking(move || -> Result<Vec<Info>, SnapshotterError> {
            let txn = metadata.begin_read()?;
            Ok(txn.list(parent_filter.as_deref())?)
        })
        .await
        .expect("metadata read task panicked")
    }

    pub async fn usage(&self, key: &str) -> Result<Usage, SnapshotterError> {
        let record = self.stat(key).await?;
        let (size, inodes) = dir_usage(&self.fs_dir(record.id)).await?;
        Ok(Usage { size, inodes })
    }
}

fn active_work_dir(kind: Kind, work_dir: PathBuf) -> Option<PathBuf> {
    matches!(kind, Kind::Active).then_some(work_dir)
}

async fn dir_usage(path: &Path) -> Result<(i64, i64), SnapshotterError> {
    if !path.exists() {
        return Ok((0, 0));
    }

    let mut size = 0i64;
    let mut inodes = 0i64;
    let mut stack = vec![path.to_path_buf()];

    while let Some(current) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            inodes += 1;
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                stack.push(entry.path());
            } else {
                size += metadata.len() as i64;
            }
        }
    }

    Ok((size, inodes))
}
