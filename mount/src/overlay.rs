use crate::MountSpec;
use crate::error::MountError;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Whether the snapshot being mounted is writable (`active`) or not (`committed`/`view`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Active,
    View,
    Committed,
}

/// Kernel overlayfs capabilities, probed once per process.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayOptions {
    pub index_off: bool,
    pub userxattr: bool,
    pub fuse: bool,
}

static PROBED: OnceLock<OverlayOptions> = OnceLock::new();

/// Probe whether this kernel needs `index=off`/`userxattr` by attempting a scratch overlay
/// mount. Caches the result for the lifetime of the process. Never fails Prepare: a probe
/// error just means the flags are omitted.
pub fn probe_overlay_capabilities(fuse: bool) -> OverlayOptions {
    *PROBED.get_or_init(|| probe_once(fuse))
}

fn probe_once(fuse: bool) -> OverlayOptions {
    let scratch = match tempfile_scratch_dir() {
        Some(dir) => dir,
        None => return OverlayOptions { fuse, ..Default::default() },
    };
    let lower = scratch.join("lower");
    let upper = scratch.join("upper");
    let work = scratch.join("work");
    let merged = scratch.join("merged");
    for dir in [&lower, &upper, &work, &merged] {
        if std::fs::create_dir_all(dir).is_err() {
            let _ = std::fs::remove_dir_all(&scratch);
            return OverlayOptions { fuse, ..Default::default() };
        }
    }

    let try_mount = |extra: &str| -> bool {
        let options = format!(
            "lowerdir={},upperdir={},workdir={}{}",
            lower.display(),
            upper.display(),
            work.display(),
            extra
        );
        let ok = mount(
            Some("overlay"),
            &merged,
            Some("overlay"),
            MsFlags::empty(),
            Some(options.as_str()),
        )
        .is_ok();
        if ok {
            let _ = umount2(&merged, MntFlags::MNT_DETACH);
        }
        ok
    };

    let index_off = try_mount(",index=off");
    let userxattr = try_mount(",userxattr");

    let _ = std::fs::remove_dir_all(&scratch);

    OverlayOptions { index_off, userxattr, fuse }
}

fn tempfile_scratch_dir() -> Option<PathBuf> {
    let base = std::env::temp_dir().join(format!("ssnap-overlay-probe-{}", std::process::id()));
    std::fs::create_dir_all(&base).ok()?;
    Some(base)
}

/// Compute the root mount (overlay or bind) for a snapshot given its upper/work directories
/// and the `fs/` directories of its parent chain (leaf-first order, i.e. nearest parent first).
///
/// - no parents: a bind mount of the snapshot's own `fs/` (rw for active, ro otherwise).
/// - exactly one parent and `kind == View`: a read-only rbind of the parent's `fs/`, skipping
///   the overlay entirely.
/// - otherwise: an overlay mount with `lowerdir` set to the parent chain and, for `Active`,
///   `upperdir`/`workdir` pointed at the snapshot's own directories.
pub fn compute_root_mount(
    self_fs: &Path,
    self_work: Option<&Path>,
    parent_fs_dirs: &[PathBuf],
    kind: MountKind,
    opts: &OverlayOptions,
) -> MountSpec {
    let readonly = matches!(kind, MountKind::View | MountKind::Committed);

    if parent_fs_dirs.is_empty() {
        return MountSpec::new(
            "bind",
            &self_fs.to_string_lossy(),
            if readonly {
                vec!["ro".to_string(), "rbind".to_string()]
            } else {
                vec!["rw".to_string(), "rbind".to_string()]
            },
        );
    }

    if parent_fs_dirs.len() == 1 && kind == MountKind::View {
        return MountSpec::new(
            "bind",
            &parent_fs_dirs[0].to_string_lossy(),
            vec!["ro".to_string(), "rbind".to_string()],
        );
    }

    let lowerdir = parent_fs_dirs
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(":");

    let mut options = vec![format!("lowerdir={}", lowerdir)];
    if kind == MountKind::Active {
        options.push(format!("upperdir={}", self_fs.display()));
        if let Some(work) = self_work {
            options.push(format!("workdir={}", work.display()));
        }
    }
    if opts.index_off {
        options.push("index=off".to_string());
    }
    if opts.userxattr {
        options.push("userxattr".to_string());
    }

    let mount_type = if opts.fuse { "fuse.overlayfs" } else { "overlay" };
    MountSpec::new(mount_type, mount_type, options)
}

/// Inherit ownership of the parent's upper directory onto a freshly created child `fs/`, so
/// overlay copy-up preserves whatever user-namespace mapping the parent was created under.
pub fn inherit_ownership(child_fs: &Path, parent_fs: &Path) -> Result<(), MountError> {
    let meta = std::fs::metadata(parent_fs)?;
    use std::os::unix::fs::MetadataExt;
    let uid = nix::unistd::Uid::from_raw(meta.uid());
    let gid = nix::unistd::Gid::from_raw(meta.gid());
    nix::unistd::chown(child_fs, Some(uid), Some(gid))?;
    Ok(())
}

/// Mount a filesystem based on the mount specification.
///
/// Supports:
/// - overlay / fuse.overlayfs: OverlayFS mount with lowerdir, upperdir, workdir options
/// - bind: Bind mount from source to target
pub fn mount_overlay(spec: &MountSpec, target: &Path) -> Result<(), MountError> {
    std::fs::create_dir_all(target)?;

    match spec.mount_type.as_str() {
        "overlay" | "fuse.overlayfs" => mount_overlay_fs(spec, target),
        "bind" => mount_bind(spec, target),
        other => Err(MountError::InvalidSpec(format!(
            "unsupported mount type: {}",
            other
        ))),
    }
}

fn mount_overlay_fs(spec: &MountSpec, target: &Path) -> Result<(), MountError> {
    let options = spec.options.join(",");

    tracing::info!("Mounting {} at {:?} with options: {}", spec.mount_type, target, options);

    mount(
        Some(spec.mount_type.as_str()),
        target,
        Some(spec.mount_type.as_str()),
        MsFlags::empty(),
        Some(options.as_str()),
    )
    .map_err(|e| MountError::MountFailed(format!("overlay mount failed: {}", e)))?;

    tracing::info!("Mounted overlay filesystem at {:?}", target);
    Ok(())
}

fn mount_bind(spec: &MountSpec, target: &Path) -> Result<(), MountError> {
    let source = Path::new(&spec.source);

    let mut flags = MsFlags::MS_BIND;

    for opt in &spec.options {
        match opt.as_str() {
            "ro" => flags |= MsFlags::MS_RDONLY,
            "rbind" => flags |= MsFlags::MS_REC,
            _ => {}
        }
    }

    tracing::info!(
        "Bind mounting {:?} to {:?} with flags {:?}, options {:?}",
        source,
        target,
        flags,
        spec.options
    );

    mount(Some(source), target, None::<&str>, flags, None::<&str>)
        .map_err(|e| MountError::MountFailed(format!("bind mount failed: {}", e)))?;

    // overlayfs ignores MS_RDONLY on the initial bind; a remount is required to make it stick.
    if spec.options.iter().any(|o| o == "ro") {
        mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None::<&str>,
        )
        .map_err(|e| MountError::MountFailed(format!("remount read-only failed: {}", e)))?;
    }

    tracing::info!("Bind mounted {:?} to {:?}", source, target);
    Ok(())
}

/// Cleanup-assist: list the entries directly under `base` (a `snapshots/` or `gcroots/`
/// directory) whose name is not a live snapshot id, skipping in-progress `.tmp-*` staging
/// directories. The caller owns removal; this only identifies what is orphaned.
pub fn orphan_directories(base: &Path, live_ids: &HashSet<u64>) -> std::io::Result<Vec<PathBuf>> {
    let mut orphans = Vec::new();

    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(orphans),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(".tmp-") {
            continue;
        }
        let is_live = name.parse::<u64>().map(|id| live_ids.contains(&id)).unwrap_or(false);
        if !is_live {
            orphans.push(entry.path());
        }
    }

    Ok(orphans)
}

/// Unmount a filesystem at the given path.
pub fn unmount(target: &Path) -> Result<(), MountError> {
    tracing::debug!("Unmounting {:?}", target);

    umount2(target, MntFlags::MNT_DETACH)
        .map_err(|e| MountError::UnmountFailed(format!("unmount failed: {}", e)))?;

    tracing::info!("Unmounted {:?}", target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_spec() {
        let spec = MountSpec::new(
            "overlay",
            "overlay",
            vec![
                "lowerdir=/lower".to_string(),
                "upperdir=/upper".to_string(),
                "workdir=/work".to_string(),
            ],
        );

        assert_eq!(spec.mount_type, "overlay");
        assert_eq!(spec.options.len(), 3);
    }

    #[test]
    fn no_parent_active_is_rw_bind() {
        let spec = compute_root_mount(
            Path::new("/root/snapshots/1/fs"),
            Some(Path::new("/root/snapshots/1/work")),
            &[],
            MountKind::Active,
            &OverlayOptions::default(),
        );
        assert_eq!(spec.mount_type, "bind");
        assert_eq!(spec.source, "/root/snapshots/1/fs");
        assert_eq!(spec.options, vec!["rw", "rbind"]);
    }

    #[test]
    fn no_parent_view_is_ro_bind() {
        let spec = compute_root_mount(
            Path::new("/root/snapshots/1/fs"),
            None,
            &[],
            MountKind::View,
            &OverlayOptions::default(),
        );
        assert_eq!(spec.options, vec!["ro", "rbind"]);
    }

    #[test]
    fn single_parent_view_shortcuts_to_parent_bind() {
        let spec = compute_root_mount(
            Path::new("/root/snapshots/2/fs"),
            None,
            &[PathBuf::from("/root/snapshots/1/fs")],
            MountKind::View,
            &OverlayOptions::default(),
        );
        assert_eq!(spec.mount_type, "bind");
        assert_eq!(spec.source, "/root/snapshots/1/fs");
        assert_eq!(spec.options, vec!["ro", "rbind"]);
    }

    #[test]
    fn multi_parent_active_is_overlay_with_upper_and_work() {
        let spec = compute_root_mount(
            Path::new("/root/snapshots/3/fs"),
            Some(Path::new("/root/snapshots/3/work")),
            &[
                PathBuf::from("/root/snapshots/2/fs"),
                PathBuf::from("/root/snapshots/1/fs"),
            ],
            MountKind::Active,
            &OverlayOptions::default(),
        );
        assert_eq!(spec.mount_type, "overlay");
        assert!(
            spec.options
                .contains(&"lowerdir=/root/snapshots/2/fs:/root/snapshots/1/fs".to_string())
        );
        assert!(spec.options.contains(&"upperdir=/root/snapshots/3/fs".to_string()));
        assert!(spec.options.contains(&"workdir=/root/snapshots/3/work".to_string()));
    }

    #[test]
    fn single_parent_committed_is_readonly_overlay_without_upper() {
        let spec = compute_root_mount(
            Path::new("/root/snapshots/2/fs"),
            None,
            &[PathBuf::from("/root/snapshots/1/fs")],
            MountKind::Committed,
            &OverlayOptions::default(),
        );
        assert_eq!(spec.mount_type, "overlay");
        assert!(!spec.options.iter().any(|o| o.starts_with("upperdir=")));
    }

    #[test]
    fn orphan_directories_skips_live_ids_and_tmp_staging() {
        let dir = tempfile_scratch_dir().unwrap();
        for name in ["1", "2", "3", ".tmp-4"] {
            std::fs::create_dir_all(dir.join(name)).unwrap();
        }

        let live_ids: HashSet<u64> = [1, 3].into_iter().collect();
        let mut orphans: Vec<String> = orphan_directories(&dir, &live_ids)
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        orphans.sort();

        assert_eq!(orphans, vec!["2"]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn orphan_directories_on_missing_base_is_empty() {
        let live_ids = HashSet::new();
        let orphans = orphan_directories(Path::new("/nonexistent/ssnap-test-base"), &live_ids).unwrap();
        assert!(orphans.is_empty());
    }

    #[test]
    fn fuse_flavour_swaps_mount_type() {
        let spec = compute_root_mount(
            Path::new("/root/snapshots/3/fs"),
            Some(Path::new("/root/snapshots/3/work")),
            &[
                PathBuf::from("/root/snapshots/2/fs"),
                PathBuf::from("/root/snapshots/1/fs"),
            ],
            MountKind::Active,
            &OverlayOptions { fuse: true, ..Default::default() },
        );
        assert_eq!(spec.mount_type, "fuse.overlayfs");
    }
}
