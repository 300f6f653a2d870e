//! Per-container filesystem workspace.
//!
//! A workspace is the overlay mount that becomes a container's root:
//! the image's shared layer below, a private `upper`/`work` pair above,
//! merged at the container's mount point, plus an optional bind-mounted
//! volume inside it.

use std::path::{Component, Path, PathBuf};

use burrow_common::error::{BurrowError, Result};
use burrow_core::filesystem::{HostMounter, Mounter, OverlayConfig};

use crate::store::ImageStore;

/// A `host:container` volume binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Directory on the host.
    pub host: PathBuf,
    /// Directory inside the container, relative to its root.
    pub container: PathBuf,
}

impl VolumeSpec {
    /// Parses `host:container`. Exactly two non-empty parts are required and
    /// the container side may not climb out of the root with `..`.
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split(':');
        let (Some(host), Some(container), None) = (parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        if host.is_empty() || container.is_empty() {
            return None;
        }
        let container: PathBuf = Path::new(container)
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::CurDir))
            .collect();
        if container.as_os_str().is_empty()
            || container
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return None;
        }
        Some(Self {
            host: PathBuf::from(host),
            container,
        })
    }

    /// Parses an optional volume argument, warning about malformed ones.
    #[must_use]
    pub fn from_arg(volume: Option<&str>) -> Option<Self> {
        let spec = volume.filter(|v| !v.is_empty())?;
        let parsed = Self::parse(spec);
        if parsed.is_none() {
            tracing::warn!(volume = spec, "malformed volume, expected host:container; ignoring");
        }
        parsed
    }

    /// Mount target of this volume under the merged root `mnt`.
    #[must_use]
    pub fn target(&self, mnt: &Path) -> PathBuf {
        mnt.join(&self.container)
    }
}

/// Paths of one container's workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    /// Holds `upper` and `work`.
    pub overlay_dir: PathBuf,
    /// Merged root filesystem.
    pub mnt_dir: PathBuf,
}

impl WorkspacePaths {
    /// Writable upper layer.
    #[must_use]
    pub fn upper_dir(&self) -> PathBuf {
        self.overlay_dir.join("upper")
    }

    /// `OverlayFS` work directory.
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.overlay_dir.join("work")
    }
}

/// Builds and tears down container workspaces.
#[derive(Debug, Clone)]
pub struct Workspace<M = HostMounter> {
    store: ImageStore,
    overlay_root: PathBuf,
    mnt_root: PathBuf,
    mounter: M,
}

impl Workspace<HostMounter> {
    /// Creates a workspace manager over the real mount syscalls.
    #[must_use]
    pub fn new(store: ImageStore, overlay_root: PathBuf, mnt_root: PathBuf) -> Self {
        Self::with_mounter(store, overlay_root, mnt_root, HostMounter)
    }
}

impl<M: Mounter> Workspace<M> {
    /// Creates a workspace manager over an arbitrary [`Mounter`].
    pub fn with_mounter(
        store: ImageStore,
        overlay_root: PathBuf,
        mnt_root: PathBuf,
        mounter: M,
    ) -> Self {
        Self {
            store,
            overlay_root,
            mnt_root,
            mounter,
        }
    }

    /// Returns the mounter in use.
    pub fn mounter(&self) -> &M {
        &self.mounter
    }

    /// Paths of the workspace of container `name`.
    #[must_use]
    pub fn paths(&self, name: &str) -> WorkspacePaths {
        WorkspacePaths {
            overlay_dir: self.overlay_root.join(name),
            mnt_dir: self.mnt_root.join(name),
        }
    }

    /// Assembles the root filesystem of container `name` from `image` and
    /// returns its mount point.
    ///
    /// A malformed `volume` is ignored with a warning. If mounting the
    /// volume fails the overlay is unwound before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::InvalidState`] if a write layer for `name`
    /// already exists, [`BurrowError::NotFound`] if the image is missing,
    /// or the first mount or I/O error.
    pub fn prepare(&self, volume: Option<&str>, image: &str, name: &str) -> Result<PathBuf> {
        let lower = self.store.ensure_layer(image)?;
        let paths = self.paths(name);
        let upper = paths.upper_dir();
        if upper.exists() {
            return Err(BurrowError::InvalidState {
                message: format!("write layer {} already exists", upper.display()),
            });
        }
        for dir in [&upper, &paths.work_dir(), &paths.mnt_dir] {
            std::fs::create_dir_all(dir).map_err(|e| BurrowError::io(dir, e))?;
        }

        let overlay = OverlayConfig {
            lower_dirs: vec![lower],
            upper_dir: upper,
            work_dir: paths.work_dir(),
            merged_dir: paths.mnt_dir.clone(),
        };
        if let Err(e) = self.mounter.mount_overlay(&overlay) {
            self.remove_dirs(&paths);
            return Err(e);
        }

        if let Some(spec) = VolumeSpec::from_arg(volume) {
            if let Err(e) = self.mount_volume(&spec, &paths.mnt_dir) {
                tracing::warn!(name, error = %e, "volume mount failed, unwinding workspace");
                if self.mounter.unmount(&paths.mnt_dir).is_ok() {
                    self.remove_dirs(&paths);
                }
                return Err(e);
            }
        }

        tracing::info!(name, image, mnt = %paths.mnt_dir.display(), "workspace ready");
        Ok(paths.mnt_dir)
    }

    fn mount_volume(&self, spec: &VolumeSpec, mnt: &Path) -> Result<()> {
        let target = spec.target(mnt);
        for dir in [&spec.host, &target] {
            std::fs::create_dir_all(dir).map_err(|e| BurrowError::io(dir, e))?;
        }
        self.mounter.bind(&spec.host, &target)?;
        tracing::info!(host = %spec.host.display(), target = %target.display(), "volume mounted");
        Ok(())
    }

    /// Dismantles the workspace of container `name`.
    ///
    /// The volume is unmounted before the overlay. Directories are removed
    /// only once nothing is mounted on them, so a failed unmount never
    /// deletes through a live mount. The image layer is left in place.
    ///
    /// # Errors
    ///
    /// Returns the first unmount or removal error.
    pub fn teardown(&self, volume: Option<&str>, name: &str) -> Result<()> {
        let paths = self.paths(name);
        if paths.mnt_dir.exists() {
            if let Some(spec) = VolumeSpec::from_arg(volume) {
                let target = spec.target(&paths.mnt_dir);
                if target.exists() {
                    self.mounter.unmount(&target)?;
                }
            }
            self.mounter.unmount(&paths.mnt_dir)?;
            std::fs::remove_dir_all(&paths.mnt_dir)
                .map_err(|e| BurrowError::io(&paths.mnt_dir, e))?;
        }
        if paths.overlay_dir.exists() {
            std::fs::remove_dir_all(&paths.overlay_dir)
                .map_err(|e| BurrowError::io(&paths.overlay_dir, e))?;
        }
        tracing::info!(name, "workspace removed");
        Ok(())
    }

    fn remove_dirs(&self, paths: &WorkspacePaths) {
        for dir in [&paths.mnt_dir, &paths.overlay_dir] {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to remove workspace dir");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Debug, Default)]
    struct RecordingMounter {
        calls: RefCell<Vec<String>>,
        fail_bind: bool,
    }

    impl RecordingMounter {
        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl Mounter for RecordingMounter {
        fn mount_overlay(&self, config: &OverlayConfig) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("overlay {}", config.merged_dir.display()));
            Ok(())
        }

        fn bind(&self, source: &Path, target: &Path) -> Result<()> {
            if self.fail_bind {
                return Err(BurrowError::PermissionDenied {
                    message: "bind refused".into(),
                });
            }
            self.calls
                .borrow_mut()
                .push(format!("bind {} {}", source.display(), target.display()));
            Ok(())
        }

        fn unmount(&self, target: &Path) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("unmount {}", target.display()));
            Ok(())
        }
    }

    fn setup(root: &Path, mounter: RecordingMounter) -> Workspace<RecordingMounter> {
        let store = ImageStore::open(root.join("images"));
        std::fs::create_dir_all(store.layer_path("busybox").join("bin")).expect("layer");
        Workspace::with_mounter(store, root.join("overlay"), root.join("mnt"), mounter)
    }

    #[test]
    fn volume_spec_parsing() {
        let spec = VolumeSpec::parse("/srv/data:/data").expect("valid");
        assert_eq!(spec.host, PathBuf::from("/srv/data"));
        assert_eq!(spec.container, PathBuf::from("data"));
        assert_eq!(spec.target(Path::new("/mnt/c")), PathBuf::from("/mnt/c/data"));

        for bad in ["", "/a", "/a:", ":/b", "/a:/b:/c", "/a:/../etc", "/a:/"] {
            assert!(VolumeSpec::parse(bad).is_none(), "{bad} accepted");
        }
    }

    #[test]
    fn prepare_mounts_overlay_then_volume() {
        let root = tempfile::tempdir().expect("tempdir");
        let ws = setup(root.path(), RecordingMounter::default());
        let host = root.path().join("host-data");
        let volume = format!("{}:/data", host.display());

        let mnt = ws.prepare(Some(&volume), "busybox", "web").expect("prepare");
        assert_eq!(mnt, root.path().join("mnt/web"));
        assert!(root.path().join("overlay/web/upper").is_dir());
        assert!(root.path().join("overlay/web/work").is_dir());
        assert!(host.is_dir());

        let calls = ws.mounter().calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("overlay "));
        assert!(calls[1].starts_with("bind "));
    }

    #[test]
    fn leftover_write_layer_is_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        let ws = setup(root.path(), RecordingMounter::default());
        std::fs::create_dir_all(root.path().join("overlay/web/upper")).expect("leftover");
        let err = ws.prepare(None, "busybox", "web").expect_err("exists");
        assert!(matches!(err, BurrowError::InvalidState { .. }));
        assert!(ws.mounter().calls().is_empty());
    }

    #[test]
    fn malformed_volume_is_ignored() {
        let root = tempfile::tempdir().expect("tempdir");
        let ws = setup(root.path(), RecordingMounter::default());
        let _ = ws
            .prepare(Some("no-colon-here"), "busybox", "web")
            .expect("prepare");
        assert_eq!(ws.mounter().calls().len(), 1);
    }

    #[test]
    fn teardown_unmounts_volume_before_overlay() {
        let root = tempfile::tempdir().expect("tempdir");
        let ws = setup(root.path(), RecordingMounter::default());
        let volume = format!("{}:/data", root.path().join("host").display());
        let mnt = ws.prepare(Some(&volume), "busybox", "web").expect("prepare");

        ws.teardown(Some(&volume), "web").expect("teardown");
        let calls = ws.mounter().calls();
        assert_eq!(calls[2], format!("unmount {}", mnt.join("data").display()));
        assert_eq!(calls[3], format!("unmount {}", mnt.display()));
        assert!(!mnt.exists());
        assert!(!root.path().join("overlay/web").exists());
        assert!(root.path().join("images/busybox").is_dir());
        assert!(root.path().join("host").is_dir());
    }

    #[test]
    fn failed_volume_unwinds_overlay() {
        let root = tempfile::tempdir().expect("tempdir");
        let mounter = RecordingMounter {
            fail_bind: true,
            ..RecordingMounter::default()
        };
        let ws = setup(root.path(), mounter);
        let volume = format!("{}:/data", root.path().join("host").display());
        assert!(ws.prepare(Some(&volume), "busybox", "web").is_err());
        let calls = ws.mounter().calls();
        let expected = format!("unmount {}", root.path().join("mnt/web").display());
        assert_eq!(calls.last(), Some(&expected));
        assert!(!root.path().join("overlay/web").exists());
    }

    #[test]
    fn second_container_reuses_layer() {
        let root = tempfile::tempdir().expect("tempdir");
        let ws = setup(root.path(), RecordingMounter::default());
        let _ = ws.prepare(None, "busybox", "a").expect("a");
        let _ = ws.prepare(None, "busybox", "b").expect("b");
        assert!(root.path().join("overlay/a/upper").is_dir());
        assert!(root.path().join("overlay/b/upper").is_dir());
    }
}
