//! Mount utilities for container filesystem setup.
//!
//! Host-side mounts go through the [`Mounter`] trait so that the order of
//! mount and unmount calls can be observed without privileges. Child-side
//! mounts (`/proc`, `/dev`) call `mount(2)` directly.

use std::path::Path;

use burrow_common::error::{BurrowError, Result};
use nix::mount::{MntFlags, MsFlags, mount, umount2};

use super::overlayfs::OverlayConfig;

/// The host-side mount operations a container workspace needs.
pub trait Mounter {
    /// Mounts an overlay filesystem described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn mount_overlay(&self, config: &OverlayConfig) -> Result<()>;

    /// Bind-mounts `source` onto `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn bind(&self, source: &Path, target: &Path) -> Result<()>;

    /// Detaches whatever is mounted at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails.
    fn unmount(&self, target: &Path) -> Result<()>;
}

/// [`Mounter`] backed by the real `mount(2)` and `umount2(2)` syscalls.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostMounter;

impl Mounter for HostMounter {
    fn mount_overlay(&self, config: &OverlayConfig) -> Result<()> {
        super::overlayfs::mount_overlay(config)
    }

    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        bind_mount(source, target)
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        umount2(target, MntFlags::MNT_DETACH)
            .map_err(|e| BurrowError::syscall(format!("unmount {}", target.display()), e))?;
        tracing::debug!(target = %target.display(), "unmounted");
        Ok(())
    }
}

/// Creates a recursive bind mount from `source` to `target`.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| {
        BurrowError::syscall(
            format!("bind mount {} -> {}", source.display(), target.display()),
            e,
        )
    })?;
    tracing::debug!(source = %source.display(), target = %target.display(), "bind mounted");
    Ok(())
}

/// Mounts `proc` at `/proc` and a `tmpfs` at `/dev` inside the new root.
///
/// Must run after the root switch, in the container's mount namespace.
///
/// # Errors
///
/// Returns an error if either mount fails.
pub fn mount_essential_filesystems() -> Result<()> {
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| BurrowError::syscall("mount /proc", e))?;

    mount(
        Some("tmpfs"),
        "/dev",
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| BurrowError::syscall("mount /dev", e))?;

    tracing::debug!("mounted /proc and /dev");
    Ok(())
}
