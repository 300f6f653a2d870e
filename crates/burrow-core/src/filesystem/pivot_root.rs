//! Root filesystem switching via `pivot_root(2)`.
//!
//! Unlike `chroot`, this moves the old root out of the mount namespace
//! entirely so it can be detached.

use std::path::Path;

use burrow_common::error::{BurrowError, Result};
use nix::mount::{MntFlags, MsFlags, mount, umount2};

const PUT_OLD: &str = ".pivot_root";

/// Makes `new_root` the root of the calling mount namespace.
///
/// The sequence is: make `/` recursively private so nothing propagates
/// back to the host, bind `new_root` onto itself (`pivot_root` needs a
/// mount point), pivot with the old root parked in `.pivot_root`, then
/// detach and remove the old root.
///
/// # Errors
///
/// Returns an error if any step fails. The namespace is left half switched
/// in that case and the caller is expected to abort.
pub fn switch_root(new_root: &Path) -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| BurrowError::syscall("make / private", e))?;

    mount(
        Some(new_root),
        new_root,
        Some("bind"),
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| BurrowError::syscall(format!("bind {} onto itself", new_root.display()), e))?;

    let put_old = new_root.join(PUT_OLD);
    if !put_old.exists() {
        std::fs::create_dir(&put_old).map_err(|e| BurrowError::io(&put_old, e))?;
    }

    nix::unistd::pivot_root(new_root, &put_old)
        .map_err(|e| BurrowError::syscall("pivot_root", e))?;
    nix::unistd::chdir("/").map_err(|e| BurrowError::syscall("chdir /", e))?;

    let old_root = Path::new("/").join(PUT_OLD);
    umount2(&old_root, MntFlags::MNT_DETACH)
        .map_err(|e| BurrowError::syscall("detach old root", e))?;
    std::fs::remove_dir(&old_root).map_err(|e| BurrowError::io(&old_root, e))?;

    tracing::debug!(new_root = %new_root.display(), "root switched");
    Ok(())
}

/// Switches to `new_root` and mounts `/proc` and `/dev` inside it.
///
/// # Errors
///
/// Returns an error if the root switch or either mount fails.
pub fn setup_rootfs(new_root: &Path) -> Result<()> {
    switch_root(new_root)?;
    super::mount::mount_essential_filesystems()
}
