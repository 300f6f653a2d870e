//! Committing a container filesystem back into an image archive.

use std::fs::File;
use std::path::{Path, PathBuf};

use burrow_common::error::{BurrowError, Result};

/// Archives the tree at `rootfs` into a plain tar at `archive`.
///
/// Symlinks are stored as links, not followed. The archive is written to a
/// temporary sibling and renamed, so an existing image is only replaced by
/// a complete one. Returns the archive size in bytes.
///
/// # Errors
///
/// Returns an error if `rootfs` is not a directory or if writing the
/// archive fails.
pub fn commit(rootfs: &Path, archive: &Path) -> Result<u64> {
    if !rootfs.is_dir() {
        return Err(BurrowError::NotFound {
            kind: "root filesystem",
            id: rootfs.display().to_string(),
        });
    }
    if let Some(parent) = archive.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BurrowError::io(parent, e))?;
    }

    let partial = partial_path(archive);
    let written = write_tar(rootfs, &partial);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }
    std::fs::rename(&partial, archive).map_err(|e| BurrowError::io(archive, e))?;

    let size = std::fs::metadata(archive)
        .map_err(|e| BurrowError::io(archive, e))?
        .len();
    tracing::info!(rootfs = %rootfs.display(), archive = %archive.display(), size, "image committed");
    Ok(size)
}

fn write_tar(rootfs: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest).map_err(|e| BurrowError::io(dest, e))?;
    let mut builder = tar::Builder::new(file);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", rootfs)
        .map_err(|e| BurrowError::io(rootfs, e))?;
    let file = builder.into_inner().map_err(|e| BurrowError::io(dest, e))?;
    file.sync_all().map_err(|e| BurrowError::io(dest, e))
}

fn partial_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}
