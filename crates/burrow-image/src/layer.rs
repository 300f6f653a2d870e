//! Read-only layer extraction.
//!
//! An image archive is unpacked once into a shared directory that every
//! container started from the image uses as its overlay lower layer.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use burrow_common::error::{BurrowError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A layer unpacked on disk.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Directory holding the unpacked tree.
    pub path: PathBuf,
    /// Size of the archive it was unpacked from, in bytes.
    pub size_bytes: u64,
}

/// Extracts a tar archive into `target`.
///
/// Plain and gzip-compressed archives are both accepted; compression is
/// detected from the file header, not the extension. The tree is unpacked
/// into a sibling staging directory and renamed into place, so `target`
/// either does not exist or holds a complete layer.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or unpacked, or if the
/// staging directory cannot be moved into place.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<Layer> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting layer"
    );

    let file = File::open(archive_path).map_err(|e| BurrowError::io(archive_path, e))?;
    let size_bytes = file
        .metadata()
        .map_err(|e| BurrowError::io(archive_path, e))?
        .len();

    let staging = staging_dir(target);
    if staging.exists() {
        std::fs::remove_dir_all(&staging).map_err(|e| BurrowError::io(&staging, e))?;
    }
    std::fs::create_dir_all(&staging).map_err(|e| BurrowError::io(&staging, e))?;

    let unpacked = if is_gzip(archive_path)? {
        tar::Archive::new(flate2::read::GzDecoder::new(file)).unpack(&staging)
    } else {
        tar::Archive::new(file).unpack(&staging)
    };
    if let Err(e) = unpacked {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(BurrowError::io(archive_path, e));
    }

    std::fs::rename(&staging, target).map_err(|e| BurrowError::io(target, e))?;
    tracing::info!(target = %target.display(), size = size_bytes, "layer extracted");

    Ok(Layer {
        path: target.to_path_buf(),
        size_bytes,
    })
}

fn staging_dir(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.partial"))
}

/// Determines whether the archive is gzip-compressed from its magic bytes.
fn is_gzip(path: &Path) -> Result<bool> {
    let mut magic = [0_u8; 2];
    let mut file = File::open(path).map_err(|e| BurrowError::io(path, e))?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(BurrowError::io(path, e)),
    }
}
