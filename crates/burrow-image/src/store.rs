//! Local image store.
//!
//! Layout under the images directory:
//! - `<image>.tar`: the archive, supplied by the user or produced by commit.
//! - `<image>/`: the read-only layer unpacked from it on first use.

use std::path::{Path, PathBuf};

use burrow_common::constants::IMAGE_ARCHIVE_EXTENSION;
use burrow_common::error::{BurrowError, Result};

use crate::layer;

/// An image archive present in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Image name (archive file stem).
    pub name: String,
    /// Archive size in bytes.
    pub size_bytes: u64,
    /// Whether the read-only layer has been unpacked.
    pub extracted: bool,
}

/// Manages image archives and their unpacked layers.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    /// Opens the store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root storage path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the archive for `image`.
    #[must_use]
    pub fn archive_path(&self, image: &str) -> PathBuf {
        self.root
            .join(format!("{image}.{IMAGE_ARCHIVE_EXTENSION}"))
    }

    /// Path of the unpacked layer for `image`.
    #[must_use]
    pub fn layer_path(&self, image: &str) -> PathBuf {
        self.root.join(image)
    }

    /// Checks whether the layer for `image` is already unpacked.
    #[must_use]
    pub fn has_layer(&self, image: &str) -> bool {
        self.layer_path(image).is_dir()
    }

    /// Returns the unpacked layer for `image`, extracting the archive first
    /// if the layer does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Config`] for an unusable image name,
    /// [`BurrowError::NotFound`] if neither layer nor archive exists, or an
    /// extraction error.
    pub fn ensure_layer(&self, image: &str) -> Result<PathBuf> {
        validate_name(image)?;
        let layer_path = self.layer_path(image);
        if layer_path.is_dir() {
            tracing::debug!(image, "layer already unpacked");
            return Ok(layer_path);
        }
        let archive = self.archive_path(image);
        if !archive.is_file() {
            return Err(BurrowError::NotFound {
                kind: "image",
                id: image.to_owned(),
            });
        }
        Ok(layer::extract_layer(&archive, &layer_path)?.path)
    }

    /// Lists every archive in the store, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory exists but cannot be read.
    pub fn list(&self) -> Result<Vec<ImageInfo>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BurrowError::io(&self.root, e)),
        };
        let mut images = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BurrowError::io(&self.root, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(IMAGE_ARCHIVE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            images.push(ImageInfo {
                name: name.to_owned(),
                size_bytes,
                extracted: self.has_layer(name),
            });
        }
        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }
}

/// Image names become file names; refuse anything that could escape the store.
///
/// # Errors
///
/// Returns [`BurrowError::Config`] if the name is empty, hidden, or contains
/// a path separator.
pub fn validate_name(image: &str) -> Result<()> {
    if image.is_empty()
        || image.starts_with('.')
        || image.contains('/')
        || image.contains('\0')
    {
        return Err(BurrowError::Config {
            message: format!("invalid image name: {image:?}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_archive(store: &ImageStore, image: &str) {
        std::fs::create_dir_all(store.root()).expect("mkdir");
        let file = std::fs::File::create(store.archive_path(image)).expect("create");
        let mut builder = tar::Builder::new(file);
        let data = b"#!/bin/sh\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "bin/sh", &data[..])
            .expect("append");
        builder.finish().expect("finish");
    }

    #[test]
    fn archive_and_layer_paths() {
        let store = ImageStore::open("/data/images");
        assert_eq!(store.archive_path("busybox"), PathBuf::from("/data/images/busybox.tar"));
        assert_eq!(store.layer_path("busybox"), PathBuf::from("/data/images/busybox"));
    }

    #[test]
    fn layer_is_extracted_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::open(dir.path().join("images"));
        write_archive(&store, "busybox");

        let first = store.ensure_layer("busybox").expect("first");
        assert!(first.join("bin/sh").exists());

        // Without the archive a second extraction would fail.
        std::fs::remove_file(store.archive_path("busybox")).expect("rm archive");
        let second = store.ensure_layer("busybox").expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn missing_image_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::open(dir.path());
        let err = store.ensure_layer("nope").expect_err("missing");
        assert!(err.is_not_found());
    }

    #[test]
    fn hostile_names_are_rejected() {
        for name in ["", "../etc", "a/b", ".hidden"] {
            assert!(validate_name(name).is_err(), "{name} accepted");
        }
        assert!(validate_name("busybox").is_ok());
    }

    #[test]
    fn list_reports_archives() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::open(dir.path().join("images"));
        assert!(store.list().expect("empty").is_empty());

        write_archive(&store, "b");
        write_archive(&store, "a");
        let _ = store.ensure_layer("b").expect("extract");

        let images = store.list().expect("list");
        let names: Vec<_> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(!images[0].extracted);
        assert!(images[1].extracted);
    }
}
