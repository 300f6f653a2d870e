//! Discovery of cgroup v1 controller mount points.
//!
//! Each controller hierarchy shows up in `/proc/self/mountinfo` as a line
//! whose super-block options name the controller, e.g.
//! `34 25 0:30 / /sys/fs/cgroup/memory rw,nosuid - cgroup cgroup rw,memory`.

use std::path::{Path, PathBuf};

use burrow_common::error::{BurrowError, Result};

/// Parsed view of the cgroup entries of a mount table.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<CgroupMount>,
}

#[derive(Debug, Clone)]
struct CgroupMount {
    mount_point: PathBuf,
    options: Vec<String>,
}

impl MountTable {
    /// Reads and parses the mount table at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BurrowError::io(path, e))?;
        Ok(Self::parse(&content))
    }

    /// Parses mount table text, keeping only lines with super-block options.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| {
                let fields: Vec<&str> = line.split_whitespace().collect();
                let mount_point = fields.get(4)?;
                let options = fields.last()?;
                Some(CgroupMount {
                    mount_point: PathBuf::from(mount_point),
                    options: options.split(',').map(str::to_owned).collect(),
                })
            })
            .collect();
        Self { entries }
    }

    /// Returns the mount point whose options contain exactly `controller`.
    #[must_use]
    pub fn mount_point(&self, controller: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|m| m.options.iter().any(|o| o == controller))
            .map(|m| m.mount_point.as_path())
    }
}
