//! Persistent container records.
//!
//! Each container owns `<state_dir>/containers/<name>/`, holding its
//! `config.json` and, for detached containers, `container.log`. There is no
//! daemon and no index file: listing scans the directory.

use std::path::{Path, PathBuf};

use burrow_common::config::RuntimeConfig;
use burrow_common::constants::CONFIG_FILE_NAME;
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::{ContainerId, ContainerStatus};
use burrow_network::Attachment;

use crate::container::ContainerRecord;

/// Reads and writes container records.
#[derive(Debug, Clone)]
pub struct ContainerRegistry {
    root: PathBuf,
}

impl ContainerRegistry {
    /// Opens the registry under `config.state_dir`.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self::at(config.containers_dir())
    }

    /// Opens a registry rooted at `root`.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory of the record `name`.
    #[must_use]
    pub fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir(name).join(CONFIG_FILE_NAME)
    }

    /// Records a freshly launched container under a generated id. An empty
    /// `name` becomes the id.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is unusable or the record cannot be
    /// written.
    pub fn record(
        &self,
        pid: i32,
        command: &[String],
        name: &str,
        volume: Option<&str>,
        image: &str,
    ) -> Result<ContainerRecord> {
        self.record_with_id(ContainerId::generate(), pid, command, name, volume, image)
    }

    /// Like [`record`](Self::record) with a caller-chosen id. A record of the
    /// same name is overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is unusable or the record cannot be
    /// written.
    pub fn record_with_id(
        &self,
        id: ContainerId,
        pid: i32,
        command: &[String],
        name: &str,
        volume: Option<&str>,
        image: &str,
    ) -> Result<ContainerRecord> {
        let record = ContainerRecord::running(id, name, pid, command, volume, image);
        validate_name(&record.name)?;
        self.save(&record)?;
        tracing::info!(name = %record.name, id = %record.id, pid, "container recorded");
        Ok(record)
    }

    /// Returns `true` if a record named `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.file(name).is_file()
    }

    /// Loads the record `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] if there is no such record, or an
    /// error if it cannot be parsed.
    pub fn get(&self, name: &str) -> Result<ContainerRecord> {
        let path = self.file(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BurrowError::NotFound {
                kind: "container",
                id: name.to_owned(),
            }),
            Err(e) => Err(BurrowError::io(path, e)),
        }
    }

    /// Every readable record, oldest first. Entries that cannot be read or
    /// parsed are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error only if the records directory exists but cannot be
    /// listed.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BurrowError::io(&self.root, e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BurrowError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.get(&name) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(container = %name, error = %e, "skipping unreadable record"),
            }
        }
        records.sort_by(|a, b| {
            a.created_time
                .cmp(&b.created_time)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(records)
    }

    /// Updates the status and pid of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown record, or an error
    /// if it cannot be rewritten.
    pub fn set_status(
        &self,
        name: &str,
        status: ContainerStatus,
        pid: Option<i32>,
    ) -> Result<ContainerRecord> {
        let mut record = self.get(name)?;
        record.status = status;
        record.pid = pid;
        self.save(&record)?;
        tracing::debug!(container = name, %status, "status updated");
        Ok(record)
    }

    /// Stores or clears the network attachment of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown record, or an error
    /// if it cannot be rewritten.
    pub fn set_network(&self, name: &str, attachment: Option<Attachment>) -> Result<()> {
        let mut record = self.get(name)?;
        record.network = attachment;
        self.save(&record)
    }

    /// Deletes the record `name` along with its log. Deleting a missing
    /// record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn delete(&self, name: &str) -> Result<()> {
        let dir = self.dir(name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(container = name, "record deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BurrowError::io(dir, e)),
        }
    }

    fn save(&self, record: &ContainerRecord) -> Result<()> {
        let dir = self.dir(&record.name);
        std::fs::create_dir_all(&dir).map_err(|e| BurrowError::io(&dir, e))?;
        let path = dir.join(CONFIG_FILE_NAME);
        write_atomic(&path, &serde_json::to_vec_pretty(record)?)
    }
}

/// Checks that `name` is usable as a single path component.
///
/// # Errors
///
/// Returns [`BurrowError::Config`] for an empty name, `.` or `..`, or a
/// name containing `/` or NUL.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(BurrowError::Config {
            message: format!("invalid container name {name:?}"),
        });
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).map_err(|e| BurrowError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| BurrowError::io(path, e))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn registry() -> (tempfile::TempDir, ContainerRegistry) {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ContainerRegistry::at(dir.path().join("containers"));
        (dir, registry)
    }

    fn cmd(args: &[&str]) -> Vec<String> {
        args.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn empty_name_is_replaced_by_id() {
        let (_dir, reg) = registry();
        let record = reg.record(7, &cmd(&["top"]), "", None, "busybox").expect("record");
        assert_eq!(record.name, record.id.as_str());
        assert_eq!(record.id.as_str().len(), 10);
        assert_eq!(reg.get(&record.name).expect("get"), record);
    }

    #[test]
    fn list_omits_deleted_records() {
        let (_dir, reg) = registry();
        let _ = reg.record(1, &cmd(&["a"]), "one", None, "img").expect("one");
        let _ = reg.record(2, &cmd(&["b"]), "two", None, "img").expect("two");
        reg.delete("one").expect("delete");
        reg.delete("one").expect("second delete is a no-op");

        let names: Vec<_> = reg.list().expect("list").into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["two"]);
        assert!(reg.get("one").expect_err("gone").is_not_found());
    }

    #[test]
    fn corrupt_record_does_not_abort_listing() {
        let (_dir, reg) = registry();
        let _ = reg.record(1, &cmd(&["a"]), "good", None, "img").expect("good");
        let bad = reg.dir("bad");
        std::fs::create_dir_all(&bad).expect("mkdir");
        std::fs::write(bad.join(CONFIG_FILE_NAME), "{ nope").expect("write");
        std::fs::create_dir_all(reg.dir("empty")).expect("mkdir");

        let records = reg.list().expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "good");
    }

    #[test]
    fn missing_root_lists_nothing() {
        let (_dir, reg) = registry();
        assert!(reg.list().expect("list").is_empty());
    }

    #[test]
    fn status_and_network_updates_persist() {
        let (_dir, reg) = registry();
        let _ = reg.record(99, &cmd(&["sleep", "1"]), "web", None, "img").expect("record");

        let stopped = reg
            .set_status("web", ContainerStatus::Stopped, None)
            .expect("stop");
        assert_eq!(stopped.pid, None);

        let attachment = Attachment {
            network: "testnet".into(),
            ip_address: Ipv4Addr::new(10, 0, 0, 2),
            host_device: "vethabcdef".into(),
            port_mappings: Vec::new(),
        };
        reg.set_network("web", Some(attachment.clone())).expect("network");

        let loaded = reg.get("web").expect("get");
        assert_eq!(loaded.status, ContainerStatus::Stopped);
        assert_eq!(loaded.network, Some(attachment));
        assert!(reg
            .set_status("ghost", ContainerStatus::Exited, None)
            .expect_err("unknown")
            .is_not_found());
    }

    #[test]
    fn same_name_overwrites() {
        let (_dir, reg) = registry();
        let first = reg.record(1, &cmd(&["a"]), "dup", None, "img").expect("first");
        let second = reg.record(2, &cmd(&["b"]), "dup", None, "img").expect("second");
        assert_ne!(first.id, second.id);
        assert_eq!(reg.get("dup").expect("get").pid, Some(2));
    }

    #[test]
    fn unusable_names_are_rejected() {
        let (_dir, reg) = registry();
        for bad in ["..", "a/b", "."] {
            assert!(reg.record(1, &cmd(&["a"]), bad, None, "img").is_err(), "{bad}");
        }
    }
}
