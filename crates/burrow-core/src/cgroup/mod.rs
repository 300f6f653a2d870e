//! Cgroup v1 resource management.
//!
//! Each controller is mounted as its own hierarchy. A container gets one
//! group under every mounted controller, named `burrow-<container name>`,
//! placed directly under the controller's mount point. Limits are written
//! only for the controllers a config constrains.

pub mod cpu;
pub mod cpuset;
pub mod memory;
pub mod mountinfo;
pub mod subsystem;

use std::path::{Path, PathBuf};

use burrow_common::constants::CGROUP_PREFIX;
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::ResourceConfig;

pub use mountinfo::MountTable;
pub use subsystem::Subsystem;

/// Writes `value` into the control file `file` of `group`.
pub(crate) fn write_control(group: &Path, file: &str, value: &str) -> Result<()> {
    let path = group.join(file);
    std::fs::write(&path, value).map_err(|e| BurrowError::io(path, e))
}

/// Handle to the cgroups of one container.
#[derive(Debug)]
pub struct CgroupManager {
    group: String,
    table: MountTable,
}

impl CgroupManager {
    /// Creates a manager for container `name`, reading controller mount
    /// points from `mountinfo` once.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    pub fn new(name: &str, mountinfo: &Path) -> Result<Self> {
        Ok(Self::with_table(name, MountTable::load(mountinfo)?))
    }

    /// Creates a manager over an already parsed mount table.
    #[must_use]
    pub fn with_table(name: &str, table: MountTable) -> Self {
        Self {
            group: format!("{CGROUP_PREFIX}-{name}"),
            table,
        }
    }

    /// Name of the group directory under every controller.
    #[must_use]
    pub fn group_name(&self) -> &str {
        &self.group
    }

    /// Group directory of `subsystem`, or `None` if the controller is not mounted.
    #[must_use]
    pub fn group_path(&self, subsystem: Subsystem) -> Option<PathBuf> {
        self.table
            .mount_point(subsystem.name())
            .map(|mp| mp.join(&self.group))
    }

    /// Creates the group under every mounted controller and writes the
    /// limits `config` requests.
    ///
    /// A controller that is not mounted is an error only when a limit was
    /// requested for it.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] if a constrained controller is not
    /// mounted, or an I/O error if a group or control file cannot be written.
    pub fn set(&self, config: &ResourceConfig) -> Result<()> {
        for subsystem in Subsystem::ALL {
            let requested = subsystem.requested(config);
            let Some(group) = self.ensure_group(subsystem)? else {
                if requested.is_some() {
                    return Err(BurrowError::NotFound {
                        kind: "cgroup controller",
                        id: subsystem.name().into(),
                    });
                }
                continue;
            };
            if let Some(value) = requested {
                subsystem.set_limit(&group, config)?;
                tracing::info!(subsystem = %subsystem, group = %group.display(), value, "cgroup limit set");
            }
        }
        Ok(())
    }

    /// Enrolls `pid` into the group under every mounted controller,
    /// creating groups that do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a group or `tasks` file cannot be written.
    pub fn apply(&self, pid: i32) -> Result<()> {
        for subsystem in Subsystem::ALL {
            match self.ensure_group(subsystem)? {
                Some(group) => subsystem.enroll(&group, pid)?,
                None => tracing::warn!(subsystem = %subsystem, "controller not mounted, skipping"),
            }
        }
        Ok(())
    }

    /// Creates the group directory of `subsystem`. `None` if the controller
    /// is not mounted.
    fn ensure_group(&self, subsystem: Subsystem) -> Result<Option<PathBuf>> {
        let Some(group) = self.group_path(subsystem) else {
            return Ok(None);
        };
        std::fs::create_dir_all(&group).map_err(|e| BurrowError::io(&group, e))?;
        if subsystem == Subsystem::CpuSet {
            inherit_cpuset(&group)?;
        }
        Ok(Some(group))
    }

    /// Removes every group this container has. Not retried.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing group cannot be removed, typically
    /// because tasks are still attached.
    pub fn destroy(&self) -> Result<()> {
        for subsystem in Subsystem::ALL {
            if let Some(group) = self.group_path(subsystem) {
                subsystem.remove(&group)?;
            }
        }
        tracing::info!(group = %self.group, "cgroups destroyed");
        Ok(())
    }
}

/// A fresh cpuset group refuses tasks until `cpuset.cpus` and
/// `cpuset.mems` are populated; copy the parent's values into empty ones.
fn inherit_cpuset(group: &Path) -> Result<()> {
    let Some(parent) = group.parent() else {
        return Ok(());
    };
    for file in [cpuset::CPUS_FILE, cpuset::MEMS_FILE] {
        let Ok(inherited) = std::fs::read_to_string(parent.join(file)) else {
            continue;
        };
        let current = std::fs::read_to_string(group.join(file)).unwrap_or_default();
        if current.trim().is_empty() && !inherited.trim().is_empty() {
            write_control(group, file, inherited.trim())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_hierarchy(root: &Path) -> MountTable {
        let mut lines = String::new();
        for (i, name) in ["memory", "cpu", "cpuset"].iter().enumerate() {
            let mp = root.join(name);
            std::fs::create_dir_all(&mp).expect("mkdir controller");
            lines.push_str(&format!(
                "{i} 1 0:{i} / {} rw,nosuid - cgroup cgroup rw,{name}\n",
                mp.display()
            ));
        }
        MountTable::parse(&lines)
    }

    fn clear_files(dir: &Path) {
        for entry in std::fs::read_dir(dir).expect("read_dir") {
            std::fs::remove_file(entry.expect("entry").path()).expect("remove file");
        }
    }

    #[test]
    fn memory_only_config_writes_only_the_memory_limit() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager = CgroupManager::with_table("web", fake_hierarchy(root.path()));
        let config = ResourceConfig {
            memory_limit: Some("100m".into()),
            ..ResourceConfig::default()
        };
        manager.set(&config).expect("set");

        let mem = root.path().join("memory/burrow-web");
        assert_eq!(
            std::fs::read_to_string(mem.join(memory::LIMIT_FILE)).expect("read"),
            "100m"
        );
        let cpu = root.path().join("cpu/burrow-web");
        let cpuset = root.path().join("cpuset/burrow-web");
        assert!(cpu.is_dir() && cpuset.is_dir());
        assert!(!cpu.join(cpu::SHARES_FILE).exists());
        assert!(!cpuset.join(cpuset::CPUS_FILE).exists());
    }

    #[test]
    fn memory_only_config_still_enrolls_into_every_controller() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager = CgroupManager::with_table("solo", fake_hierarchy(root.path()));
        let config = ResourceConfig {
            memory_limit: Some("32m".into()),
            ..ResourceConfig::default()
        };
        manager.set(&config).expect("set");
        manager.apply(4242).expect("apply");

        for name in ["memory", "cpu", "cpuset"] {
            let tasks = root.path().join(name).join("burrow-solo").join("tasks");
            assert_eq!(std::fs::read_to_string(tasks).expect("tasks"), "4242");
        }
    }

    #[test]
    fn apply_without_set_creates_groups() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager = CgroupManager::with_table("bare", fake_hierarchy(root.path()));
        manager.apply(7).expect("apply");
        for name in ["memory", "cpu", "cpuset"] {
            let tasks = root.path().join(name).join("burrow-bare").join("tasks");
            assert_eq!(std::fs::read_to_string(tasks).expect("tasks"), "7");
        }
    }

    #[test]
    fn unconstrained_cpuset_inherits_parent_cpus() {
        let root = tempfile::tempdir().expect("tempdir");
        let table = fake_hierarchy(root.path());
        std::fs::write(root.path().join("cpuset/cpuset.cpus"), "0-3\n").expect("cpus");
        let manager = CgroupManager::with_table("any", table);
        manager.set(&ResourceConfig::default()).expect("set");
        let group = root.path().join("cpuset/burrow-any");
        assert_eq!(std::fs::read_to_string(group.join("cpuset.cpus")).expect("read"), "0-3");
    }

    #[test]
    fn apply_enrolls_into_every_group() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager = CgroupManager::with_table("db", fake_hierarchy(root.path()));
        let config = ResourceConfig {
            memory_limit: Some("64m".into()),
            cpu_share: Some("512".into()),
            cpu_set: Some("0".into()),
        };
        manager.set(&config).expect("set");
        manager.apply(4242).expect("apply");

        for name in ["memory", "cpu", "cpuset"] {
            let tasks = root.path().join(name).join("burrow-db").join("tasks");
            assert_eq!(std::fs::read_to_string(tasks).expect("tasks"), "4242");
        }
    }

    #[test]
    fn cpuset_inherits_parent_mems() {
        let root = tempfile::tempdir().expect("tempdir");
        let table = fake_hierarchy(root.path());
        std::fs::write(root.path().join("cpuset/cpuset.mems"), "0\n").expect("mems");
        let manager = CgroupManager::with_table("c", table);
        let config = ResourceConfig {
            cpu_set: Some("0-1".into()),
            ..ResourceConfig::default()
        };
        manager.set(&config).expect("set");
        let group = root.path().join("cpuset/burrow-c");
        assert_eq!(std::fs::read_to_string(group.join("cpuset.mems")).expect("read"), "0");
        assert_eq!(std::fs::read_to_string(group.join("cpuset.cpus")).expect("read"), "0-1");
    }

    #[test]
    fn destroy_removes_every_group() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager = CgroupManager::with_table("gone", fake_hierarchy(root.path()));
        let config = ResourceConfig {
            memory_limit: Some("64m".into()),
            cpu_share: Some("256".into()),
            cpu_set: None,
        };
        manager.set(&config).expect("set");
        // cgroupfs drops control files with the directory; a plain tree does not.
        for name in ["memory", "cpu", "cpuset"] {
            clear_files(&root.path().join(name).join("burrow-gone"));
        }
        manager.destroy().expect("destroy");
        for name in ["memory", "cpu", "cpuset"] {
            assert!(!root.path().join(name).join("burrow-gone").exists());
        }
    }

    #[test]
    fn missing_controller_fails_only_when_requested() {
        let manager = CgroupManager::with_table("x", MountTable::default());
        manager.set(&ResourceConfig::default()).expect("nothing requested");
        let err = manager
            .set(&ResourceConfig {
                cpu_share: Some("512".into()),
                ..ResourceConfig::default()
            })
            .expect_err("cpu not mounted");
        assert!(err.is_not_found());
        manager.apply(1).expect("apply skips unmounted controllers");
    }
}
