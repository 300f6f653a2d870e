//! The closed set of resource controllers the runtime drives.

use std::path::Path;

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::ResourceConfig;

use super::{cpu, cpuset, memory, write_control};

/// File listing the tasks (thread ids) that belong to a group.
pub const TASKS_FILE: &str = "tasks";

/// A cgroup v1 controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// `memory` controller.
    Memory,
    /// `cpu` controller, driven through `cpu.shares`.
    CpuShare,
    /// `cpuset` controller.
    CpuSet,
}

impl Subsystem {
    /// Every controller, in the order they are configured.
    pub const ALL: [Self; 3] = [Self::Memory, Self::CpuShare, Self::CpuSet];

    /// Controller name as it appears in mount options.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::CpuShare => "cpu",
            Self::CpuSet => "cpuset",
        }
    }

    /// Returns the limit `config` requests for this controller.
    #[must_use]
    pub fn requested(self, config: &ResourceConfig) -> Option<&str> {
        match self {
            Self::Memory => config.memory_limit(),
            Self::CpuShare => config.cpu_share(),
            Self::CpuSet => config.cpu_set(),
        }
    }

    /// Writes the limit requested by `config` into `group`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the control file cannot be written.
    pub fn set_limit(self, group: &Path, config: &ResourceConfig) -> Result<()> {
        let Some(value) = self.requested(config) else {
            return Ok(());
        };
        match self {
            Self::Memory => memory::set_limit(group, value),
            Self::CpuShare => cpu::set_shares(group, value),
            Self::CpuSet => cpuset::set_cpus(group, value),
        }
    }

    /// Moves `pid` into `group`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `tasks` file cannot be written.
    pub fn enroll(self, group: &Path, pid: i32) -> Result<()> {
        write_control(group, TASKS_FILE, &pid.to_string())?;
        tracing::debug!(subsystem = self.name(), pid, "process enrolled");
        Ok(())
    }

    /// Removes `group`. Missing groups are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists and cannot be removed.
    pub fn remove(self, group: &Path) -> Result<()> {
        match std::fs::remove_dir(group) {
            Ok(()) => {
                tracing::debug!(subsystem = self.name(), group = %group.display(), "cgroup removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BurrowError::io(group, e)),
        }
    }
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_requested_limit_is_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ResourceConfig {
            memory_limit: Some("100m".into()),
            ..ResourceConfig::default()
        };
        Subsystem::Memory
            .set_limit(dir.path(), &config)
            .expect("memory");
        Subsystem::CpuShare
            .set_limit(dir.path(), &config)
            .expect("cpu");
        let written = std::fs::read_to_string(dir.path().join(memory::LIMIT_FILE)).expect("read");
        assert_eq!(written, "100m");
        assert!(!dir.path().join(cpu::SHARES_FILE).exists());
    }

    #[test]
    fn remove_tolerates_missing_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        Subsystem::CpuSet
            .remove(&dir.path().join("gone"))
            .expect("missing group is fine");
    }
}
