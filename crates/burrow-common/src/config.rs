//! Runtime configuration and the on-disk layout derived from it.
//!
//! Every path the runtime touches is computed here so that tests can point
//! the whole tree at a temporary directory.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_COMMAND_TIMEOUT, DEFAULT_DATA_DIR, DEFAULT_MOUNTINFO,
    DEFAULT_STATE_DIR, DEFAULT_STOP_GRACE, IPAM_FILE_NAME, LOG_FILE_NAME,
};

/// Root configuration for the burrow runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Volatile state: container records, logs, networks, address pools.
    pub state_dir: PathBuf,
    /// Persistent data: images, overlay layers, mount points.
    pub data_dir: PathBuf,
    /// Mount table scanned for cgroup controllers.
    pub mountinfo: PathBuf,
    /// Upper bound on each external `ip`/`iptables` invocation.
    pub command_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL on stop.
    pub stop_grace: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            mountinfo: PathBuf::from(DEFAULT_MOUNTINFO),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

impl RuntimeConfig {
    /// Creates a configuration rooted at the given state and data directories.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Directory holding one subdirectory per container record.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.state_dir.join("containers")
    }

    /// Metadata directory of the container `name`.
    #[must_use]
    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.containers_dir().join(name)
    }

    /// Metadata record of the container `name`.
    #[must_use]
    pub fn config_file(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(CONFIG_FILE_NAME)
    }

    /// Captured stdout of the detached container `name`.
    #[must_use]
    pub fn log_file(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(LOG_FILE_NAME)
    }

    /// Image store directory.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    /// Parent of every container's overlay state (`<name>/upper`, `<name>/work`).
    #[must_use]
    pub fn overlay_root(&self) -> PathBuf {
        self.data_dir.join("overlay")
    }

    /// Parent of every container's merged root filesystem.
    #[must_use]
    pub fn mnt_root(&self) -> PathBuf {
        self.data_dir.join("mnt")
    }

    /// Directory holding one JSON file per network.
    #[must_use]
    pub fn networks_dir(&self) -> PathBuf {
        self.state_dir.join("network").join("networks")
    }

    /// Persisted subnet allocation document.
    #[must_use]
    pub fn ipam_file(&self) -> PathBuf {
        self.state_dir
            .join("network")
            .join("ipam")
            .join(IPAM_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_system_dirs() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.state_dir, PathBuf::from("/var/run/burrow"));
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/burrow"));
        assert_eq!(cfg.command_timeout, Duration::from_secs(30));
    }

    #[test]
    fn layout_is_derived_from_roots() {
        let cfg = RuntimeConfig::new("/s", "/d");
        assert_eq!(
            cfg.config_file("web"),
            PathBuf::from("/s/containers/web/config.json")
        );
        assert_eq!(
            cfg.log_file("web"),
            PathBuf::from("/s/containers/web/container.log")
        );
        assert_eq!(cfg.images_dir(), PathBuf::from("/d/images"));
        assert_eq!(cfg.mnt_root(), PathBuf::from("/d/mnt"));
        assert_eq!(cfg.overlay_root(), PathBuf::from("/d/overlay"));
        assert_eq!(cfg.ipam_file(), PathBuf::from("/s/network/ipam/subnet.json"));
        assert_eq!(cfg.networks_dir(), PathBuf::from("/s/network/networks"));
    }
}
