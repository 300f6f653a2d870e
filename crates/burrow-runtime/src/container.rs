//! The persisted record of a container.

use burrow_common::types::{ContainerId, ContainerStatus};
use burrow_network::Attachment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the runtime remembers about one container.
///
/// The name is the identity key; it doubles as the record directory, the
/// workspace directory, and the cgroup suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Host PID of the container's init process while it runs.
    pub pid: Option<i32>,
    /// Random identifier.
    pub id: ContainerId,
    /// Unique name; defaults to the id.
    pub name: String,
    /// Command line, joined with spaces. Display only.
    pub command: String,
    /// When the container was created.
    pub created_time: DateTime<Utc>,
    /// Lifecycle status.
    pub status: ContainerStatus,
    /// `host:container` volume spec, if one was requested.
    pub volume: Option<String>,
    /// Image the root filesystem was built from.
    #[serde(default)]
    pub image: String,
    /// Network connection to release on removal.
    #[serde(default)]
    pub network: Option<Attachment>,
}

impl ContainerRecord {
    /// A fresh `Running` record for a container just launched as `pid`.
    #[must_use]
    pub fn running(
        id: ContainerId,
        name: &str,
        pid: i32,
        command: &[String],
        volume: Option<&str>,
        image: &str,
    ) -> Self {
        let name = if name.is_empty() { id.as_str() } else { name };
        Self {
            pid: Some(pid),
            name: name.to_owned(),
            id,
            command: command.join(" "),
            created_time: Utc::now(),
            status: ContainerStatus::Running,
            volume: volume.map(str::to_owned),
            image: image.to_owned(),
            network: None,
        }
    }

    /// Returns `true` while the record claims a live process.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    /// Creation time in the listing format.
    #[must_use]
    pub fn created_display(&self) -> String {
        self.created_time
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_falls_back_to_id() {
        let id = ContainerId::new("0123456789");
        let record = ContainerRecord::running(id, "", 42, &["top".into()], None, "busybox");
        assert_eq!(record.name, "0123456789");
        assert_eq!(record.pid, Some(42));
        assert!(record.is_running());
    }

    #[test]
    fn command_is_joined_with_spaces() {
        let record = ContainerRecord::running(
            ContainerId::new("a"),
            "web",
            1,
            &["sh".into(), "-c".into(), "echo hi".into()],
            Some("/data:/data"),
            "busybox",
        );
        assert_eq!(record.command, "sh -c echo hi");
        assert_eq!(record.volume.as_deref(), Some("/data:/data"));
    }

    #[test]
    fn records_without_supplemental_fields_still_parse() {
        let json = r#"{
            "pid": null,
            "id": "abc",
            "name": "old",
            "command": "top",
            "created_time": "2024-01-01T00:00:00Z",
            "status": "stopped",
            "volume": null
        }"#;
        let record: ContainerRecord = serde_json::from_str(json).expect("parse");
        assert_eq!(record.status, ContainerStatus::Stopped);
        assert!(record.image.is_empty());
        assert!(record.network.is_none());
    }
}
