//! Domain primitive types used across the burrow workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::CONTAINER_ID_LEN;
use crate::error::BurrowError;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random ten character lowercase hex ID.
    #[must_use]
    pub fn generate() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self(simple[..CONTAINER_ID_LEN].to_owned())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns at most the first `len` characters, used to derive device names.
    #[must_use]
    pub fn short(&self, len: usize) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(len)
            .map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a container record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The init process is alive.
    Running,
    /// Stopped on request.
    Stopped,
    /// The init process went away on its own.
    Exited,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

impl FromStr for ContainerStatus {
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "exited" => Ok(Self::Exited),
            other => Err(BurrowError::Config {
                message: format!("unknown container status: {other}"),
            }),
        }
    }
}

/// Resource limits requested for a container.
///
/// Values are written verbatim to the controller files; `None` or an empty
/// string leaves that dimension unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit, e.g. `100m`.
    pub memory_limit: Option<String>,
    /// Relative CPU weight, e.g. `512`.
    pub cpu_share: Option<String>,
    /// CPU list, e.g. `0-1`.
    pub cpu_set: Option<String>,
}

impl ResourceConfig {
    /// Returns the memory limit if one was requested.
    #[must_use]
    pub fn memory_limit(&self) -> Option<&str> {
        non_empty(self.memory_limit.as_deref())
    }

    /// Returns the cpu share if one was requested.
    #[must_use]
    pub fn cpu_share(&self) -> Option<&str> {
        non_empty(self.cpu_share.as_deref())
    }

    /// Returns the cpu set if one was requested.
    #[must_use]
    pub fn cpu_set(&self) -> Option<&str> {
        non_empty(self.cpu_set.as_deref())
    }

    /// Returns `true` if no dimension is constrained.
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.memory_limit().is_none() && self.cpu_share().is_none() && self.cpu_set().is_none()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
