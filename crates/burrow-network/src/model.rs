//! Network, endpoint, and port mapping types.

use std::fmt;
use std::net::Ipv4Addr;

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::ContainerId;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

/// Longest Linux interface name.
pub const IFNAME_MAX: usize = 15;

/// Characters of the container id used in veth names.
const VETH_ID_LEN: usize = 6;

/// A named virtual network. The name doubles as the bridge device name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Unique network name.
    pub name: String,
    /// Driver that implements the network, e.g. `bridge`.
    pub driver: String,
    /// Address range in CIDR notation.
    pub subnet: Ipv4Network,
    /// Address of the bridge, the first host address of the subnet.
    pub gateway: Ipv4Addr,
}

impl Network {
    /// The gateway with the subnet prefix, as assigned to the bridge.
    #[must_use]
    pub fn gateway_cidr(&self) -> String {
        format!("{}/{}", self.gateway, self.subnet.prefix())
    }

    /// Checks that `name` can serve as both a file name and a device name.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Config`] if the name is empty, longer than an
    /// interface name may be, or contains characters outside
    /// `[A-Za-z0-9_-]`.
    pub fn validate_name(name: &str) -> Result<()> {
        let valid_chars = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if name.is_empty() || name.len() > IFNAME_MAX || !valid_chars {
            return Err(BurrowError::Config {
                message: format!(
                    "invalid network name {name:?}: use up to {IFNAME_MAX} characters from [A-Za-z0-9_-]"
                ),
            });
        }
        Ok(())
    }
}

/// A `host:container` TCP port forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port on the host.
    pub host: u16,
    /// Port inside the container.
    pub container: u16,
}

impl PortMapping {
    /// Parses `host:container`.
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let (host, container) = spec.split_once(':')?;
        Some(Self {
            host: host.trim().parse().ok()?,
            container: container.trim().parse().ok()?,
        })
    }

    /// Parses every spec, warning about and skipping malformed ones.
    #[must_use]
    pub fn parse_all<S: AsRef<str>>(specs: &[S]) -> Vec<Self> {
        specs
            .iter()
            .filter_map(|spec| {
                let spec = spec.as_ref();
                let parsed = Self::parse(spec);
                if parsed.is_none() {
                    tracing::warn!(port = spec, "malformed port mapping, expected host:container; skipping");
                }
                parsed
            })
            .collect()
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// Host-side and container-side names of a veth pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VethPair {
    /// End attached to the bridge.
    pub host: String,
    /// End moved into the container.
    pub peer: String,
}

impl VethPair {
    /// Derives the pair names from a container id.
    #[must_use]
    pub fn for_container(id: &ContainerId) -> Self {
        let short = id.short(VETH_ID_LEN);
        Self {
            host: format!("veth{short}"),
            peer: format!("cif-{short}"),
        }
    }
}

/// A container's connection to a network while it is being set up.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// `<container id>-<network name>`.
    pub id: String,
    /// Veth pair names.
    pub device: VethPair,
    /// Leased address.
    pub ip_address: Ipv4Addr,
    /// MAC address of the container side, once known.
    pub mac_address: Option<String>,
    /// Forwarded ports.
    pub port_mappings: Vec<PortMapping>,
    /// The network joined.
    pub network: Network,
}

impl Endpoint {
    /// Creates an endpoint for container `id` on `network`.
    #[must_use]
    pub fn new(
        id: &ContainerId,
        network: Network,
        ip_address: Ipv4Addr,
        port_mappings: Vec<PortMapping>,
    ) -> Self {
        Self {
            id: format!("{id}-{}", network.name),
            device: VethPair::for_container(id),
            ip_address,
            mac_address: None,
            port_mappings,
            network,
        }
    }

    /// The leased address with the subnet prefix.
    #[must_use]
    pub fn ip_cidr(&self) -> String {
        format!("{}/{}", self.ip_address, self.network.subnet.prefix())
    }

    /// What must be remembered to undo this connection later.
    #[must_use]
    pub fn attachment(&self) -> Attachment {
        Attachment {
            network: self.network.name.clone(),
            ip_address: self.ip_address,
            host_device: self.device.host.clone(),
            port_mappings: self.port_mappings.clone(),
        }
    }
}

/// The persisted record of a container's network connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Network name.
    pub network: String,
    /// Leased address.
    pub ip_address: Ipv4Addr,
    /// Host end of the veth pair.
    pub host_device: String,
    /// Forwarded ports.
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
}
