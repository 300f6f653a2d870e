//! Linux bridge network driver.
//!
//! Each network is one bridge device carrying the gateway address. Outbound
//! container traffic is masqueraded; containers attach through veth pairs
//! whose host end is enslaved to the bridge.

use std::path::PathBuf;

use burrow_common::constants::BRIDGE_DRIVER;
use burrow_common::error::{BurrowError, Result};
use burrow_core::command::CommandRunner;

use crate::firewall::Firewall;
use crate::model::{Endpoint, Network};

const IP: &str = "ip";
const SYS_CLASS_NET: &str = "/sys/class/net";
const IFF_UP: u32 = 0x1;

/// State of a network interface on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No such interface.
    Missing,
    /// Present but administratively down.
    Down,
    /// Present and up.
    Up,
}

/// Reads interface state from sysfs.
#[derive(Debug, Clone)]
pub struct LinkProbe {
    root: PathBuf,
}

impl Default for LinkProbe {
    fn default() -> Self {
        Self::new(SYS_CLASS_NET)
    }
}

impl LinkProbe {
    /// Creates a probe over a sysfs `class/net` directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the state of interface `name`.
    #[must_use]
    pub fn state(&self, name: &str) -> LinkState {
        let dir = self.root.join(name);
        if !dir.exists() {
            return LinkState::Missing;
        }
        let flags = std::fs::read_to_string(dir.join("flags"))
            .ok()
            .and_then(|raw| u32::from_str_radix(raw.trim().trim_start_matches("0x"), 16).ok())
            .unwrap_or(0);
        if flags & IFF_UP == 0 {
            LinkState::Down
        } else {
            LinkState::Up
        }
    }
}

/// Drives bridge networks with the `ip` tool and iptables.
#[derive(Debug, Clone)]
pub struct BridgeDriver {
    runner: CommandRunner,
    firewall: Firewall,
    probe: LinkProbe,
}

impl BridgeDriver {
    /// Creates a driver whose commands are bounded by `runner`.
    #[must_use]
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            firewall: Firewall::new(runner),
            probe: LinkProbe::default(),
        }
    }

    /// The firewall used for NAT rules.
    #[must_use]
    pub const fn firewall(&self) -> &Firewall {
        &self.firewall
    }

    /// Creates and configures the bridge for `network`.
    ///
    /// An existing bridge that is down is reused; one that is up is taken
    /// to belong to someone else.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::InvalidState`] if an interface with the
    /// network's name is already up, or the first failing command.
    pub fn create(&self, network: &Network) -> Result<()> {
        if self.probe.state(&network.name) == LinkState::Up {
            return Err(BurrowError::InvalidState {
                message: format!("interface {} already exists and is up", network.name),
            });
        }
        self.init_bridge(network)
    }

    /// Brings back the bridge of a persisted network if its device is gone,
    /// e.g. after a reboot. Address leases are not touched.
    ///
    /// # Errors
    ///
    /// Returns the first failing command.
    pub fn recover(&self, network: &Network) -> Result<()> {
        if self.probe.state(&network.name) != LinkState::Missing {
            tracing::debug!(network = %network.name, "bridge present, nothing to recover");
            return Ok(());
        }
        tracing::info!(network = %network.name, "recreating missing bridge");
        self.init_bridge(network)
    }

    fn init_bridge(&self, network: &Network) -> Result<()> {
        let name = network.name.as_str();
        if self.probe.state(name) == LinkState::Missing {
            self.ip(&["link", "add", "name", name, "type", "bridge"])?;
        }
        let gateway = network.gateway_cidr();
        self.ip(&["addr", "replace", gateway.as_str(), "dev", name])?;
        self.ip(&["link", "set", name, "up"])?;
        self.firewall.enable_ip_forward()?;
        self.firewall.ensure_masquerade(network.subnet, name)?;
        tracing::info!(bridge = name, %gateway, "bridge ready");
        Ok(())
    }

    /// Deletes the bridge device of `network`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device exists and cannot be deleted.
    pub fn delete(&self, network: &Network) -> Result<()> {
        if self.probe.state(&network.name) != LinkState::Missing {
            self.ip(&["link", "del", network.name.as_str()])?;
        }
        tracing::info!(bridge = %network.name, "bridge deleted");
        Ok(())
    }

    /// Creates the endpoint's veth pair and plugs the host end into the
    /// bridge. The peer stays on the host until it is moved into a
    /// container.
    ///
    /// # Errors
    ///
    /// Returns the first failing command.
    pub fn connect(&self, network: &Network, endpoint: &Endpoint) -> Result<()> {
        let host = endpoint.device.host.as_str();
        let peer = endpoint.device.peer.as_str();
        self.ip(&["link", "add", host, "type", "veth", "peer", "name", peer])?;
        self.ip(&["link", "set", host, "master", network.name.as_str()])?;
        self.ip(&["link", "set", host, "up"])?;
        tracing::debug!(host, peer, bridge = %network.name, "veth attached");
        Ok(())
    }

    /// Deletes the host end of a veth pair if it still exists. The kernel
    /// already removes the pair when the container's namespace goes away.
    ///
    /// # Errors
    ///
    /// Returns an error if the device exists and cannot be deleted.
    pub fn disconnect(&self, host_device: &str) -> Result<()> {
        if self.probe.state(host_device) != LinkState::Missing {
            self.ip(&["link", "del", host_device])?;
        }
        Ok(())
    }

    fn ip(&self, args: &[&str]) -> Result<()> {
        let _ = self.runner.run(IP, args)?;
        Ok(())
    }
}

/// The closed set of network drivers.
#[derive(Debug, Clone)]
pub enum NetworkDriver {
    /// Linux bridge with NAT.
    Bridge(BridgeDriver),
}

impl NetworkDriver {
    /// Selects a driver by name.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown driver name.
    pub fn by_name(name: &str, runner: CommandRunner) -> Result<Self> {
        match name {
            BRIDGE_DRIVER => Ok(Self::Bridge(BridgeDriver::new(runner))),
            other => Err(BurrowError::NotFound {
                kind: "network driver",
                id: other.to_owned(),
            }),
        }
    }

    /// Driver name as stored in network records.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bridge(_) => BRIDGE_DRIVER,
        }
    }

    /// See [`BridgeDriver::create`].
    ///
    /// # Errors
    ///
    /// Propagates the driver's error.
    pub fn create(&self, network: &Network) -> Result<()> {
        match self {
            Self::Bridge(driver) => driver.create(network),
        }
    }

    /// See [`BridgeDriver::delete`].
    ///
    /// # Errors
    ///
    /// Propagates the driver's error.
    pub fn delete(&self, network: &Network) -> Result<()> {
        match self {
            Self::Bridge(driver) => driver.delete(network),
        }
    }

    /// See [`BridgeDriver::connect`].
    ///
    /// # Errors
    ///
    /// Propagates the driver's error.
    pub fn connect(&self, network: &Network, endpoint: &Endpoint) -> Result<()> {
        match self {
            Self::Bridge(driver) => driver.connect(network, endpoint),
        }
    }

    /// See [`BridgeDriver::disconnect`].
    ///
    /// # Errors
    ///
    /// Propagates the driver's error.
    pub fn disconnect(&self, host_device: &str) -> Result<()> {
        match self {
            Self::Bridge(driver) => driver.disconnect(host_device),
        }
    }

    /// See [`BridgeDriver::recover`].
    ///
    /// # Errors
    ///
    /// Propagates the driver's error.
    pub fn recover(&self, network: &Network) -> Result<()> {
        match self {
            Self::Bridge(driver) => driver.recover(network),
        }
    }

    /// Firewall used for NAT and port forwarding.
    #[must_use]
    pub const fn firewall(&self) -> &Firewall {
        match self {
            Self::Bridge(driver) => driver.firewall(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn probe_reads_sysfs_flags() {
        let dir = tempfile::tempdir().expect("tempdir");
        let up = dir.path().join("br-up");
        let down = dir.path().join("br-down");
        std::fs::create_dir_all(&up).expect("mkdir");
        std::fs::create_dir_all(&down).expect("mkdir");
        std::fs::write(up.join("flags"), "0x1003\n").expect("flags");
        std::fs::write(down.join("flags"), "0x1002\n").expect("flags");

        let probe = LinkProbe::new(dir.path());
        assert_eq!(probe.state("br-up"), LinkState::Up);
        assert_eq!(probe.state("br-down"), LinkState::Down);
        assert_eq!(probe.state("absent"), LinkState::Missing);
    }

    #[test]
    fn driver_lookup_by_name() {
        let runner = CommandRunner::new(Duration::from_secs(1));
        let driver = NetworkDriver::by_name("bridge", runner).expect("bridge");
        assert_eq!(driver.name(), "bridge");
        assert!(NetworkDriver::by_name("overlay", runner)
            .expect_err("unknown")
            .is_not_found());
    }
}
