//! The set of networks known to the runtime.
//!
//! Networks persist as one JSON file each. A registry is built explicitly
//! with [`NetworkRegistry::load`], which scans that directory; it owns the
//! address allocator and hands each operation to the network's driver.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use burrow_common::config::RuntimeConfig;
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::ContainerId;
use burrow_core::command::CommandRunner;
use ipnetwork::Ipv4Network;

use crate::bridge::NetworkDriver;
use crate::endpoint;
use crate::ipam::Ipam;
use crate::model::{Attachment, Endpoint, Network, PortMapping};

/// Networks, their drivers, and the shared address allocator.
#[derive(Debug)]
pub struct NetworkRegistry {
    dir: PathBuf,
    networks: BTreeMap<String, Network>,
    ipam: Ipam,
    runner: CommandRunner,
}

impl NetworkRegistry {
    /// Loads every network persisted under the configured state directory.
    /// Unreadable files are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be listed.
    pub fn load(config: &RuntimeConfig) -> Result<Self> {
        let dir = config.networks_dir();
        let mut networks = BTreeMap::new();
        match std::fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries {
                    let path = entry.map_err(|e| BurrowError::io(&dir, e))?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    match read_network(&path) {
                        Ok(network) => {
                            let _ = networks.insert(network.name.clone(), network);
                        }
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable network");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BurrowError::io(&dir, e)),
        }
        tracing::debug!(count = networks.len(), "networks loaded");
        Ok(Self {
            dir,
            networks,
            ipam: Ipam::new(config.ipam_file()),
            runner: CommandRunner::new(config.command_timeout),
        })
    }

    /// The address allocator.
    #[must_use]
    pub const fn ipam(&self) -> &Ipam {
        &self.ipam
    }

    /// Every network, sorted by name.
    pub fn list(&self) -> impl Iterator<Item = &Network> {
        self.networks.values()
    }

    /// Looks up a network by name.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown name.
    pub fn get(&self, name: &str) -> Result<&Network> {
        self.networks.get(name).ok_or_else(|| BurrowError::NotFound {
            kind: "network",
            id: name.to_owned(),
        })
    }

    fn driver(&self, network: &Network) -> Result<NetworkDriver> {
        NetworkDriver::by_name(&network.driver, self.runner)
    }

    /// Creates network `name` over `subnet` with the driver `driver`.
    ///
    /// The subnet is registered first, so its gateway is known when the
    /// driver builds the bridge. If the driver fails the subnet is released
    /// again.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Config`] for a bad name or subnet,
    /// [`BurrowError::InvalidState`] if the name is taken or the subnet
    /// overlaps another, [`BurrowError::NotFound`] for an unknown driver, or
    /// the driver's error.
    pub fn create(&mut self, name: &str, driver: &str, subnet: &str) -> Result<Network> {
        Network::validate_name(name)?;
        if self.networks.contains_key(name) {
            return Err(BurrowError::InvalidState {
                message: format!("network {name} already exists"),
            });
        }
        let subnet: Ipv4Network = subnet.parse().map_err(|e| BurrowError::Config {
            message: format!("invalid subnet {subnet:?}: {e}"),
        })?;
        let driver = NetworkDriver::by_name(driver, self.runner)?;

        let gateway = self.ipam.create_subnet(subnet)?;
        let network = Network {
            name: name.to_owned(),
            driver: driver.name().to_owned(),
            subnet: Ipv4Network::new(subnet.network(), subnet.prefix()).unwrap_or(subnet),
            gateway,
        };
        if let Err(e) = driver.create(&network).and_then(|()| self.save(&network)) {
            if let Err(cleanup) = self.ipam.delete_subnet(network.subnet) {
                tracing::warn!(subnet = %network.subnet, error = %cleanup, "failed to release subnet");
            }
            return Err(e);
        }

        let _ = self.networks.insert(network.name.clone(), network.clone());
        tracing::info!(network = name, subnet = %network.subnet, gateway = %gateway, "network created");
        Ok(network)
    }

    /// Removes network `name`: its NAT rule, its bridge, its subnet, and its
    /// file, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown name,
    /// [`BurrowError::InvalidState`] while containers hold addresses in it,
    /// or the first failing step.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let network = self.get(name)?.clone();
        let leased = match self.ipam.leased(network.subnet) {
            Ok(n) => n,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        };
        if leased > 0 {
            return Err(BurrowError::InvalidState {
                message: format!("network {name} still has {leased} connected container(s)"),
            });
        }

        let driver = self.driver(&network)?;
        driver
            .firewall()
            .remove_masquerade(network.subnet, &network.name)?;
        driver.delete(&network)?;
        match self.ipam.delete_subnet(network.subnet) {
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        let path = self.file(name);
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(BurrowError::io(path, e));
            }
            _ => {}
        }
        let _ = self.networks.remove(name);
        tracing::info!(network = name, "network removed");
        Ok(())
    }

    /// Connects the container `id`, whose init process is `pid`, to network
    /// `name`: leases an address, creates the veth pair, configures it inside
    /// the container, and installs the port mappings.
    ///
    /// On failure the address is released and the host veth deleted.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown network,
    /// [`BurrowError::AddressExhausted`] when the subnet is full, or the
    /// first failing step.
    pub fn connect(
        &self,
        name: &str,
        id: &ContainerId,
        pid: i32,
        port_mappings: Vec<PortMapping>,
    ) -> Result<Endpoint> {
        let network = self.get(name)?.clone();
        let driver = self.driver(&network)?;
        let ip = self.ipam.allocate(network.subnet)?;
        let mut endpoint = Endpoint::new(id, network, ip, port_mappings);

        let wired = driver
            .connect(&endpoint.network, &endpoint)
            .and_then(|()| endpoint::configure_in_namespace(&self.runner, &mut endpoint, pid))
            .and_then(|()| {
                endpoint
                    .port_mappings
                    .iter()
                    .try_for_each(|m| driver.firewall().add_port_mapping(ip, *m))
            });
        if let Err(e) = wired {
            self.release(&driver, &endpoint.attachment(), &endpoint.network);
            return Err(e);
        }
        Ok(endpoint)
    }

    /// Undoes [`connect`](Self::connect) for a persisted attachment. Each
    /// step is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] if the network no longer exists.
    pub fn disconnect(&self, attachment: &Attachment) -> Result<()> {
        let network = self.get(&attachment.network)?.clone();
        let driver = self.driver(&network)?;
        self.release(&driver, attachment, &network);
        tracing::info!(network = %attachment.network, ip = %attachment.ip_address, "endpoint disconnected");
        Ok(())
    }

    fn release(&self, driver: &NetworkDriver, attachment: &Attachment, network: &Network) {
        for mapping in &attachment.port_mappings {
            if let Err(e) = driver
                .firewall()
                .remove_port_mapping(attachment.ip_address, *mapping)
            {
                tracing::warn!(port = %mapping, error = %e, "failed to remove port mapping");
            }
        }
        if let Err(e) = driver.disconnect(&attachment.host_device) {
            tracing::warn!(device = %attachment.host_device, error = %e, "failed to delete veth");
        }
        if let Err(e) = self.ipam.release(network.subnet, attachment.ip_address) {
            tracing::warn!(ip = %attachment.ip_address, error = %e, "failed to release address");
        }
    }

    /// Recreates the bridges of persisted networks whose devices are gone.
    /// Failures are logged per network and do not stop the others.
    pub fn recover_all(&self) {
        for network in self.networks.values() {
            let recovered = self
                .driver(network)
                .and_then(|driver| driver.recover(network));
            if let Err(e) = recovered {
                tracing::warn!(network = %network.name, error = %e, "failed to recover network");
            }
        }
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn save(&self, network: &Network) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| BurrowError::io(&self.dir, e))?;
        let path = self.file(&network.name);
        let json = serde_json::to_string_pretty(network)?;
        std::fs::write(&path, json).map_err(|e| BurrowError::io(path, e))
    }
}

fn read_network(path: &Path) -> Result<Network> {
    let content = std::fs::read_to_string(path).map_err(|e| BurrowError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn config(root: &Path) -> RuntimeConfig {
        RuntimeConfig::new(root.join("state"), root.join("data"))
    }

    fn persist(config: &RuntimeConfig, network: &Network) {
        let dir = config.networks_dir();
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(
            dir.join(format!("{}.json", network.name)),
            serde_json::to_string(network).expect("json"),
        )
        .expect("write");
    }

    fn sample() -> Network {
        Network {
            name: "testnet".into(),
            driver: "bridge".into(),
            subnet: "10.20.0.0/24".parse().expect("cidr"),
            gateway: Ipv4Addr::new(10, 20, 0, 1),
        }
    }

    #[test]
    fn load_scans_directory_and_skips_garbage() {
        let root = tempfile::tempdir().expect("tempdir");
        let cfg = config(root.path());
        persist(&cfg, &sample());
        std::fs::write(cfg.networks_dir().join("broken.json"), "{not json").expect("write");
        std::fs::write(cfg.networks_dir().join("notes.txt"), "ignored").expect("write");

        let registry = NetworkRegistry::load(&cfg).expect("load");
        let names: Vec<_> = registry.list().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["testnet"]);
        assert_eq!(registry.get("testnet").expect("get"), &sample());
    }

    #[test]
    fn empty_state_loads_empty_registry() {
        let root = tempfile::tempdir().expect("tempdir");
        let registry = NetworkRegistry::load(&config(root.path())).expect("load");
        assert_eq!(registry.list().count(), 0);
        assert!(registry.get("nope").expect_err("missing").is_not_found());
    }

    #[test]
    fn create_validates_before_touching_the_host() {
        let root = tempfile::tempdir().expect("tempdir");
        let cfg = config(root.path());
        persist(&cfg, &sample());
        let mut registry = NetworkRegistry::load(&cfg).expect("load");

        assert!(matches!(
            registry.create("testnet", "bridge", "10.30.0.0/24"),
            Err(BurrowError::InvalidState { .. })
        ));
        assert!(matches!(
            registry.create("other", "bridge", "not-a-cidr"),
            Err(BurrowError::Config { .. })
        ));
        assert!(matches!(
            registry.create("bad/name", "bridge", "10.30.0.0/24"),
            Err(BurrowError::Config { .. })
        ));
        assert!(registry
            .create("other", "macvlan", "10.30.0.0/24")
            .expect_err("driver")
            .is_not_found());
        assert!(!cfg.ipam_file().exists());
    }

    #[test]
    fn remove_refuses_while_addresses_are_leased() {
        let root = tempfile::tempdir().expect("tempdir");
        let cfg = config(root.path());
        let network = sample();
        persist(&cfg, &network);
        let mut registry = NetworkRegistry::load(&cfg).expect("load");
        let _ = registry.ipam().create_subnet(network.subnet).expect("subnet");
        let _ = registry.ipam().allocate(network.subnet).expect("lease");

        let err = registry.remove("testnet").expect_err("leased");
        assert!(matches!(err, BurrowError::InvalidState { .. }));
        assert!(registry.get("testnet").is_ok());
        assert!(registry.remove("ghost").expect_err("unknown").is_not_found());
    }
}
