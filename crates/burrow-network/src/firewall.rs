//! iptables rules for outbound NAT and inbound port forwarding.
//!
//! Rules are added with `-A` only after `-C` reports them missing, so
//! re-running bridge setup never stacks duplicates.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use burrow_common::error::{BurrowError, Result};
use burrow_core::command::CommandRunner;
use ipnetwork::Ipv4Network;

use crate::model::PortMapping;

const IPTABLES: &str = "iptables";
const IP_FORWARD: &str = "/proc/sys/net/ipv4/ip_forward";

/// What to do with a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    /// `-A`: append.
    Append,
    /// `-C`: check for presence.
    Check,
    /// `-D`: delete.
    Delete,
}

impl RuleOp {
    const fn flag(self) -> &'static str {
        match self {
            Self::Append => "-A",
            Self::Check => "-C",
            Self::Delete => "-D",
        }
    }
}

/// Arguments for the MASQUERADE rule of a bridge network:
/// traffic from `subnet` leaving through any interface but `bridge`.
#[must_use]
pub fn masquerade_args(op: RuleOp, subnet: Ipv4Network, bridge: &str) -> Vec<String> {
    let source = subnet.to_string();
    [
        "-t",
        "nat",
        op.flag(),
        "POSTROUTING",
        "-s",
        source.as_str(),
        "!",
        "-o",
        bridge,
        "-j",
        "MASQUERADE",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

/// Arguments for the DNAT rule forwarding host `mapping.host` to
/// `ip:mapping.container`.
#[must_use]
pub fn dnat_args(op: RuleOp, ip: Ipv4Addr, mapping: PortMapping) -> Vec<String> {
    let dport = mapping.host.to_string();
    let destination = format!("{ip}:{}", mapping.container);
    [
        "-t",
        "nat",
        op.flag(),
        "PREROUTING",
        "-p",
        "tcp",
        "-m",
        "tcp",
        "--dport",
        dport.as_str(),
        "-j",
        "DNAT",
        "--to-destination",
        destination.as_str(),
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

/// Applies NAT rules through the `iptables` binary.
#[derive(Debug, Clone)]
pub struct Firewall {
    runner: CommandRunner,
    ip_forward: PathBuf,
}

impl Firewall {
    /// Creates a firewall manager whose commands are bounded by `runner`.
    #[must_use]
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            ip_forward: PathBuf::from(IP_FORWARD),
        }
    }

    /// Enables IPv4 forwarding in the kernel.
    ///
    /// # Errors
    ///
    /// Returns an error if the sysctl cannot be written.
    pub fn enable_ip_forward(&self) -> Result<()> {
        write_sysctl(&self.ip_forward, "1")?;
        tracing::debug!("IP forwarding enabled");
        Ok(())
    }

    /// Installs the MASQUERADE rule for `subnet` unless it is present.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` fails or times out.
    pub fn ensure_masquerade(&self, subnet: Ipv4Network, bridge: &str) -> Result<()> {
        self.ensure(
            &masquerade_args(RuleOp::Check, subnet, bridge),
            &masquerade_args(RuleOp::Append, subnet, bridge),
        )?;
        tracing::debug!(%subnet, bridge, "masquerade rule in place");
        Ok(())
    }

    /// Removes the MASQUERADE rule for `subnet` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` fails or times out.
    pub fn remove_masquerade(&self, subnet: Ipv4Network, bridge: &str) -> Result<()> {
        self.remove(
            &masquerade_args(RuleOp::Check, subnet, bridge),
            &masquerade_args(RuleOp::Delete, subnet, bridge),
        )
    }

    /// Installs the DNAT rule for one port mapping unless it is present.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` fails or times out.
    pub fn add_port_mapping(&self, ip: Ipv4Addr, mapping: PortMapping) -> Result<()> {
        self.ensure(
            &dnat_args(RuleOp::Check, ip, mapping),
            &dnat_args(RuleOp::Append, ip, mapping),
        )?;
        tracing::info!(%ip, port = %mapping, "port mapping added");
        Ok(())
    }

    /// Removes the DNAT rule for one port mapping if present.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` fails or times out.
    pub fn remove_port_mapping(&self, ip: Ipv4Addr, mapping: PortMapping) -> Result<()> {
        self.remove(
            &dnat_args(RuleOp::Check, ip, mapping),
            &dnat_args(RuleOp::Delete, ip, mapping),
        )
    }

    fn ensure(&self, check: &[String], append: &[String]) -> Result<()> {
        if !self.runner.succeeds(IPTABLES, &as_strs(check))? {
            let _ = self.runner.run(IPTABLES, &as_strs(append))?;
        }
        Ok(())
    }

    fn remove(&self, check: &[String], delete: &[String]) -> Result<()> {
        if self.runner.succeeds(IPTABLES, &as_strs(check))? {
            let _ = self.runner.run(IPTABLES, &as_strs(delete))?;
        }
        Ok(())
    }
}

fn as_strs(args: &[String]) -> Vec<&str> {
    args.iter().map(String::as_str).collect()
}

fn write_sysctl(path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value).map_err(|e| BurrowError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masquerade_rule_excludes_bridge() {
        let args = masquerade_args(RuleOp::Append, "192.168.0.0/24".parse().expect("cidr"), "br0");
        assert_eq!(
            args.join(" "),
            "-t nat -A POSTROUTING -s 192.168.0.0/24 ! -o br0 -j MASQUERADE"
        );
    }

    #[test]
    fn dnat_rule_targets_container() {
        let mapping = PortMapping {
            host: 8080,
            container: 80,
        };
        let args = dnat_args(RuleOp::Delete, Ipv4Addr::new(192, 168, 0, 2), mapping);
        assert_eq!(
            args.join(" "),
            "-t nat -D PREROUTING -p tcp -m tcp --dport 8080 -j DNAT --to-destination 192.168.0.2:80"
        );
    }

    #[test]
    fn check_and_append_differ_only_in_op() {
        let subnet: Ipv4Network = "10.0.0.0/24".parse().expect("cidr");
        let check = masquerade_args(RuleOp::Check, subnet, "b");
        let append = masquerade_args(RuleOp::Append, subnet, "b");
        let diff: Vec<_> = check.iter().zip(&append).filter(|(a, b)| a != b).collect();
        assert_eq!(diff, [(&"-C".to_string(), &"-A".to_string())]);
    }
}
