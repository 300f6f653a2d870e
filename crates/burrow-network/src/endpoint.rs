//! Container-side endpoint configuration.

use std::path::Path;

use burrow_common::error::Result;
use burrow_core::command::CommandRunner;
use burrow_core::namespace::Namespace;
use burrow_core::namespace::network::run_in_netns;

use crate::model::Endpoint;

/// Moves the endpoint's peer device into the network namespace of `pid`
/// and configures it there: address, link up, loopback up, and a default
/// route through the gateway. Records the peer's MAC address on success.
///
/// The namespace switch happens on a scoped worker thread, so the caller
/// stays in the host namespace whatever the outcome.
///
/// # Errors
///
/// Returns the first failing command or namespace error.
pub fn configure_in_namespace(
    runner: &CommandRunner,
    endpoint: &mut Endpoint,
    pid: i32,
) -> Result<()> {
    let peer = endpoint.device.peer.clone();
    let pid_str = pid.to_string();
    let _ = runner.run("ip", &["link", "set", peer.as_str(), "netns", pid_str.as_str()])?;

    let ns = Namespace::Net.path(pid);
    let ip_cidr = endpoint.ip_cidr();
    let gateway = endpoint.network.gateway.to_string();
    let mac = run_in_netns(Path::new(&ns), || {
        let _ = runner.run("ip", &["addr", "add", ip_cidr.as_str(), "dev", peer.as_str()])?;
        let _ = runner.run("ip", &["link", "set", peer.as_str(), "up"])?;
        let _ = runner.run("ip", &["link", "set", "lo", "up"])?;
        let _ = runner.run(
            "ip",
            &["route", "add", "default", "via", gateway.as_str(), "dev", peer.as_str()],
        )?;
        let link = runner.run("ip", &["-o", "link", "show", peer.as_str()])?;
        Ok(parse_mac(&link))
    })?;

    tracing::info!(
        endpoint = %endpoint.id,
        ip = %ip_cidr,
        mac = mac.as_deref().unwrap_or("-"),
        pid,
        "endpoint configured"
    );
    endpoint.mac_address = mac;
    Ok(())
}

/// Extracts the address following `link/ether` in `ip -o link` output.
fn parse_mac(output: &str) -> Option<String> {
    let mut words = output.split_whitespace();
    let _ = words.find(|w| *w == "link/ether")?;
    words.next().map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_is_read_from_link_output() {
        let line = "7: cif-abcde@if8: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue \
                    state UP mode DEFAULT group default qlen 1000\\    link/ether 6e:1f:22:aa:bb:cc \
                    brd ff:ff:ff:ff:ff:ff link-netnsid 0";
        assert_eq!(parse_mac(line).as_deref(), Some("6e:1f:22:aa:bb:cc"));
        assert_eq!(parse_mac("1: lo: <LOOPBACK> link/loopback 00:00"), None);
    }
}
