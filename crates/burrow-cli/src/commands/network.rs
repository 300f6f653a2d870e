//! `burrow network`: manage container networks.

use std::io::Write;

use anyhow::Context;
use burrow_common::constants::BRIDGE_DRIVER;
use burrow_runtime::Engine;
use clap::{Args, Subcommand};

use crate::output::Table;

/// Network subcommands.
#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Create a network.
    Create(CreateArgs),
    /// List networks.
    Ls,
    /// Remove a network with no connected containers.
    Rm {
        /// Network name.
        name: String,
    },
}

/// Arguments for `network create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Address range in CIDR notation, e.g. `192.168.10.0/24`.
    #[arg(long)]
    pub subnet: String,

    /// Network driver.
    #[arg(long, default_value = BRIDGE_DRIVER)]
    pub driver: String,

    /// Network name; also the bridge device name.
    pub name: String,
}

/// Executes a `network` subcommand.
///
/// # Errors
///
/// Returns an error if the network operation fails.
pub fn execute(engine: &Engine, command: NetworkCommand) -> anyhow::Result<()> {
    let mut networks = engine.networks()?;
    let mut out = std::io::stdout().lock();
    match command {
        NetworkCommand::Create(args) => {
            let network = networks
                .create(&args.name, &args.driver, &args.subnet)
                .with_context(|| format!("failed to create network {}", args.name))?;
            writeln!(out, "{}", network.name)?;
        }
        NetworkCommand::Ls => {
            let mut table = Table::new(&["NAME", "DRIVER", "SUBNET", "GATEWAY"]);
            for network in networks.list() {
                table.row(vec![
                    network.name.clone(),
                    network.driver.clone(),
                    network.subnet.to_string(),
                    network.gateway.to_string(),
                ]);
            }
            table.render(&mut out)?;
        }
        NetworkCommand::Rm { name } => {
            networks
                .remove(&name)
                .with_context(|| format!("failed to remove network {name}"))?;
            writeln!(out, "{name}")?;
        }
    }
    Ok(())
}
