//! # burrow
//!
//! A minimal daemon-less container runtime for a single Linux host.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

mod commands;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    // A re-executed exec helper must join the container's namespaces while
    // still single-threaded, before anything else runs.
    if let Some(code) = burrow_runtime::exec::enter_if_requested()? {
        std::process::exit(code);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::execute(cli)
}
