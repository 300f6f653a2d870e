//! `burrow rm`: remove a stopped container.

use std::io::Write;

use burrow_runtime::Engine;
use clap::Args;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the container is running or a resource cannot be
/// released.
pub fn execute(engine: &Engine, args: &RmArgs) -> anyhow::Result<()> {
    engine.remove(&args.container)?;
    writeln!(std::io::stdout().lock(), "{}", args.container)?;
    Ok(())
}
