//! `burrow stop`: stop a running container.

use std::io::Write;

use burrow_runtime::Engine;
use clap::Args;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `stop` command.
///
/// Sends SIGTERM, waits out the grace period, then sends SIGKILL. The
/// container's resources stay allocated until `burrow rm`.
///
/// # Errors
///
/// Returns an error if the container is unknown, not running, or cannot be
/// signalled.
pub fn execute(engine: &Engine, args: &StopArgs) -> anyhow::Result<()> {
    let record = engine.stop(&args.container)?;
    writeln!(std::io::stdout().lock(), "{}", record.name)?;
    Ok(())
}
