//! `burrow logs`: print a container's output.

use std::io::Write;

use burrow_runtime::Engine;
use clap::Args;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container name.
    pub container: String,

    /// Follow log output until the container stops.
    #[arg(short, long)]
    pub follow: bool,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container is not found or its log is unreadable.
pub fn execute(engine: &Engine, args: &LogsArgs) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    if args.follow {
        engine.follow_logs(&args.container, &mut out)?;
    } else {
        let logs = engine.logs(&args.container)?;
        out.write_all(logs.as_bytes())?;
    }
    Ok(())
}
