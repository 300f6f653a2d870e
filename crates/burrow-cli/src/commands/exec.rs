//! `burrow exec`: execute a command inside a running container.

use anyhow::Context;
use burrow_runtime::Engine;
use clap::Args;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container name.
    pub container: String,

    /// Command to execute.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command.
///
/// Joins the target container's namespaces and runs the command with the
/// terminal attached, then exits with its status.
///
/// # Errors
///
/// Returns an error if the container is not running or namespace joining fails.
pub fn execute(engine: &Engine, args: &ExecArgs) -> anyhow::Result<()> {
    let code = engine
        .exec(&args.container, &args.command)
        .with_context(|| format!("failed to exec in {}", args.container))?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
