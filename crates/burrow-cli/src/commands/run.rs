//! `burrow run`: create and start a container.

use std::io::Write;

use anyhow::Context;
use burrow_common::types::ResourceConfig;
use burrow_runtime::{Engine, RunOutcome, RunRequest};
use clap::Args;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach the terminal and wait for the command to exit.
    #[arg(short, long, conflicts_with = "detach")]
    pub tty: bool,

    /// Run in the background; output goes to the container log.
    #[arg(short, long)]
    pub detach: bool,

    /// Memory limit, as accepted by `memory.limit_in_bytes` (e.g. `100m`).
    #[arg(short, long)]
    pub memory: Option<String>,

    /// Relative CPU weight (`cpu.shares`).
    #[arg(long)]
    pub cpu_share: Option<String>,

    /// CPUs the container may run on (`cpuset.cpus`, e.g. `0-1`).
    #[arg(long)]
    pub cpu_set: Option<String>,

    /// Container name; defaults to the generated id.
    #[arg(long)]
    pub name: Option<String>,

    /// Bind mount, as `HOST_DIR:CONTAINER_DIR`.
    #[arg(short, long)]
    pub volume: Option<String>,

    /// Environment variable, as `KEY=VALUE`. Repeatable.
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Network to connect the container to.
    #[arg(long)]
    pub network: Option<String>,

    /// Forward a host TCP port, as `HOST:CONTAINER`. Repeatable.
    #[arg(short, long, value_name = "HOST:CONTAINER")]
    pub publish: Vec<String>,

    /// Image to run.
    pub image: String,

    /// Command and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Converts the parsed flags into an engine request.
    #[must_use]
    pub fn into_request(self) -> RunRequest {
        RunRequest {
            tty: self.tty,
            detach: self.detach,
            resources: ResourceConfig {
                memory_limit: self.memory,
                cpu_share: self.cpu_share,
                cpu_set: self.cpu_set,
            },
            name: self.name,
            volume: self.volume,
            env: self.env,
            network: self.network,
            publish: self.publish,
            image: self.image,
            command: self.command,
        }
    }
}

/// Executes the `run` command.
///
/// A detached container prints its id. An interactive one exits the CLI with
/// the container's exit code.
///
/// # Errors
///
/// Returns an error if the container cannot be set up.
pub fn execute(engine: &Engine, args: RunArgs) -> anyhow::Result<()> {
    let request = args.into_request();
    match engine.run(&request).context("failed to run container")? {
        RunOutcome::Detached(record) => {
            let mut out = std::io::stdout().lock();
            writeln!(out, "{}", record.id)?;
            Ok(())
        }
        RunOutcome::Exited(0) => Ok(()),
        RunOutcome::Exited(code) => std::process::exit(code),
    }
}
