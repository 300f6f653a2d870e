//! CLI command definitions and dispatch.

pub mod commit;
pub mod exec;
pub mod images;
pub mod init;
pub mod logs;
pub mod network;
pub mod ps;
pub mod rm;
pub mod run;
pub mod stop;

use std::path::PathBuf;

use burrow_common::config::RuntimeConfig;
use burrow_common::constants::{DEFAULT_DATA_DIR, DEFAULT_STATE_DIR};
use burrow_runtime::Engine;
use clap::{Parser, Subcommand};

/// burrow: a minimal daemon-less container runtime.
#[derive(Parser, Debug)]
#[command(name = "burrow", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory for container records, logs, and network state.
    #[arg(long, global = true, env = "BURROW_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// Directory for images, overlay layers, and mount points.
    #[arg(long, global = true, env = "BURROW_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,
}

impl Cli {
    /// Runtime configuration selected by the global flags.
    #[must_use]
    pub fn config(&self) -> RuntimeConfig {
        RuntimeConfig::new(&self.state_dir, &self.data_dir)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and start a container.
    Run(run::RunArgs),
    /// Container-side setup; invoked by `run`, never by hand.
    #[command(hide = true)]
    Init,
    /// Execute a command inside a running container.
    Exec(exec::ExecArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Print a container's output.
    Logs(logs::LogsArgs),
    /// Stop a running container.
    Stop(stop::StopArgs),
    /// Remove a stopped container and release its resources.
    Rm(rm::RmArgs),
    /// Save a container's filesystem as an image.
    Commit(commit::CommitArgs),
    /// List local images.
    Images,
    /// Manage container networks.
    #[command(subcommand)]
    Network(network::NetworkCommand),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let engine = Engine::new(cli.config());
    match cli.command {
        Command::Run(args) => run::execute(&engine, args),
        Command::Init => init::execute(),
        Command::Exec(args) => exec::execute(&engine, &args),
        Command::Ps(args) => ps::execute(&engine, &args),
        Command::Logs(args) => logs::execute(&engine, &args),
        Command::Stop(args) => stop::execute(&engine, &args),
        Command::Rm(args) => rm::execute(&engine, &args),
        Command::Commit(args) => commit::execute(&engine, &args),
        Command::Images => images::execute(&engine),
        Command::Network(command) => network::execute(&engine, command),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_keeps_command_flags_for_the_container() {
        let cli = Cli::try_parse_from([
            "burrow", "run", "-d", "--name", "web", "-e", "A=1", "-p", "8080:80", "busybox", "sh",
            "-c", "echo hi",
        ])
        .expect("parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let request = args.into_request();
        assert!(request.detach);
        assert_eq!(request.name.as_deref(), Some("web"));
        assert_eq!(request.image, "busybox");
        assert_eq!(request.command, ["sh", "-c", "echo hi"]);
        assert_eq!(request.env, ["A=1"]);
        assert_eq!(request.publish, ["8080:80"]);
    }

    #[test]
    fn tty_and_detach_conflict_at_parse_time() {
        assert!(Cli::try_parse_from(["burrow", "run", "-t", "-d", "busybox", "sh"]).is_err());
    }

    #[test]
    fn global_dirs_override_defaults() {
        let cli = Cli::try_parse_from(["burrow", "--state-dir", "/tmp/s", "ps", "--data-dir", "/tmp/d"])
            .expect("parse");
        let config = cli.config();
        assert_eq!(config.state_dir, PathBuf::from("/tmp/s"));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/d"));
    }

    #[test]
    fn network_create_requires_subnet() {
        assert!(Cli::try_parse_from(["burrow", "network", "create", "br0"]).is_err());
        let cli = Cli::try_parse_from([
            "burrow", "network", "create", "--subnet", "10.0.0.0/24", "br0",
        ])
        .expect("parse");
        assert!(matches!(cli.command, Command::Network(_)));
    }
}
