//! Running commands inside a running container.
//!
//! `setns(2)` into a mount namespace is refused to multithreaded processes,
//! so the caller re-executes itself with the target pid and command in its
//! environment; the fresh process joins the namespaces in
//! [`enter_if_requested`] before doing anything else.

use std::path::PathBuf;
use std::process::Command;

use burrow_common::constants::{EXEC_CMD_ENV, EXEC_PID_ENV};
use burrow_common::error::{BurrowError, Result};
use burrow_core::namespace::join::join_all;

const SELF_EXE: &str = "/proc/self/exe";

/// Runs `command` inside the container whose init process is `pid`,
/// with the container's environment, and returns its exit code.
///
/// # Errors
///
/// Returns an error if the command is empty, the container's environment
/// cannot be read, or the helper process cannot be started.
pub fn exec_in_container(pid: i32, command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Err(BurrowError::Config {
            message: "exec command is empty".into(),
        });
    }
    let container_env = read_environ(pid)?;
    tracing::info!(pid, cmd = ?command, "exec into container");

    let status = Command::new(SELF_EXE)
        .arg("exec")
        .envs(container_env)
        .env(EXEC_PID_ENV, pid.to_string())
        .env(EXEC_CMD_ENV, serde_json::to_string(command)?)
        .status()
        .map_err(|e| BurrowError::io(SELF_EXE, e))?;
    Ok(exit_code(status))
}

/// Joins the container named by the exec environment variables, runs the
/// command there, and returns its exit code. Returns `Ok(None)` when this
/// process was not started by [`exec_in_container`].
///
/// Must run first thing in `main`, while the process is single-threaded.
///
/// # Errors
///
/// Returns an error if the variables are malformed, a namespace cannot be
/// joined, or the command cannot be started.
pub fn enter_if_requested() -> Result<Option<i32>> {
    let Ok(pid) = std::env::var(EXEC_PID_ENV) else {
        return Ok(None);
    };
    let pid: i32 = pid.trim().parse().map_err(|_| BurrowError::Config {
        message: format!("{EXEC_PID_ENV}={pid} is not a pid"),
    })?;
    let raw = std::env::var(EXEC_CMD_ENV).map_err(|_| BurrowError::Config {
        message: format!("{EXEC_CMD_ENV} is not set"),
    })?;
    let command: Vec<String> = serde_json::from_str(&raw)?;
    let Some((program, args)) = command.split_first() else {
        return Err(BurrowError::Config {
            message: "exec command is empty".into(),
        });
    };

    join_all(pid)?;
    let status = Command::new(program)
        .args(args)
        .env_remove(EXEC_PID_ENV)
        .env_remove(EXEC_CMD_ENV)
        .status()
        .map_err(|e| BurrowError::io(program, e))?;
    Ok(Some(exit_code(status)))
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}

/// Environment of process `pid`, from `/proc/<pid>/environ`.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_environ(pid: i32) -> Result<Vec<(String, String)>> {
    let path = PathBuf::from(format!("/proc/{pid}/environ"));
    let raw = std::fs::read(&path).map_err(|e| BurrowError::io(path, e))?;
    Ok(parse_environ(&raw))
}

/// Splits a NUL-separated `KEY=VALUE` block. Entries without `=` are dropped.
fn parse_environ(raw: &[u8]) -> Vec<(String, String)> {
    raw.split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
        })
        .collect()
}
