//! Joining the namespaces of a running container.

use std::fs::File;

use burrow_common::error::{BurrowError, Result};
use nix::sched::setns;

use super::Namespace;

/// Moves the calling process into every namespace of `pid`.
///
/// All namespace files are opened before the first `setns(2)` so that
/// switching the mount namespace cannot hide the remaining ones. Joining
/// the PID namespace only affects children spawned afterwards.
///
/// Must be called while the process is still single-threaded.
///
/// # Errors
///
/// Returns an error if a namespace file cannot be opened or `setns(2)` fails.
pub fn join_all(pid: i32) -> Result<()> {
    let handles = Namespace::JOIN_ORDER
        .iter()
        .map(|ns| {
            let path = ns.path(pid);
            File::open(&path)
                .map(|file| (*ns, file))
                .map_err(|e| BurrowError::io(path, e))
        })
        .collect::<Result<Vec<_>>>()?;

    for (ns, file) in &handles {
        setns(file, ns.clone_flag())
            .map_err(|e| BurrowError::syscall(format!("setns {}", ns.proc_name()), e))?;
        tracing::debug!(pid, namespace = ns.proc_name(), "joined namespace");
    }
    nix::unistd::chdir("/").map_err(|e| BurrowError::syscall("chdir /", e))?;
    Ok(())
}
