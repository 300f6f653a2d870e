//! UTS namespace: the container's own hostname.

use burrow_common::error::{BurrowError, Result};

/// Sets the hostname inside the current UTS namespace.
///
/// # Errors
///
/// Returns an error if `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname)
        .map_err(|e| BurrowError::syscall(format!("sethostname {hostname}"), e))?;
    tracing::debug!(hostname, "hostname set");
    Ok(())
}
