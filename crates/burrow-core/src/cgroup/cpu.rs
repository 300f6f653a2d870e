//! CPU share controller (cgroup v1).

use std::path::Path;

use burrow_common::error::Result;

use super::write_control;

/// Control file holding the relative CPU weight.
pub const SHARES_FILE: &str = "cpu.shares";

/// Sets the relative CPU weight.
///
/// The kernel default is 1024; a group with 512 gets half the CPU time of
/// a default group under contention.
///
/// # Errors
///
/// Returns an error if writing to `cpu.shares` fails.
pub fn set_shares(group: &Path, shares: &str) -> Result<()> {
    write_control(group, SHARES_FILE, shares)?;
    tracing::debug!(group = %group.display(), shares, "cpu shares set");
    Ok(())
}
