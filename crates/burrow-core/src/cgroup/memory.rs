//! Memory controller (cgroup v1).

use std::path::Path;

use burrow_common::error::Result;

use super::write_control;

/// Control file holding the hard memory limit.
pub const LIMIT_FILE: &str = "memory.limit_in_bytes";

/// Sets the hard memory limit, e.g. `100m`.
///
/// # Errors
///
/// Returns an error if writing to `memory.limit_in_bytes` fails.
pub fn set_limit(group: &Path, limit: &str) -> Result<()> {
    write_control(group, LIMIT_FILE, limit)?;
    tracing::debug!(group = %group.display(), limit, "memory limit set");
    Ok(())
}
