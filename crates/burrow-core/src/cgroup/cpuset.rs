//! CPU set controller (cgroup v1).

use std::path::Path;

use burrow_common::error::Result;

use super::write_control;

/// Control file holding the allowed CPU list.
pub const CPUS_FILE: &str = "cpuset.cpus";

/// Control file holding the allowed memory nodes.
pub const MEMS_FILE: &str = "cpuset.mems";

/// Restricts the group to the CPU list `cpus`, e.g. `0-1`.
///
/// `cpuset.mems` keeps the value inherited from the parent group.
///
/// # Errors
///
/// Returns an error if writing to `cpuset.cpus` fails.
pub fn set_cpus(group: &Path, cpus: &str) -> Result<()> {
    write_control(group, CPUS_FILE, cpus)?;
    tracing::debug!(group = %group.display(), cpus, "cpuset set");
    Ok(())
}
