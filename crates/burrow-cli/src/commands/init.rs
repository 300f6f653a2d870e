//! `burrow init`: the first process inside a new container.

/// Executes the hidden `init` command. Only returns on failure.
///
/// # Errors
///
/// Returns an error if the container root cannot be set up or the command
/// cannot be executed.
pub fn execute() -> anyhow::Result<()> {
    let never = burrow_runtime::init::run().inspect_err(|e| {
        tracing::error!(error = %e, "container init failed");
    })?;
    match never {}
}
