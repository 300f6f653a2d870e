//! `burrow commit`: save a container's filesystem as an image.

use std::io::Write;

use anyhow::Context;
use burrow_runtime::Engine;
use clap::Args;

/// Arguments for the `commit` command.
#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Container name.
    pub container: String,

    /// Name of the image to create.
    pub image: String,
}

/// Executes the `commit` command.
///
/// # Errors
///
/// Returns an error if the container has no mounted filesystem or the
/// archive cannot be written.
pub fn execute(engine: &Engine, args: &CommitArgs) -> anyhow::Result<()> {
    let archive = engine
        .commit(&args.container, &args.image)
        .with_context(|| format!("failed to commit {}", args.container))?;
    writeln!(std::io::stdout().lock(), "{}", archive.display())?;
    Ok(())
}
