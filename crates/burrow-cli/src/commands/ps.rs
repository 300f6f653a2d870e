//! `burrow ps`: list containers.

use std::io::Write;

use burrow_runtime::{ContainerRecord, Engine};
use clap::Args;

use crate::output::Table;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Print the records as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ps` command.
///
/// Containers whose process has disappeared are reported, and saved, as
/// exited.
///
/// # Errors
///
/// Returns an error if the records cannot be listed.
pub fn execute(engine: &Engine, args: &PsArgs) -> anyhow::Result<()> {
    let containers = engine.list()?;
    let mut out = std::io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, &containers)?;
        writeln!(out)?;
        return Ok(());
    }
    table(&containers).render(&mut out)?;
    Ok(())
}

fn table(containers: &[ContainerRecord]) -> Table {
    let mut table = Table::new(&["ID", "NAME", "PID", "STATUS", "IMAGE", "IP", "COMMAND", "CREATED"]);
    for c in containers {
        table.row(vec![
            c.id.to_string(),
            c.name.clone(),
            c.pid.map_or_else(|| "-".to_owned(), |p| p.to_string()),
            c.status.to_string(),
            c.image.clone(),
            c.network
                .as_ref()
                .map_or_else(|| "-".to_owned(), |n| n.ip_address.to_string()),
            c.command.clone(),
            c.created_display(),
        ]);
    }
    table
}
