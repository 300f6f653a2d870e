//! `burrow images`: list local images.

use burrow_runtime::Engine;

use crate::output::{Table, format_bytes};

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if the image store cannot be listed.
pub fn execute(engine: &Engine) -> anyhow::Result<()> {
    let mut table = Table::new(&["IMAGE", "SIZE", "EXTRACTED"]);
    for image in engine.images()? {
        table.row(vec![
            image.name,
            format_bytes(image.size_bytes),
            if image.extracted { "yes" } else { "no" }.to_owned(),
        ]);
    }
    table.render(&mut std::io::stdout().lock())?;
    Ok(())
}
