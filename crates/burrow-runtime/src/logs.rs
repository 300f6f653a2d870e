//! Container log access.
//!
//! A detached container's stdout goes straight into its log file; the
//! runtime only ever reads it.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use burrow_common::error::{BurrowError, Result};

/// Interval between polls while following a log.
pub const FOLLOW_INTERVAL: Duration = Duration::from_millis(250);

/// Reads a whole log file.
///
/// Returns an empty string if the log file does not exist yet, which is the
/// case for interactive containers.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_logs(path: &Path) -> Result<String> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(BurrowError::io(path, e)),
    }
}

/// Copies the log at `path` to `out`, then keeps copying whatever is
/// appended until `keep_going` returns `false`. The tail is drained once
/// more after the last check so no output written before exit is lost.
///
/// # Errors
///
/// Returns an error if the log cannot be read or `out` cannot be written.
pub fn follow_logs<W, F>(path: &Path, out: &mut W, interval: Duration, mut keep_going: F) -> Result<()>
where
    W: Write,
    F: FnMut() -> bool,
{
    let mut offset = 0_u64;
    loop {
        let running = keep_going();
        offset = copy_from(path, offset, out)?;
        if !running {
            return Ok(());
        }
        std::thread::sleep(interval);
    }
}

/// Copies bytes of `path` from `offset` to the end, returning the new offset.
/// A truncated file is read again from the start.
fn copy_from<W: Write>(path: &Path, offset: u64, out: &mut W) -> Result<u64> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(offset),
        Err(e) => return Err(BurrowError::io(path, e)),
    };
    let len = file.metadata().map_err(|e| BurrowError::io(path, e))?.len();
    let start = if len < offset { 0 } else { offset };
    let _ = file
        .seek(SeekFrom::Start(start))
        .map_err(|e| BurrowError::io(path, e))?;
    let mut chunk = Vec::new();
    let read = file
        .read_to_end(&mut chunk)
        .map_err(|e| BurrowError::io(path, e))?;
    out.write_all(&chunk)
        .and_then(|()| out.flush())
        .map_err(|e| BurrowError::io("<stdout>", e))?;
    Ok(start + read as u64)
}
