//! Scoped entry into another network namespace.
//!
//! `setns(CLONE_NEWNET)` changes the namespace of the calling thread only.
//! [`run_in_netns`] runs a closure on a dedicated thread holding a
//! [`NetnsGuard`], so the caller never changes namespace and the worker is
//! switched back on every exit path before it ends.

use std::fs::File;
use std::path::Path;

use burrow_common::error::{BurrowError, Result};
use nix::sched::{CloneFlags, setns};

const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Holds the calling thread inside a foreign network namespace until dropped.
#[derive(Debug)]
pub struct NetnsGuard {
    original: File,
}

impl NetnsGuard {
    /// Switches the calling thread into the namespace at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if either namespace file cannot be opened or
    /// `setns(2)` fails. The thread is unchanged in that case.
    pub fn enter(target: &Path) -> Result<Self> {
        let original = File::open(THREAD_NETNS).map_err(|e| BurrowError::io(THREAD_NETNS, e))?;
        let ns = File::open(target).map_err(|e| BurrowError::io(target, e))?;
        setns(&ns, CloneFlags::CLONE_NEWNET)
            .map_err(|e| BurrowError::syscall(format!("enter netns {}", target.display()), e))?;
        tracing::trace!(target = %target.display(), "entered network namespace");
        Ok(Self { original })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Err(e) = setns(&self.original, CloneFlags::CLONE_NEWNET) {
            tracing::error!(error = %e, "failed to restore network namespace");
        }
    }
}

/// Runs `f` inside the network namespace at `target` on a scoped thread.
///
/// # Errors
///
/// Returns the error of `f`, an error entering the namespace, or
/// [`BurrowError::InvalidState`] if the worker thread panicked.
pub fn run_in_netns<T, F>(target: &Path, f: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> Result<T> + Send,
{
    std::thread::scope(|scope| {
        scope
            .spawn(|| {
                let _guard = NetnsGuard::enter(target)?;
                f()
            })
            .join()
            .map_err(|_| BurrowError::InvalidState {
                message: format!("network namespace worker for {} panicked", target.display()),
            })?
    })
}
