//! Launching the container's init process.
//!
//! The launcher clones a child into fresh UTS, PID, mount, network and IPC
//! namespaces and re-executes the current binary as `init` inside them.
//! The child blocks on a control pipe installed at fd 3 until the parent
//! has finished host-side setup (record, cgroups, network) and sends the
//! [`InitRequest`].

use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use burrow_common::constants::INIT_PIPE_FD;
use burrow_common::error::{BurrowError, Result};
use burrow_core::namespace::container_clone_flags;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

const SELF_EXE: &str = "/proc/self/exe";
const INIT_SUBCOMMAND: &str = "init";
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Exit code of a child that failed before reaching `execve`.
const SETUP_FAILED: isize = 126;
/// Exit code of a child whose `execve` failed.
const EXEC_FAILED: isize = 127;

/// What the init process needs to start the user command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitRequest {
    /// Command and arguments.
    pub args: Vec<String>,
    /// Extra `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Hostname inside the UTS namespace.
    pub hostname: String,
}

impl InitRequest {
    /// Reads a request from `reader` until EOF.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the payload is not a request.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = Vec::new();
        let _ = reader
            .read_to_end(&mut buf)
            .map_err(|e| BurrowError::io("init pipe", e))?;
        Ok(serde_json::from_slice(&buf)?)
    }
}

/// Parameters of one launch.
#[derive(Debug, Clone, Copy)]
pub struct LaunchSpec<'a> {
    /// Inherit the terminal instead of writing stdout to `log_file`.
    pub interactive: bool,
    /// Prepared root filesystem; becomes the child's working directory.
    pub rootfs: &'a Path,
    /// Where a detached container's stdout goes. Created fresh.
    pub log_file: &'a Path,
}

/// Write end of the control pipe.
#[derive(Debug)]
pub struct InitPipe(File);

impl InitPipe {
    /// Sends `request` and closes the pipe, releasing the child.
    ///
    /// # Errors
    ///
    /// Returns an error if the child has gone away or the write fails.
    pub fn send(self, request: &InitRequest) -> Result<()> {
        let mut file = self.0;
        let payload = serde_json::to_vec(request)?;
        file.write_all(&payload)
            .map_err(|e| BurrowError::io("init pipe", e))?;
        tracing::info!(args = ?request.args, "init request sent");
        Ok(())
    }
}

impl From<OwnedFd> for InitPipe {
    fn from(fd: OwnedFd) -> Self {
        Self(File::from(fd))
    }
}

/// Handle on the cloned init process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerProcess {
    pid: Pid,
}

impl ContainerProcess {
    /// Host PID of the process.
    #[must_use]
    pub const fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Returns `true` while the child has not exited. A child that has
    /// exited is reaped by this call.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid(2)` fails for a reason other than the
    /// child being gone.
    pub fn is_alive(&self) -> Result<bool> {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(true),
            Ok(_) | Err(Errno::ECHILD) => Ok(false),
            Err(e) => Err(BurrowError::syscall("waitpid", e)),
        }
    }

    /// Blocks until the child exits and returns its exit code. Death by
    /// signal is reported shell-style as `128 + signal`.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid(2)` fails.
    pub fn wait(&self) -> Result<i32> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => return Err(BurrowError::syscall("waitpid", e)),
            }
        }
    }

    /// Kills the child and reaps it.
    pub fn kill(&self) {
        match kill(self.pid, Signal::SIGKILL) {
            Ok(()) => {
                let _ = self.wait();
            }
            Err(e) => tracing::debug!(pid = self.pid(), error = %e, "kill failed"),
        }
    }
}

/// Clones the init process of a new container.
///
/// The child starts with stdout redirected (detached) or inherited
/// (interactive), the read end of the control pipe at fd 3, and `rootfs` as
/// its working directory, then execs `/proc/self/exe init`.
///
/// # Errors
///
/// Returns an error if the pipe, the log file, or `clone(2)` cannot be
/// created. Nothing is left behind in that case.
#[allow(unsafe_code)]
pub fn launch(spec: &LaunchSpec<'_>) -> Result<(ContainerProcess, InitPipe)> {
    let (read_end, write_end) =
        nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| BurrowError::syscall("pipe2", e))?;

    let log = if spec.interactive {
        None
    } else {
        Some(create_log(spec.log_file)?)
    };

    let exe = CString::new(SELF_EXE).map_err(|e| BurrowError::Config {
        message: e.to_string(),
    })?;
    let argv = [exe.clone(), c_string(INIT_SUBCOMMAND)?];
    let rootfs = spec.rootfs.to_path_buf();
    let read_raw = read_end.as_raw_fd();
    let log_raw = log.as_ref().map(AsRawFd::as_raw_fd);

    // Runs in the child between clone and exec: no allocation, no locks.
    let child = Box::new(move || -> isize {
        // SAFETY: both descriptors are open in the child, which has its own
        // copy of the descriptor table.
        unsafe {
            if let Some(log_raw) = log_raw {
                if libc::dup2(log_raw, libc::STDOUT_FILENO) < 0 {
                    return SETUP_FAILED;
                }
            }
            if read_raw == INIT_PIPE_FD {
                let flags = libc::fcntl(read_raw, libc::F_GETFD);
                if flags < 0 || libc::fcntl(read_raw, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                    return SETUP_FAILED;
                }
            } else if libc::dup2(read_raw, INIT_PIPE_FD) < 0 {
                return SETUP_FAILED;
            }
        }
        if nix::unistd::chdir(rootfs.as_path()).is_err() {
            return SETUP_FAILED;
        }
        let _ = nix::unistd::execv(&exe, &argv);
        EXEC_FAILED
    });

    let mut stack = vec![0_u8; CHILD_STACK_SIZE];
    // SAFETY: the child does not share memory with the parent (no
    // CLONE_VM) and only performs async-signal-safe calls before execv.
    let pid = unsafe {
        nix::sched::clone(
            child,
            &mut stack,
            container_clone_flags(),
            Some(libc::SIGCHLD),
        )
    }
    .map_err(|e| BurrowError::syscall("clone", e))?;

    drop(read_end);
    drop(log);
    tracing::info!(pid = pid.as_raw(), rootfs = %spec.rootfs.display(), interactive = spec.interactive, "init process cloned");
    Ok((ContainerProcess { pid }, InitPipe::from(write_end)))
}

fn create_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BurrowError::io(parent, e))?;
    }
    File::create(path).map_err(|e| BurrowError::io(path, e))
}

/// Converts a string for `execve(2)`.
///
/// # Errors
///
/// Returns [`BurrowError::Config`] if `s` contains a NUL byte.
pub fn c_string(s: impl AsRef<std::ffi::OsStr>) -> Result<CString> {
    let s = s.as_ref();
    CString::new(s.as_bytes()).map_err(|_| BurrowError::Config {
        message: format!("{} contains a NUL byte", s.to_string_lossy()),
    })
}
