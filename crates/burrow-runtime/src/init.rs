//! The container's init phase.
//!
//! Runs as the first process of the new PID namespace, inside the new mount
//! namespace, with the prepared root filesystem as its working directory.

use std::convert::Infallible;
use std::ffi::{CString, OsString};
use std::fs::File;
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use burrow_common::constants::INIT_PIPE_FD;
use burrow_common::error::{BurrowError, Result};
use burrow_core::filesystem::pivot_root::setup_rootfs;
use burrow_core::namespace::uts::set_hostname;

use crate::process::{InitRequest, c_string};

/// Search path used when neither the request nor the inherited environment
/// provides `PATH`.
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Reads the init request from fd 3, sets up the container root, and
/// replaces the process with the requested command.
///
/// # Errors
///
/// Returns an error if any step fails; on success this never returns.
#[allow(unsafe_code)]
pub fn run() -> Result<Infallible> {
    // SAFETY: the launcher installs the control pipe at this descriptor and
    // nothing else in this process owns it.
    let pipe = File::from(unsafe { OwnedFd::from_raw_fd(INIT_PIPE_FD) });
    let request = InitRequest::read_from(pipe)?;
    if request.args.is_empty() {
        return Err(BurrowError::Config {
            message: "init request carries no command".into(),
        });
    }
    tracing::info!(args = ?request.args, hostname = %request.hostname, "init request received");

    set_hostname(&request.hostname)?;
    let cwd = std::env::current_dir().map_err(|e| BurrowError::io(".", e))?;
    setup_rootfs(&cwd)?;

    let env = merge_env(utf8_vars(std::env::vars_os()), &request.env);
    let path_var = env
        .iter()
        .find_map(|(k, v)| (k == "PATH").then_some(v.as_str()))
        .unwrap_or(DEFAULT_PATH);
    let program = resolve(&request.args[0], path_var)?;
    tracing::debug!(program = %program.display(), "resolved command");

    let program = c_string(&program)?;
    let argv = request
        .args
        .iter()
        .map(c_string)
        .collect::<Result<Vec<CString>>>()?;
    let envp = env
        .iter()
        .map(|(k, v)| c_string(format!("{k}={v}")))
        .collect::<Result<Vec<CString>>>()?;

    nix::unistd::execve(&program, &argv, &envp)
        .map_err(|e| BurrowError::syscall(format!("execve {}", request.args[0]), e))
}

/// Looks `command` up on `path_var` relative to the new root.
fn resolve(command: &str, path_var: &str) -> Result<PathBuf> {
    which::which_in(command, Some(path_var), Path::new("/")).map_err(|e| BurrowError::NotFound {
        kind: "executable",
        id: format!("{command} ({e})"),
    })
}

/// Keeps the variables whose name and value are valid UTF-8; the rest are
/// dropped with a warning.
fn utf8_vars(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> impl Iterator<Item = (String, String)> {
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                let key = key.unwrap_or_else(|k| k.to_string_lossy().into_owned());
                tracing::warn!(key = %key, "dropping non UTF-8 environment variable");
                None
            }
        })
}

/// Inherited variables overlaid with `KEY=VALUE` entries from the request.
/// Entries without `=` are ignored with a warning.
fn merge_env(
    inherited: impl IntoIterator<Item = (String, String)>,
    extra: &[String],
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = inherited.into_iter().collect();
    for entry in extra {
        let Some((key, value)) = entry.split_once('=') else {
            tracing::warn!(entry = %entry, "ignoring environment entry without '='");
            continue;
        };
        match env.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => value.clone_into(&mut slot.1),
            None => env.push((key.to_owned(), value.to_owned())),
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_env_overrides_inherited() {
        let inherited = vec![
            ("PATH".to_owned(), "/bin".to_owned()),
            ("HOME".to_owned(), "/root".to_owned()),
        ];
        let env = merge_env(
            inherited,
            &["PATH=/opt/bin:/bin".into(), "MODE=a=b".into(), "broken".into()],
        );
        assert_eq!(
            env,
            [
                ("PATH".to_owned(), "/opt/bin:/bin".to_owned()),
                ("HOME".to_owned(), "/root".to_owned()),
                ("MODE".to_owned(), "a=b".to_owned()),
            ]
        );
    }

    #[test]
    fn non_utf8_inherited_variables_are_dropped() {
        use std::os::unix::ffi::OsStringExt;

        let inherited = vec![
            (OsString::from("HOME"), OsString::from("/root")),
            (OsString::from("BAD_VALUE"), OsString::from_vec(vec![0x66, 0xff, 0x6f])),
            (OsString::from_vec(vec![0xfe, 0x41]), OsString::from("x")),
        ];
        let env = merge_env(utf8_vars(inherited), &["MODE=on".into()]);
        assert_eq!(
            env,
            [
                ("HOME".to_owned(), "/root".to_owned()),
                ("MODE".to_owned(), "on".to_owned()),
            ]
        );
    }

    #[test]
    fn commands_resolve_on_the_given_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path_var = dir.path().to_string_lossy().into_owned();
        assert!(resolve("definitely-not-a-command", &path_var)
            .expect_err("missing")
            .is_not_found());
    }
}
