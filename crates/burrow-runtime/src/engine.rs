//! Runtime engine that orchestrates the container lifecycle.
//!
//! Every CLI operation maps onto one `Engine` method. The engine owns no
//! long-lived state beyond paths: records, networks and images are read
//! from disk on each call, so independent invocations cooperate through the
//! filesystem alone.

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use burrow_common::config::RuntimeConfig;
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::{ContainerId, ContainerStatus, ResourceConfig};
use burrow_core::cgroup::CgroupManager;
use burrow_image::archive;
use burrow_image::store::{self, ImageInfo, ImageStore};
use burrow_image::workspace::Workspace;
use burrow_network::{Attachment, NetworkRegistry, PortMapping};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::container::ContainerRecord;
use crate::exec;
use crate::logs;
use crate::process::{self, ContainerProcess, InitPipe, InitRequest, LaunchSpec};
use crate::state::{self, ContainerRegistry};

/// Longest hostname `sethostname(2)` accepts.
const HOST_NAME_MAX: usize = 64;
/// Interval between liveness checks while waiting for a stop.
const STOP_POLL: Duration = Duration::from_millis(100);
/// How long a SIGKILLed process may take to disappear.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Everything `burrow run` was asked to do.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Attach the terminal and wait for the command to exit.
    pub tty: bool,
    /// Return immediately; stdout goes to the log. Conflicts with `tty`.
    pub detach: bool,
    /// Resource limits.
    pub resources: ResourceConfig,
    /// Container name; defaults to the generated id.
    pub name: Option<String>,
    /// `host:container` bind mount.
    pub volume: Option<String>,
    /// Extra `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Network to join.
    pub network: Option<String>,
    /// `host:container` port mappings; only meaningful with `network`.
    pub publish: Vec<String>,
    /// Image to build the root filesystem from.
    pub image: String,
    /// Command and arguments.
    pub command: Vec<String>,
}

impl RunRequest {
    /// Rejects contradictory or incomplete requests before anything is
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Config`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.tty && self.detach {
            return Err(BurrowError::Config {
                message: "--tty and --detach cannot be combined".into(),
            });
        }
        if self.command.is_empty() {
            return Err(BurrowError::Config {
                message: "missing container command".into(),
            });
        }
        store::validate_name(&self.image)
    }
}

/// How a run ended, as far as the caller is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// An interactive container exited with this code and was cleaned up.
    Exited(i32),
    /// A detached container is running.
    Detached(ContainerRecord),
}

/// Coordinates records, workspaces, cgroups, networks and processes.
#[derive(Debug, Clone)]
pub struct Engine {
    config: RuntimeConfig,
    containers: ContainerRegistry,
    images: ImageStore,
    workspace: Workspace,
}

impl Engine {
    /// Creates an engine over the on-disk layout described by `config`.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let images = ImageStore::open(config.images_dir());
        let workspace = Workspace::new(images.clone(), config.overlay_root(), config.mnt_root());
        Self {
            containers: ContainerRegistry::new(&config),
            images,
            workspace,
            config,
        }
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Loads the network registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the network directory cannot be listed.
    pub fn networks(&self) -> Result<NetworkRegistry> {
        NetworkRegistry::load(&self.config)
    }

    /// Creates and starts a container.
    ///
    /// The workspace is assembled and the init process cloned first; the
    /// record, cgroups and network are then set up while init waits on its
    /// control pipe. Any failure after the clone kills the child and
    /// unwinds what was acquired.
    ///
    /// With `tty` the call waits for the command, tears the container down
    /// and reports the exit code. Otherwise it returns the running record.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Config`] for an invalid request,
    /// [`BurrowError::InvalidState`] for a name already in use, or the
    /// first setup failure.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        request.validate()?;
        let id = ContainerId::generate();
        let name = request
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| id.to_string());
        state::validate_name(&name)?;
        if self.containers.contains(&name) {
            return Err(BurrowError::InvalidState {
                message: format!("container name {name} is already in use"),
            });
        }

        let networks = match &request.network {
            Some(network) => {
                let registry = self.networks()?;
                let _ = registry.get(network)?;
                Some(registry)
            }
            None => {
                if !request.publish.is_empty() {
                    tracing::warn!("port mappings need --network; ignoring them");
                }
                None
            }
        };
        let cgroup = CgroupManager::new(&name, &self.config.mountinfo)?;
        let volume = request.volume.as_deref();

        let rootfs = self.workspace.prepare(volume, &request.image, &name)?;
        let log_file = self.config.log_file(&name);
        let spec = LaunchSpec {
            interactive: request.tty,
            rootfs: &rootfs,
            log_file: &log_file,
        };
        let (child, pipe) = match process::launch(&spec) {
            Ok(launched) => launched,
            Err(e) => {
                if let Err(cleanup) = self.workspace.teardown(volume, &name) {
                    tracing::warn!(container = %name, error = %cleanup, "failed to remove workspace");
                }
                if let Err(cleanup) = self.containers.delete(&name) {
                    tracing::warn!(container = %name, error = %cleanup, "failed to remove log");
                }
                return Err(e);
            }
        };

        let mut attachment = None;
        let setup = Setup {
            request,
            id: &id,
            name: &name,
            child,
            cgroup: &cgroup,
            networks: networks.as_ref(),
        };
        let record = match self.configure(&setup, pipe, &mut attachment) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(container = %name, error = %e, "setup failed, unwinding");
                child.kill();
                if let Err(cleanup) =
                    self.release(&name, volume, &cgroup, networks.as_ref(), attachment.as_ref())
                {
                    tracing::warn!(container = %name, error = %cleanup, "failed to release resources");
                }
                if let Err(cleanup) = self.containers.delete(&name) {
                    tracing::warn!(container = %name, error = %cleanup, "failed to delete record");
                }
                return Err(e);
            }
        };

        if !request.tty {
            tracing::info!(container = %name, pid = child.pid(), "container running detached");
            return Ok(RunOutcome::Detached(record));
        }

        let code = child.wait()?;
        tracing::info!(container = %name, code, "container exited");
        match self.release(&name, volume, &cgroup, networks.as_ref(), attachment.as_ref()) {
            Ok(()) => self.containers.delete(&name)?,
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "cleanup incomplete, keeping record for rm");
                let _ = self.containers.set_status(&name, ContainerStatus::Exited, None)?;
            }
        }
        Ok(RunOutcome::Exited(code))
    }

    /// Host-side setup while init waits on its pipe. `attachment` is filled
    /// in as soon as a network connection exists so the caller can release
    /// it if a later step fails.
    fn configure(
        &self,
        setup: &Setup<'_>,
        pipe: InitPipe,
        attachment: &mut Option<Attachment>,
    ) -> Result<ContainerRecord> {
        let Setup {
            request,
            name,
            child,
            cgroup,
            ..
        } = *setup;
        let pid = child.pid();
        let mut record = self.containers.record_with_id(
            setup.id.clone(),
            pid,
            &request.command,
            name,
            request.volume.as_deref(),
            &request.image,
        )?;

        cgroup.set(&request.resources)?;
        // An unreaped child keeps its pid, so enrolling it cannot hit a
        // recycled process.
        if !child.is_alive()? {
            return Err(BurrowError::InvalidState {
                message: format!("container {name} exited during setup"),
            });
        }
        cgroup.apply(pid)?;

        if let (Some(registry), Some(network)) = (setup.networks, &request.network) {
            let ports = PortMapping::parse_all(&request.publish);
            registry.recover_all();
            let endpoint = registry.connect(network, &record.id, pid, ports)?;
            let connected = endpoint.attachment();
            *attachment = Some(connected.clone());
            self.containers.set_network(name, Some(connected.clone()))?;
            record.network = Some(connected);
            tracing::info!(container = %name, network = %network, ip = %endpoint.ip_address, "container connected");
        }

        pipe.send(&InitRequest {
            args: request.command.clone(),
            env: request.env.clone(),
            hostname: hostname_for(name, &record.id),
        })?;
        Ok(record)
    }

    /// Releases a container's cgroups, network attachment and workspace.
    /// Every step is attempted; the first error is returned.
    fn release(
        &self,
        name: &str,
        volume: Option<&str>,
        cgroup: &CgroupManager,
        networks: Option<&NetworkRegistry>,
        attachment: Option<&Attachment>,
    ) -> Result<()> {
        let mut first_error = None;
        let mut note = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                tracing::warn!(container = name, step, error = %e, "release step failed");
                let _ = first_error.get_or_insert(e);
            }
        };

        note("cgroup", cgroup.destroy());
        if let Some(attachment) = attachment {
            let result = match networks {
                Some(registry) => registry.disconnect(attachment),
                None => self
                    .networks()
                    .and_then(|registry| registry.disconnect(attachment)),
            };
            note("network", result);
        }
        note("workspace", self.workspace.teardown(volume, name));
        first_error.map_or(Ok(()), Err)
    }

    /// Every record, reconciled: a `Running` record whose process is gone
    /// becomes `Exited` and is saved that way.
    ///
    /// # Errors
    ///
    /// Returns an error if the records directory cannot be listed.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let records = self.containers.list()?;
        Ok(records.into_iter().map(|r| self.reconcile(r)).collect())
    }

    /// Loads the record `name`, reconciled like [`list`](Self::list).
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown name.
    pub fn get(&self, name: &str) -> Result<ContainerRecord> {
        self.containers.get(name).map(|r| self.reconcile(r))
    }

    fn reconcile(&self, record: ContainerRecord) -> ContainerRecord {
        if !record.is_running() || record.pid.is_some_and(process_exists) {
            return record;
        }
        tracing::info!(container = %record.name, pid = ?record.pid, "process gone, marking exited");
        match self
            .containers
            .set_status(&record.name, ContainerStatus::Exited, None)
        {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!(container = %record.name, error = %e, "failed to persist exited status");
                ContainerRecord {
                    status: ContainerStatus::Exited,
                    pid: None,
                    ..record
                }
            }
        }
    }

    /// Stops a running container: SIGTERM, then SIGKILL once the grace
    /// period has passed. The record turns `Stopped` only after the process
    /// is gone, so a following `rm` never races it.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown name,
    /// [`BurrowError::InvalidState`] if it is not running, or an error if
    /// it cannot be signalled.
    pub fn stop(&self, name: &str) -> Result<ContainerRecord> {
        let record = self.get(name)?;
        let pid = running_pid(&record)?;
        let target = Pid::from_raw(pid);

        match kill(target, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(BurrowError::syscall(format!("kill {pid}"), e)),
        }
        tracing::info!(container = name, pid, "sent SIGTERM");

        let deadline = Instant::now() + self.config.stop_grace;
        while process_exists(pid) && Instant::now() < deadline {
            std::thread::sleep(STOP_POLL);
        }
        if process_exists(pid) {
            match kill(target, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => return Err(BurrowError::syscall(format!("kill {pid}"), e)),
            }
            tracing::info!(container = name, pid, "grace period over, sent SIGKILL");

            let deadline = Instant::now() + KILL_WAIT;
            while process_exists(pid) && Instant::now() < deadline {
                std::thread::sleep(STOP_POLL);
            }
            if process_exists(pid) {
                return Err(BurrowError::InvalidState {
                    message: format!("container {name} (pid {pid}) survived SIGKILL"),
                });
            }
        }

        self.containers
            .set_status(name, ContainerStatus::Stopped, None)
    }

    /// Removes a container that is no longer running, releasing its
    /// cgroups, network address and workspace before deleting the record.
    /// If a release step fails the record is kept so removal can be
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown name,
    /// [`BurrowError::InvalidState`] if it is running, or the first
    /// release failure.
    pub fn remove(&self, name: &str) -> Result<()> {
        let record = self.get(name)?;
        if record.is_running() {
            return Err(BurrowError::InvalidState {
                message: format!("container {name} is running; stop it first"),
            });
        }
        let cgroup = CgroupManager::new(name, &self.config.mountinfo)?;
        self.release(
            name,
            record.volume.as_deref(),
            &cgroup,
            None,
            record.network.as_ref(),
        )?;
        self.containers.delete(name)?;
        tracing::info!(container = name, "container removed");
        Ok(())
    }

    /// Runs `command` inside a running container and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown name,
    /// [`BurrowError::InvalidState`] if it is not running, or an error from
    /// the exec helper.
    pub fn exec(&self, name: &str, command: &[String]) -> Result<i32> {
        let record = self.get(name)?;
        let pid = running_pid(&record)?;
        exec::exec_in_container(pid, command)
    }

    /// Captured output of a container. Interactive containers have none.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown name, or an error if
    /// the log cannot be read.
    pub fn logs(&self, name: &str) -> Result<String> {
        let _ = self.containers.get(name)?;
        logs::read_logs(&self.config.log_file(name))
    }

    /// Streams a container's output to `out` until it stops running.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::NotFound`] for an unknown name, or an error if
    /// the log cannot be read or `out` written.
    pub fn follow_logs<W: Write>(&self, name: &str, out: &mut W) -> Result<()> {
        let _ = self.containers.get(name)?;
        logs::follow_logs(
            &self.config.log_file(name),
            out,
            logs::FOLLOW_INTERVAL,
            || self.get(name).is_ok_and(|r| r.is_running()),
        )
    }

    /// Archives a container's root filesystem as image `image`, returning
    /// the archive path.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Config`] for an invalid image name,
    /// [`BurrowError::NotFound`] for an unknown container,
    /// [`BurrowError::InvalidState`] if its root filesystem is not mounted,
    /// or an archive error.
    pub fn commit(&self, name: &str, image: &str) -> Result<PathBuf> {
        store::validate_name(image)?;
        let _ = self.containers.get(name)?;
        let rootfs = self.workspace.paths(name).mnt_dir;
        if !rootfs.is_dir() {
            return Err(BurrowError::InvalidState {
                message: format!("container {name} has no mounted root filesystem"),
            });
        }
        let archive_path = self.images.archive_path(image);
        let size = archive::commit(&rootfs, &archive_path)?;
        tracing::info!(container = name, image, size, "container committed");
        Ok(archive_path)
    }

    /// Image archives in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub fn images(&self) -> Result<Vec<ImageInfo>> {
        self.images.list()
    }
}

/// Borrowed context of one run, shared between setup and unwinding.
#[derive(Clone, Copy)]
struct Setup<'a> {
    request: &'a RunRequest,
    id: &'a ContainerId,
    name: &'a str,
    child: ContainerProcess,
    cgroup: &'a CgroupManager,
    networks: Option<&'a NetworkRegistry>,
}

fn running_pid(record: &ContainerRecord) -> Result<i32> {
    match record.pid {
        Some(pid) if record.is_running() => Ok(pid),
        _ => Err(BurrowError::InvalidState {
            message: format!("container {} is not running", record.name),
        }),
    }
}

/// `kill(pid, 0)`: the process exists unless the kernel says there is no
/// such process. A zombie counts as gone; it holds no mounts and has left
/// its cgroups.
fn process_exists(pid: i32) -> bool {
    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH)) && !is_zombie(pid)
}

fn is_zombie(pid: i32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| {
        stat.rsplit_once(')')
            .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z'))
    })
}

/// The container name, or the id when the name is too long for the kernel.
fn hostname_for(name: &str, id: &ContainerId) -> String {
    if name.len() < HOST_NAME_MAX {
        name.to_owned()
    } else {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RuntimeConfig::new(dir.path().join("state"), dir.path().join("data"));
        (dir, Engine::new(config))
    }

    fn request(command: &[&str]) -> RunRequest {
        RunRequest {
            image: "busybox".into(),
            command: command.iter().map(ToString::to_string).collect(),
            ..RunRequest::default()
        }
    }

    #[test]
    fn tty_and_detach_conflict() {
        let mut req = request(&["sh"]);
        req.tty = true;
        req.detach = true;
        assert!(matches!(req.validate(), Err(BurrowError::Config { .. })));
    }

    #[test]
    fn empty_command_and_bad_image_are_rejected() {
        assert!(request(&[]).validate().is_err());
        let mut req = request(&["sh"]);
        req.image = "../etc".into();
        assert!(req.validate().is_err());
        assert!(request(&["sh"]).validate().is_ok());
    }

    #[test]
    fn duplicate_name_is_rejected_before_any_setup() {
        let (_dir, engine) = engine();
        let _ = engine
            .containers
            .record(1, &["top".into()], "web", None, "busybox")
            .expect("record");
        let mut req = request(&["top"]);
        req.name = Some("web".into());
        assert!(matches!(
            engine.run(&req),
            Err(BurrowError::InvalidState { .. })
        ));
        assert!(!engine.config.overlay_root().exists());
    }

    #[test]
    fn dead_running_records_are_reconciled_to_exited() {
        let (_dir, engine) = engine();
        // Far above any default pid_max, so no such process exists.
        let _ = engine
            .containers
            .record(i32::MAX - 1, &["top".into()], "ghost", None, "busybox")
            .expect("record");

        let listed = engine.list().expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, ContainerStatus::Exited);
        assert_eq!(listed[0].pid, None);
        assert_eq!(
            engine.containers.get("ghost").expect("get").status,
            ContainerStatus::Exited
        );
    }

    #[test]
    fn live_records_stay_running() {
        let (_dir, engine) = engine();
        let me = i32::try_from(std::process::id()).expect("pid");
        let _ = engine
            .containers
            .record(me, &["self".into()], "alive", None, "busybox")
            .expect("record");
        assert!(engine.get("alive").expect("get").is_running());
    }

    #[test]
    fn running_containers_cannot_be_removed() {
        let (_dir, engine) = engine();
        let me = i32::try_from(std::process::id()).expect("pid");
        let _ = engine
            .containers
            .record(me, &["self".into()], "busy", None, "busybox")
            .expect("record");
        assert!(matches!(
            engine.remove("busy"),
            Err(BurrowError::InvalidState { .. })
        ));
        assert!(engine.remove("nobody").expect_err("unknown").is_not_found());
    }

    #[test]
    fn stopped_containers_cannot_be_stopped_or_entered() {
        let (_dir, engine) = engine();
        let _ = engine
            .containers
            .record(1, &["top".into()], "idle", None, "busybox")
            .expect("record");
        let _ = engine
            .containers
            .set_status("idle", ContainerStatus::Stopped, None)
            .expect("status");
        assert!(matches!(engine.stop("idle"), Err(BurrowError::InvalidState { .. })));
        assert!(matches!(
            engine.exec("idle", &["ls".into()]),
            Err(BurrowError::InvalidState { .. })
        ));
    }

    #[test]
    fn logs_require_a_record() {
        let (_dir, engine) = engine();
        assert!(engine.logs("nobody").expect_err("unknown").is_not_found());
        let _ = engine
            .containers
            .record(1, &["top".into()], "quiet", None, "busybox")
            .expect("record");
        std::fs::write(engine.config.log_file("quiet"), "hello\n").expect("log");
        assert_eq!(engine.logs("quiet").expect("logs"), "hello\n");
    }

    #[test]
    fn commit_needs_a_mounted_rootfs() {
        let (_dir, engine) = engine();
        let _ = engine
            .containers
            .record(1, &["top".into()], "box", None, "busybox")
            .expect("record");
        assert!(matches!(
            engine.commit("box", "snapshot"),
            Err(BurrowError::InvalidState { .. })
        ));
        assert!(matches!(
            engine.commit("box", "bad/name"),
            Err(BurrowError::Config { .. })
        ));
    }

    fn quick_stop_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = RuntimeConfig::new(dir.path().join("state"), dir.path().join("data"));
        config.stop_grace = Duration::from_millis(300);
        (dir, Engine::new(config))
    }

    fn spawn_recorded(engine: &Engine, name: &str, script: &str) -> std::process::Child {
        let child = std::process::Command::new("sh")
            .args(["-c", script])
            .spawn()
            .expect("spawn");
        let pid = i32::try_from(child.id()).expect("pid");
        let _ = engine
            .containers
            .record(pid, &["sh".into()], name, None, "busybox")
            .expect("record");
        child
    }

    #[test]
    fn stop_then_remove_leaves_nothing_behind() {
        let (_dir, engine) = quick_stop_engine();
        let mut child = spawn_recorded(&engine, "svc", "sleep 60");

        let stopped = engine.stop("svc").expect("stop");
        assert_eq!(stopped.status, ContainerStatus::Stopped);
        assert_eq!(stopped.pid, None);
        let _ = child.wait().expect("reap");

        engine.remove("svc").expect("remove");
        assert!(engine.get("svc").expect_err("removed").is_not_found());
    }

    #[test]
    fn stop_waits_for_a_process_that_ignores_sigterm() {
        let (_dir, engine) = quick_stop_engine();
        let mut child = spawn_recorded(&engine, "stubborn", "trap '' TERM; while :; do :; done");
        std::thread::sleep(Duration::from_millis(100));
        let pid = i32::try_from(child.id()).expect("pid");

        let stopped = engine.stop("stubborn").expect("stop");
        assert_eq!(stopped.status, ContainerStatus::Stopped);
        assert!(!process_exists(pid));
        let _ = child.wait().expect("reap");
    }

    #[test]
    fn long_names_fall_back_to_id_for_hostname() {
        let id = ContainerId::new("0123456789");
        assert_eq!(hostname_for("web", &id), "web");
        assert_eq!(hostname_for(&"x".repeat(80), &id), "0123456789");
    }
}
