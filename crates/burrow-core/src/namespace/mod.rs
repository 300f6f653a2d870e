//! Linux namespace management for container isolation.
//!
//! Containers are created with all of their namespaces in one `clone(2)`
//! call; `exec` later joins them one by one with `setns(2)`.

pub mod join;
pub mod network;
pub mod uts;

use std::path::PathBuf;

use nix::sched::CloneFlags;

/// A namespace kind the runtime isolates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Hostname and domain name.
    Uts,
    /// Network stack.
    Net,
    /// Process ids.
    Pid,
    /// Mount table.
    Mnt,
}

impl Namespace {
    /// Order in which `exec` joins a container. The mount namespace comes
    /// last because it changes what `/proc` resolves to.
    pub const JOIN_ORDER: [Self; 5] = [Self::Ipc, Self::Uts, Self::Net, Self::Pid, Self::Mnt];

    /// Entry name under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::Net => "net",
            Self::Pid => "pid",
            Self::Mnt => "mnt",
        }
    }

    /// Flag selecting this namespace in `clone(2)` and `setns(2)`.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Net => CloneFlags::CLONE_NEWNET,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Mnt => CloneFlags::CLONE_NEWNS,
        }
    }

    /// Namespace file of process `pid`.
    #[must_use]
    pub fn path(self, pid: i32) -> PathBuf {
        PathBuf::from(format!("/proc/{pid}/ns/{}", self.proc_name()))
    }
}

/// Flags for the container's `clone(2)`: a fresh instance of every
/// namespace the runtime isolates.
#[must_use]
pub fn container_clone_flags() -> CloneFlags {
    Namespace::JOIN_ORDER
        .iter()
        .fold(CloneFlags::empty(), |flags, ns| flags | ns.clone_flag())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_flags_cover_every_namespace() {
        let flags = container_clone_flags();
        for flag in [
            CloneFlags::CLONE_NEWUTS,
            CloneFlags::CLONE_NEWPID,
            CloneFlags::CLONE_NEWNS,
            CloneFlags::CLONE_NEWNET,
            CloneFlags::CLONE_NEWIPC,
        ] {
            assert!(flags.contains(flag));
        }
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
    }

    #[test]
    fn mount_namespace_is_joined_last() {
        assert_eq!(Namespace::JOIN_ORDER.last(), Some(&Namespace::Mnt));
        assert_eq!(
            Namespace::Net.path(42),
            PathBuf::from("/proc/42/ns/net")
        );
    }
}
