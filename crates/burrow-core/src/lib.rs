//! # burrow-core
//!
//! Low-level Linux isolation primitives for the burrow runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: clone flags for new containers, `setns` joins for
//!   `exec`, and scoped network namespace entry.
//! - **Cgroups v1**: memory, cpu share and cpuset limits.
//! - **Filesystem**: `OverlayFS`, bind mounts, and `pivot_root`.
//! - **Commands**: bounded execution of `ip` and `iptables`.

#![cfg_attr(
    test,
    allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)
)]

pub mod cgroup;
pub mod command;
pub mod filesystem;
pub mod namespace;
