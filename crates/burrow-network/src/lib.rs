//! # burrow-network
//!
//! Virtual networking for burrow containers on a single host.
//!
//! - **IPAM**: a persistent per-subnet bitmap allocator.
//! - **Bridge driver**: one Linux bridge per network, with MASQUERADE for
//!   outbound traffic.
//! - **Endpoints**: a veth pair per container, configured from inside the
//!   container's network namespace.
//! - **Registry**: the set of networks, persisted one file per network.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bitmap;
pub mod bridge;
pub mod endpoint;
pub mod firewall;
pub mod ipam;
pub mod model;
pub mod registry;

pub use model::{Attachment, Endpoint, Network, PortMapping};
pub use registry::NetworkRegistry;
