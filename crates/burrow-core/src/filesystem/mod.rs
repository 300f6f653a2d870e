//! Filesystem management for container isolation.
//!
//! Provides `OverlayFS` layer management, `pivot_root` for root filesystem
//! switching, and mount utilities.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;

pub use mount::{HostMounter, Mounter};
pub use overlayfs::OverlayConfig;
