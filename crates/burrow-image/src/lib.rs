//! # burrow-image
//!
//! Image and filesystem layering for the burrow runtime.
//!
//! Handles:
//! - **Store**: image archives and the read-only layers extracted from them.
//! - **Layers**: tar extraction into a shared layer directory.
//! - **Archives**: committing a container's filesystem back into an image.
//! - **Workspaces**: the per-container overlay mount and its volume.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod archive;
pub mod layer;
pub mod store;
pub mod workspace;
