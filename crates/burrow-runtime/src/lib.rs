//! Container lifecycle management for burrow.
//!
//! The [`engine::Engine`] drives each operation; [`process`] and [`init`]
//! are the two halves of launching a container, and [`exec`] re-enters a
//! running one.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod engine;
pub mod exec;
pub mod init;
pub mod logs;
pub mod process;
pub mod state;

pub use container::ContainerRecord;
pub use engine::{Engine, RunOutcome, RunRequest};
