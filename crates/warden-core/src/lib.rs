//! Warden Core - Platform-independent abstractions for process supervision
//!
//! This crate provides the process traits, registries, configurations, and
//! error types shared by the platform implementation and the daemon.

mod config;
mod error;
mod info;
mod process;
mod registry;

pub use config::*;
pub use error::*;
pub use info::*;
pub use process::*;
pub use registry::*;
