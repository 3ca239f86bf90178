//! Unix implementation of the warden process capabilities.
//!
//! Process-group signalling with SIGTERM/SIGKILL escalation lives here,
//! behind the platform-independent traits from warden-core.

#[cfg(not(unix))]
compile_error!("warden-unix supports Unix targets only; process supervision is defined in terms of process groups and signals");

mod process;
mod sweep;

pub use process::{UnixProcessHandle, UnixProcessSpawner};
pub use sweep::find_processes_matching;
