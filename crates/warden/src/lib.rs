//! Process supervision over a loopback HTTP control plane, plus a persistent
//! interactive session shell multiplexed over pipes.
//!
//! The daemon spawns and tracks worker servers and relay processes on behalf
//! of remote callers; the session shell runs one-shot commands inside a
//! single long-lived shell per active project.

mod client;
mod daemon;
mod routes;
mod shell;

#[cfg(test)]
mod test_support;

pub use client::DaemonClient;
pub use daemon::SupervisorDaemon;
pub use routes::router;
pub use shell::SessionShell;
