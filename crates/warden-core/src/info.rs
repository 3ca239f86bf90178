use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::process::ProcessId;

/// Metadata for a managed worker server process.
///
/// This is the wire shape returned by the control plane; the owning process
/// handle lives in the registry entry, never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub pid: ProcessId,
    pub port: u16,
    pub projects_dir: PathBuf,
    pub logfile: PathBuf,
    pub audit_log: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// Metadata for a managed relay process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayInfo {
    pub pid: ProcessId,
    pub port: u16,
    pub logfile: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
}
