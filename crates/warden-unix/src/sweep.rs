use sysinfo::System;
use tracing::debug;
use warden_core::ProcessId;

/// Find running processes whose name or command line contains any of the
/// given patterns (case-insensitive). Returns pid and command line.
///
/// Used by the daemon to sweep leftover worker processes from a previous
/// run that are no longer tracked by any registry. The current process is
/// never reported.
pub fn find_processes_matching(patterns: &[String]) -> Vec<(ProcessId, String)> {
    let own_pid = std::process::id();
    let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();

    let mut system = System::new();
    system.refresh_processes_specifics(
        sysinfo::ProcessesToUpdate::All,
        true,
        sysinfo::ProcessRefreshKind::default(),
    );

    let mut matches = Vec::new();
    for (pid, process) in system.processes() {
        let pid = pid.as_u32();
        if pid == own_pid {
            continue;
        }
        let name = process.name().to_string_lossy().to_lowercase();
        let cmdline = process
            .cmd()
            .iter()
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        let cmdline_lower = cmdline.to_lowercase();

        if patterns
            .iter()
            .any(|pat| name.contains(pat) || cmdline_lower.contains(pat))
        {
            debug!("Matched process {pid}: {cmdline}");
            matches.push((pid, cmdline));
        }
    }

    matches
}
