//! Forcible termination of the external application by process name

use std::path::Path;

use sysinfo::{ProcessStatus, System};
use tracing::{debug, warn};

/// Terminates every running instance of the external application
pub trait ProcessReaper: Send + Sync {
    /// Kill all matching processes; returns how many were signalled
    fn kill_all(&self) -> usize;

    /// Matching processes currently alive
    fn running(&self) -> usize;
}

/// Matches host processes by executable name
///
/// Host-wide: unrelated instances of the same application are killed too.
#[derive(Debug, Clone)]
pub struct NameReaper {
    names: Vec<String>,
}

impl NameReaper {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| normalize(n.as_ref()))
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    #[cfg(test)]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn matches(&self, process: &sysinfo::Process) -> bool {
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return false;
        }
        let name = normalize(process.name());
        let argv0 = process
            .cmd()
            .first()
            .and_then(|c| Path::new(c).file_name())
            .map(|n| normalize(&n.to_string_lossy()));

        self.names
            .iter()
            .any(|wanted| *wanted == name || argv0.as_deref() == Some(wanted.as_str()))
    }

    fn scan(&self) -> System {
        let mut system = System::new();
        system.refresh_processes();
        system
    }
}

impl ProcessReaper for NameReaper {
    fn kill_all(&self) -> usize {
        let system = self.scan();
        let own_pid = sysinfo::get_current_pid().ok();
        let mut killed = 0;

        for (pid, process) in system.processes() {
            if Some(*pid) == own_pid || !self.matches(process) {
                continue;
            }
            if process.kill() {
                debug!(pid = pid.as_u32(), name = process.name(), "Killed external application process");
                killed += 1;
            } else {
                warn!(pid = pid.as_u32(), name = process.name(), "Failed to kill external application process");
            }
        }
        killed
    }

    fn running(&self) -> usize {
        let system = self.scan();
        system.processes().values().filter(|p| self.matches(p)).count()
    }
}

// Case-insensitive, without a Windows ".exe" suffix
fn normalize(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}
