//! Linux providers backed by `/proc` and `/sys`.
//!
//! Every provider takes its filesystem roots at construction so the parsers
//! can be pointed at a fixture tree in tests.

mod net;
mod process;
mod system;

pub use net::ProcfsConnections;
pub use process::ProcfsProcesses;
pub use system::ProcfsStats;

use std::path::{Path, PathBuf};

use crate::actions::PriorityLevel;
use crate::provider::ProcessControl;

pub(crate) const PROC_ROOT: &str = "/proc";
pub(crate) const SYS_ROOT: &str = "/sys";

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn read_trimmed(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let v = raw.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

fn clk_tck() -> f64 {
    // SAFETY: `sysconf` is thread-safe for this query and has no side effects.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz > 0 { hz as f64 } else { 100.0 }
}

fn page_size() -> u64 {
    // SAFETY: as above.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
}

fn online_cpus() -> f64 {
    // SAFETY: as above.
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 { n as f64 } else { 1.0 }
}

/// Numeric entries of `root`, i.e. the pids under a procfs mount.
fn list_pids(root: &Path) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut pids: Vec<u32> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse().ok()))
        .collect();
    pids.sort_unstable();
    pids
}

/// Aggregate CPU jiffies from the first line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

impl CpuTimes {
    fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().find_map(|l| l.strip_prefix("cpu "))?;
        let parts: Vec<u64> = line
            .split_whitespace()
            .filter_map(|s| s.parse().ok())
            .collect();
        if parts.len() < 4 {
            return None;
        }
        // user nice system idle iowait irq softirq steal; guest time is
        // already folded into user.
        let idle = parts[3] + parts.get(4).copied().unwrap_or(0);
        let total: u64 = parts.iter().take(8).sum();
        Some(Self {
            busy: total.saturating_sub(idle),
            total,
        })
    }

    fn read(root: &Path) -> Option<Self> {
        Self::parse(&std::fs::read_to_string(root.join("stat")).ok()?)
    }

    /// Busy percentage between `earlier` and `self`.
    fn usage_since(self, earlier: Self) -> f64 {
        let total = self.total.saturating_sub(earlier.total);
        if total == 0 {
            return 0.0;
        }
        let busy = self.busy.saturating_sub(earlier.busy);
        (busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

// ---------------------------------------------------------------------------
// Process control
// ---------------------------------------------------------------------------

/// Signals and scheduling changes through libc, names and paths from procfs.
#[derive(Debug, Clone)]
pub struct ProcfsControl {
    root: PathBuf,
}

impl Default for ProcfsControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsControl {
    pub fn new() -> Self {
        Self::with_root(PROC_ROOT)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ProcessControl for ProcfsControl {
    fn terminate(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: kill(2) only reads its arguments.
        unsafe { libc::kill(pid, libc::SIGKILL) == 0 }
    }

    fn set_priority(&self, pid: u32, priority_class: u32) -> bool {
        let nice = PriorityLevel::from_class(priority_class)
            .unwrap_or(PriorityLevel::Normal)
            .nice();
        // SAFETY: setpriority(2) only reads its arguments.
        unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice) == 0 }
    }

    fn full_path(&self, pid: u32) -> Option<String> {
        std::fs::read_link(self.root.join(pid.to_string()).join("exe"))
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        read_trimmed(&self.root.join(pid.to_string()).join("comm"))
    }
}
