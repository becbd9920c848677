//! Per-process rows and the system-wide performance snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{CpuTimes, PROC_ROOT, SYS_ROOT, clk_tck, list_pids, online_cpus, page_size, read_trimmed};
use crate::actions::PriorityLevel;
use crate::provider::ProcessProvider;
use crate::record::{RawPerformanceSnapshot, RawProcessDetail};

const MB: f64 = 1024.0 * 1024.0;

/// Lists requested closer together than this reuse the previous rows, so a
/// grow-and-refetch does not compute rates over a near-zero window.
const RESAMPLE_AFTER: Duration = Duration::from_millis(250);

/// Fields of `/proc/<pid>/stat` the rows need.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PidStat {
    name: String,
    cpu_ticks: u64,
    nice: i32,
    threads: u32,
    rss_pages: u64,
}

impl PidStat {
    fn parse(text: &str) -> Option<Self> {
        // The name may itself contain spaces and parentheses.
        let open = text.find('(')?;
        let close = text.rfind(')')?;
        let name = text.get(open + 1..close)?.to_string();
        let rest: Vec<&str> = text.get(close + 1..)?.split_whitespace().collect();
        if rest.len() < 22 {
            return None;
        }
        let utime: u64 = rest[11].parse().ok()?;
        let stime: u64 = rest[12].parse().ok()?;
        Some(Self {
            name,
            cpu_ticks: utime + stime,
            nice: rest[16].parse().ok()?,
            threads: rest[17].parse().ok()?,
            rss_pages: rest[21].parse().ok()?,
        })
    }
}

/// `read_bytes` and `write_bytes` from `/proc/<pid>/io`.
fn parse_io(text: &str) -> (u64, u64) {
    let mut read = 0;
    let mut write = 0;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().parse().unwrap_or(0);
        match key.trim() {
            "read_bytes" => read = value,
            "write_bytes" => write = value,
            _ => {}
        }
    }
    (read, write)
}

/// Memory figures from `/proc/meminfo`, in kB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct MemInfo {
    total_kb: u64,
    available_kb: u64,
    committed_kb: u64,
}

impl MemInfo {
    fn parse(text: &str) -> Self {
        let mut info = Self::default();
        for line in text.lines() {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let Some(kb) = rest
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<u64>().ok())
            else {
                continue;
            };
            match key.trim() {
                "MemTotal" => info.total_kb = kb,
                "MemAvailable" => info.available_kb = kb,
                "Committed_AS" => info.committed_kb = kb,
                _ => {}
            }
        }
        info
    }

    fn used_percent(&self) -> f64 {
        if self.total_kb == 0 {
            return 0.0;
        }
        let used = self.total_kb.saturating_sub(self.available_kb);
        used as f64 / self.total_kb as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy)]
struct Counters {
    cpu_ticks: u64,
    read_bytes: u64,
    write_bytes: u64,
}

#[derive(Debug, Default)]
struct SamplerState {
    previous: HashMap<u32, Counters>,
    sampled_at: Option<Instant>,
    rows: Vec<RawProcessDetail>,
    snapshot_cpu: Option<CpuTimes>,
}

/// Process provider over `/proc/<pid>`.
///
/// Rates are deltas against the previous list, so the first list after
/// initialisation reports zero CPU and disk activity.
#[derive(Debug)]
pub struct ProcfsProcesses {
    root: PathBuf,
    sys_root: PathBuf,
    state: Mutex<SamplerState>,
}

impl Default for ProcfsProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsProcesses {
    pub fn new() -> Self {
        Self::with_roots(PROC_ROOT, SYS_ROOT)
    }

    pub fn with_roots(root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sys_root: sys_root.into(),
            state: Mutex::new(SamplerState::default()),
        }
    }

    fn sample_rows(&self, state: &mut SamplerState) {
        let now = Instant::now();
        let elapsed = state
            .sampled_at
            .map(|t| now.duration_since(t).as_secs_f64())
            .filter(|s| *s > 0.0);
        let ticks_per_sec = clk_tck();
        let cpus = online_cpus();
        let page = page_size();

        let mut rows = Vec::new();
        let mut counters = HashMap::new();
        for pid in list_pids(&self.root) {
            let dir = self.root.join(pid.to_string());
            let Some(stat) = std::fs::read_to_string(dir.join("stat"))
                .ok()
                .and_then(|t| PidStat::parse(&t))
            else {
                // Exited between listing and reading.
                continue;
            };
            let (read_bytes, write_bytes) = std::fs::read_to_string(dir.join("io"))
                .map(|t| parse_io(&t))
                .unwrap_or((0, 0));
            let current = Counters {
                cpu_ticks: stat.cpu_ticks,
                read_bytes,
                write_bytes,
            };

            let mut row = RawProcessDetail {
                pid,
                memory_mb: (stat.rss_pages * page) as f64 / MB,
                thread_count: stat.threads,
                handle_count: count_entries(&dir.join("fd")),
                priority_class: PriorityLevel::from_nice(stat.nice).class() as i32,
                ..Default::default()
            };
            if let (Some(secs), Some(prev)) = (elapsed, state.previous.get(&pid)) {
                let ticks = current.cpu_ticks.saturating_sub(prev.cpu_ticks) as f64;
                row.cpu_percent = (ticks / ticks_per_sec / secs / cpus * 100.0).clamp(0.0, 100.0);
                row.disk_read_mb_s =
                    current.read_bytes.saturating_sub(prev.read_bytes) as f64 / MB / secs;
                row.disk_write_mb_s =
                    current.write_bytes.saturating_sub(prev.write_bytes) as f64 / MB / secs;
            }
            row.set_name(&stat.name);
            counters.insert(pid, current);
            rows.push(row);
        }

        state.previous = counters;
        state.sampled_at = Some(now);
        state.rows = rows;
    }

    fn read_temperature(&self) -> f64 {
        let path = self
            .sys_root
            .join("class/thermal/thermal_zone0/temp");
        read_trimmed(&path)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|milli| milli / 1000.0)
            .unwrap_or(0.0)
    }
}

fn count_entries(dir: &Path) -> u32 {
    std::fs::read_dir(dir).map_or(0, |entries| entries.count() as u32)
}

impl ProcessProvider for ProcfsProcesses {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn initialize(&self) -> bool {
        let ready = CpuTimes::read(&self.root).is_some();
        if !ready {
            log::warn!("{} has no readable stat file", self.root.display());
        }
        ready
    }

    fn cleanup(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = SamplerState::default();
        }
    }

    fn performance_snapshot(&self) -> Option<RawPerformanceSnapshot> {
        let cpu = CpuTimes::read(&self.root)?;
        let mem = MemInfo::parse(&std::fs::read_to_string(self.root.join("meminfo")).ok()?);
        let mut state = self.state.lock().ok()?;
        let cpu_percent = state
            .snapshot_cpu
            .map_or(0.0, |earlier| cpu.usage_since(earlier));
        state.snapshot_cpu = Some(cpu);

        let (process_count, thread_count, handle_count) = if state.rows.is_empty() {
            (list_pids(&self.root).len() as u32, 0, 0)
        } else {
            (
                state.rows.len() as u32,
                state.rows.iter().map(|r| r.thread_count).sum(),
                state.rows.iter().map(|r| r.handle_count).sum(),
            )
        };
        Some(RawPerformanceSnapshot {
            cpu_percent,
            cpu_temperature: self.read_temperature(),
            memory_percent: mem.used_percent(),
            total_physical_mb: mem.total_kb as f64 / 1024.0,
            available_physical_mb: mem.available_kb as f64 / 1024.0,
            process_count,
            thread_count,
            handle_count,
            committed_mb: mem.committed_kb as f64 / 1024.0,
        })
    }

    fn detailed_process_list(&self, dst: &mut [RawProcessDetail]) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let fresh = state
            .sampled_at
            .is_some_and(|t| t.elapsed() < RESAMPLE_AFTER);
        if !fresh {
            self.sample_rows(&mut state);
        }
        let n = state.rows.len().min(dst.len());
        dst[..n].copy_from_slice(&state.rows[..n]);
        n
    }
}
