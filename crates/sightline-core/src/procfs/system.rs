//! Fast CPU and whole-disk throughput from `/proc/stat` and `/proc/diskstats`.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use super::{CpuTimes, PROC_ROOT};
use crate::provider::StatsProvider;

const SECTOR_BYTES: u64 = 512;

const VIRTUAL_DEVICE_PREFIXES: [&str; 8] = ["loop", "ram", "dm-", "md", "zram", "sr", "fd", "nbd"];

/// Whether a diskstats entry is a whole physical disk rather than a
/// partition or a virtual device, so traffic is not counted twice.
fn is_whole_disk(name: &str) -> bool {
    if VIRTUAL_DEVICE_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return false;
    }
    // nvme0n1 vs nvme0n1p2, mmcblk0 vs mmcblk0p1.
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        return !name.contains('p');
    }
    // sda vs sda1, and the same for hd/vd/xvd and anything unknown.
    !name.ends_with(|c: char| c.is_ascii_digit())
}

/// Summed read and write sectors over whole disks.
fn parse_diskstats(text: &str) -> (u64, u64) {
    let mut read = 0u64;
    let mut written = 0u64;
    for line in text.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 || !is_whole_disk(parts[2]) {
            continue;
        }
        let counter = |i: usize| parts[i].parse::<u64>().unwrap_or(0);
        // major minor name reads merged sectors_read ms writes merged sectors_written
        read = read.saturating_add(counter(5));
        written = written.saturating_add(counter(9));
    }
    (read, written)
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    cpu: CpuTimes,
    read_sectors: u64,
    write_sectors: u64,
    at: Instant,
}

#[derive(Debug, Default)]
struct Rates {
    last: Option<Reading>,
    cpu_percent: f64,
    read_bytes_s: f64,
    write_bytes_s: f64,
}

/// Stats provider computing rates between consecutive updates.
#[derive(Debug)]
pub struct ProcfsStats {
    root: PathBuf,
    rates: Mutex<Rates>,
}

impl Default for ProcfsStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsStats {
    pub fn new() -> Self {
        Self::with_root(PROC_ROOT)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            rates: Mutex::new(Rates::default()),
        }
    }

    fn read(&self) -> Option<Reading> {
        let cpu = CpuTimes::read(&self.root)?;
        let (read_sectors, write_sectors) = std::fs::read_to_string(self.root.join("diskstats"))
            .map(|t| parse_diskstats(&t))
            .unwrap_or((0, 0));
        Some(Reading {
            cpu,
            read_sectors,
            write_sectors,
            at: Instant::now(),
        })
    }

    fn with_rates<T>(&self, f: impl FnOnce(&Rates) -> T) -> Option<T> {
        self.rates.lock().ok().map(|r| f(&r))
    }
}

impl StatsProvider for ProcfsStats {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn initialize(&self) -> bool {
        let Some(reading) = self.read() else {
            return false;
        };
        match self.rates.lock() {
            Ok(mut rates) => {
                *rates = Rates {
                    last: Some(reading),
                    ..Rates::default()
                };
                true
            }
            Err(_) => false,
        }
    }

    fn cleanup(&self) {
        if let Ok(mut rates) = self.rates.lock() {
            *rates = Rates::default();
        }
    }

    fn update(&self) -> bool {
        let Some(now) = self.read() else {
            return false;
        };
        let Ok(mut rates) = self.rates.lock() else {
            return false;
        };
        if let Some(last) = rates.last {
            let secs = now.at.duration_since(last.at).as_secs_f64();
            rates.cpu_percent = now.cpu.usage_since(last.cpu);
            if secs > 0.0 {
                let read = now.read_sectors.saturating_sub(last.read_sectors) * SECTOR_BYTES;
                let write = now.write_sectors.saturating_sub(last.write_sectors) * SECTOR_BYTES;
                rates.read_bytes_s = read as f64 / secs;
                rates.write_bytes_s = write as f64 / secs;
            }
        }
        rates.last = Some(now);
        true
    }

    fn cpu_usage(&self) -> f64 {
        self.with_rates(|r| r.cpu_percent).unwrap_or(0.0)
    }

    fn disk_read_rate(&self) -> f64 {
        self.with_rates(|r| r.read_bytes_s).unwrap_or(0.0)
    }

    fn disk_write_rate(&self) -> f64 {
        self.with_rates(|r| r.write_bytes_s).unwrap_or(0.0)
    }
}
