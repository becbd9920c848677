//! Capability contract between the engine and whatever collects the data.
//!
//! Providers are black boxes: the engine never decides what counts as a
//! connection or how a CPU percentage is measured. It only creates sessions,
//! asks for sampling passes and copies fixed-layout records out.
//!
//! Two backends ship with the crate: [`NativeLibrary`](crate::native::NativeLibrary)
//! binds a shared library exporting the C ABI, and on Linux the procfs
//! providers read `/proc` directly. [`Backend::detect`] picks one.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::record::{RawConnection, RawPerformanceSnapshot, RawProcessDetail};

/// Opaque token for one provider-side session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderHandle(NonZeroUsize);

impl ProviderHandle {
    /// Wrap a raw session token. Zero (a null session) yields `None`.
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

/// Which tables a connection refresh should sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshScope {
    All,
    TcpOnly,
    UdpOnly,
}

/// Handle-based connection table provider.
pub trait ConnectionProvider: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Allocate a session. `None` means the provider cannot serve one.
    fn create(&self) -> Option<ProviderHandle>;

    /// Release a session. Called at most once per handle.
    fn destroy(&self, handle: ProviderHandle);

    /// Run one sampling pass. `false` signals a transient failure.
    fn refresh(&self, handle: ProviderHandle, scope: RefreshScope) -> bool;

    /// Records held by the session after the last refresh.
    fn record_count(&self, handle: ProviderHandle) -> usize;

    /// Copy up to `dst.len()` records and return how many were written.
    fn copy_into(&self, handle: ProviderHandle, dst: &mut [RawConnection]) -> usize;

    /// Size in bytes of one record as the provider lays it out.
    fn record_size(&self) -> usize;

    /// Adjust native-side sampling cadence.
    fn set_interval(&self, handle: ProviderHandle, interval_ms: u32) -> bool;
}

/// Deep process list plus the global performance snapshot.
pub trait ProcessProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn initialize(&self) -> bool;

    fn cleanup(&self);

    /// Size in bytes of one process entry as the provider lays it out.
    fn record_size(&self) -> usize {
        std::mem::size_of::<RawProcessDetail>()
    }

    fn performance_snapshot(&self) -> Option<RawPerformanceSnapshot>;

    /// Fill `dst` with up to `dst.len()` processes and return the count.
    fn detailed_process_list(&self, dst: &mut [RawProcessDetail]) -> usize;
}

/// Fast CPU and disk throughput counters.
pub trait StatsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn initialize(&self) -> bool;

    fn cleanup(&self);

    fn update(&self) -> bool;

    fn cpu_usage(&self) -> f64;

    /// Bytes per second.
    fn disk_read_rate(&self) -> f64;

    /// Bytes per second.
    fn disk_write_rate(&self) -> f64;
}

/// Foreground actions against a single process.
pub trait ProcessControl: Send + Sync {
    fn terminate(&self, pid: u32) -> bool;

    fn set_priority(&self, pid: u32, priority_class: u32) -> bool;

    fn full_path(&self, pid: u32) -> Option<String>;

    /// Short display name, derived from the executable path by default.
    fn process_name(&self, pid: u32) -> Option<String> {
        let path = self.full_path(pid)?;
        Path::new(&path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
    }

    /// Pids whose names are fixed by the platform.
    fn well_known_names(&self) -> &'static [(u32, &'static str)] {
        &[(0, "System Idle")]
    }
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// The set of providers available on this machine. Any slot may be empty, in
/// which case the matching feed shows no data.
#[derive(Clone, Default)]
pub struct Backend {
    pub label: &'static str,
    pub connections: Option<Arc<dyn ConnectionProvider>>,
    pub processes: Option<Arc<dyn ProcessProvider>>,
    pub stats: Option<Arc<dyn StatsProvider>>,
    pub control: Option<Arc<dyn ProcessControl>>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("label", &self.label)
            .field("connections", &self.connections.is_some())
            .field("processes", &self.processes.is_some())
            .field("stats", &self.stats.is_some())
            .field("control", &self.control.is_some())
            .finish()
    }
}

impl Backend {
    /// A backend with no providers at all.
    pub fn none() -> Self {
        Self {
            label: "none",
            ..Self::default()
        }
    }

    /// Use the configured native library if there is one, otherwise the
    /// platform's built-in providers.
    pub fn detect(config: &MonitorConfig) -> Result<Self> {
        if let Some(path) = &config.native_library {
            let lib = Arc::new(crate::native::NativeLibrary::load(path)?);
            log::info!("using native telemetry library {}", path.display());
            return Ok(Self {
                label: "native",
                connections: Some(lib.clone()),
                processes: Some(lib.clone()),
                stats: Some(lib.clone()),
                control: Some(lib),
            });
        }
        Ok(Self::platform())
    }

    #[cfg(target_os = "linux")]
    fn platform() -> Self {
        use crate::procfs::{ProcfsConnections, ProcfsControl, ProcfsProcesses, ProcfsStats};
        Self {
            label: "procfs",
            connections: Some(Arc::new(ProcfsConnections::new())),
            processes: Some(Arc::new(ProcfsProcesses::new())),
            stats: Some(Arc::new(ProcfsStats::new())),
            control: Some(Arc::new(ProcfsControl::new())),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn platform() -> Self {
        log::warn!("no built-in telemetry provider for this platform; configure a native library");
        Self::none()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_none()
            && self.processes.is_none()
            && self.stats.is_none()
            && self.control.is_none()
    }
}


#[cfg(test)]
pub(crate) mod testing {
    //! In-memory providers for unit tests.

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::record::ConnectionRecord;

    pub struct FakeConnections {
        records: Mutex<Vec<RawConnection>>,
        record_size: usize,
        available: bool,
        pub fail_refresh: AtomicBool,
        pub refreshes: AtomicUsize,
        pub copy_calls: AtomicUsize,
        pub destroyed: AtomicUsize,
        pub intervals: Mutex<Vec<u32>>,
        pub scopes: Mutex<Vec<RefreshScope>>,
    }

    impl FakeConnections {
        pub fn new() -> Self {
            Self::with_record_size(size_of::<RawConnection>())
        }

        pub fn with_record_size(record_size: usize) -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                record_size,
                available: true,
                fail_refresh: AtomicBool::new(false),
                refreshes: AtomicUsize::new(0),
                copy_calls: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
                intervals: Mutex::new(Vec::new()),
                scopes: Mutex::new(Vec::new()),
            }
        }

        pub fn unavailable() -> Self {
            Self {
                available: false,
                ..Self::new()
            }
        }

        pub fn set_records(&self, records: Vec<ConnectionRecord>) {
            *self.records.lock().unwrap() = records.iter().map(RawConnection::encode).collect();
        }

        pub fn set_raw(&self, raw: Vec<RawConnection>) {
            *self.records.lock().unwrap() = raw;
        }
    }

    impl ConnectionProvider for FakeConnections {
        fn name(&self) -> &'static str {
            "fake"
        }
        fn create(&self) -> Option<ProviderHandle> {
            if self.available {
                ProviderHandle::from_raw(1)
            } else {
                None
            }
        }
        fn destroy(&self, _handle: ProviderHandle) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
        fn refresh(&self, _handle: ProviderHandle, scope: RefreshScope) -> bool {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            self.scopes.lock().unwrap().push(scope);
            !self.fail_refresh.load(Ordering::SeqCst)
        }
        fn record_count(&self, _handle: ProviderHandle) -> usize {
            self.records.lock().unwrap().len()
        }
        fn copy_into(&self, _handle: ProviderHandle, dst: &mut [RawConnection]) -> usize {
            self.copy_calls.fetch_add(1, Ordering::SeqCst);
            let records = self.records.lock().unwrap();
            let n = records.len().min(dst.len());
            dst[..n].copy_from_slice(&records[..n]);
            n
        }
        fn record_size(&self) -> usize {
            self.record_size
        }
        fn set_interval(&self, _handle: ProviderHandle, interval_ms: u32) -> bool {
            self.intervals.lock().unwrap().push(interval_ms);
            true
        }
    }

    pub struct FakeProcesses {
        rows: Mutex<Vec<RawProcessDetail>>,
        pub cleanups: AtomicUsize,
    }

    impl FakeProcesses {
        pub fn new() -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
                cleanups: AtomicUsize::new(0),
            }
        }

        pub fn set_pids(&self, pids: &[u32]) {
            let rows = pids
                .iter()
                .map(|&pid| {
                    let mut raw = RawProcessDetail {
                        pid,
                        cpu_percent: 1.0,
                        memory_mb: 8.0,
                        ..Default::default()
                    };
                    raw.set_name(&format!("proc{pid}"));
                    raw
                })
                .collect();
            *self.rows.lock().unwrap() = rows;
        }
    }

    impl ProcessProvider for FakeProcesses {
        fn name(&self) -> &'static str {
            "fake"
        }
        fn initialize(&self) -> bool {
            true
        }
        fn cleanup(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
        fn performance_snapshot(&self) -> Option<RawPerformanceSnapshot> {
            Some(RawPerformanceSnapshot {
                cpu_percent: 12.0,
                process_count: self.rows.lock().unwrap().len() as u32,
                ..Default::default()
            })
        }
        fn detailed_process_list(&self, dst: &mut [RawProcessDetail]) -> usize {
            let rows = self.rows.lock().unwrap();
            let n = rows.len().min(dst.len());
            dst[..n].copy_from_slice(&rows[..n]);
            n
        }
    }

    pub struct FakeStats {
        cpu: f64,
        read: f64,
        write: f64,
        pub cleanups: AtomicUsize,
    }

    impl FakeStats {
        pub fn new(cpu: f64, read: f64, write: f64) -> Self {
            Self {
                cpu,
                read,
                write,
                cleanups: AtomicUsize::new(0),
            }
        }
    }

    impl StatsProvider for FakeStats {
        fn name(&self) -> &'static str {
            "fake"
        }
        fn initialize(&self) -> bool {
            true
        }
        fn cleanup(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
        fn update(&self) -> bool {
            true
        }
        fn cpu_usage(&self) -> f64 {
            self.cpu
        }
        fn disk_read_rate(&self) -> f64 {
            self.read
        }
        fn disk_write_rate(&self) -> f64 {
            self.write
        }
    }
}
