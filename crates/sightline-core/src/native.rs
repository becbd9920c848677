//! Provider backed by a shared library exporting the telemetry C ABI.
//!
//! Every export is resolved once at load time and copied out as a plain
//! function pointer; the [`Library`] is kept alive alongside them for the
//! lifetime of the provider.

use std::ffi::{CStr, c_char, c_void};
use std::fmt;
use std::path::{Path, PathBuf};

use libloading::Library;

use crate::error::{Result, TelemetryError};
use crate::provider::{
    ConnectionProvider, ProcessControl, ProcessProvider, ProviderHandle, RefreshScope,
    StatsProvider,
};
use crate::record::{RawConnection, RawPerformanceSnapshot, RawProcessDetail};

/// Path buffer handed to the full-path export.
const PATH_CAPACITY: usize = 4096;

type CreateFn = unsafe extern "C" fn() -> *mut c_void;
type HandleFn = unsafe extern "C" fn(*mut c_void);
type HandleBoolFn = unsafe extern "C" fn(*mut c_void) -> bool;
type CountFn = unsafe extern "C" fn(*mut c_void) -> usize;
type CopyFn = unsafe extern "C" fn(*mut c_void, *mut RawConnection, usize) -> usize;
type SizeFn = unsafe extern "C" fn() -> i32;
type IntervalFn = unsafe extern "C" fn(*mut c_void, u32) -> bool;
type BoolFn = unsafe extern "C" fn() -> bool;
type VoidFn = unsafe extern "C" fn();
type RateFn = unsafe extern "C" fn() -> f64;
type SnapshotFn = unsafe extern "C" fn() -> RawPerformanceSnapshot;
type ListFn = unsafe extern "C" fn(*mut RawProcessDetail, i32) -> i32;
type PidFn = unsafe extern "C" fn(u32) -> bool;
type PriorityFn = unsafe extern "C" fn(u32, u32) -> bool;
type PathFn = unsafe extern "C" fn(u32, *mut c_char, u32) -> bool;

struct Exports {
    net_create: CreateFn,
    net_destroy: HandleFn,
    net_refresh: HandleBoolFn,
    net_refresh_tcp: HandleBoolFn,
    net_refresh_udp: HandleBoolFn,
    net_count: CountFn,
    net_copy: CopyFn,
    net_record_size: SizeFn,
    net_set_interval: IntervalFn,
    stats_init: BoolFn,
    stats_update: VoidFn,
    stats_cpu: RateFn,
    stats_disk_read: RateFn,
    stats_disk_write: RateFn,
    stats_cleanup: VoidFn,
    proc_init: BoolFn,
    proc_snapshot: SnapshotFn,
    proc_list: ListFn,
    proc_cleanup: VoidFn,
    terminate: PidFn,
    set_priority: PriorityFn,
    full_path: PathFn,
}

/// Copy one export out of `library`.
///
/// # Safety
///
/// `T` must match the export's real signature.
unsafe fn export<T: Copy>(library: &Library, name: &str) -> Result<T> {
    // SAFETY: upheld by the caller.
    let symbol = unsafe { library.get::<T>(name.as_bytes()) }.map_err(|e| {
        TelemetryError::ProviderUnavailable(format!("missing export {name}: {e}"))
    })?;
    Ok(*symbol)
}

impl Exports {
    /// # Safety
    ///
    /// `library` must implement the telemetry C ABI.
    unsafe fn bind(library: &Library) -> Result<Self> {
        // SAFETY: every type alias above mirrors the C declaration.
        unsafe {
            Ok(Self {
                net_create: export(library, "NetworkMonitor_Create")?,
                net_destroy: export(library, "NetworkMonitor_Destroy")?,
                net_refresh: export(library, "NetworkMonitor_Refresh")?,
                net_refresh_tcp: export(library, "NetworkMonitor_RefreshTcp")?,
                net_refresh_udp: export(library, "NetworkMonitor_RefreshUdp")?,
                net_count: export(library, "NetworkMonitor_GetConnectionCount")?,
                net_copy: export(library, "NetworkMonitor_CopyConnections")?,
                net_record_size: export(library, "NetworkConnectionInfo_GetSize")?,
                net_set_interval: export(library, "NetworkMonitor_SetUpdateInterval")?,
                stats_init: export(library, "InitializeSystemMonitor")?,
                stats_update: export(library, "UpdateSystemStats")?,
                stats_cpu: export(library, "GetCpuUsage")?,
                stats_disk_read: export(library, "GetDiskReadRate")?,
                stats_disk_write: export(library, "GetDiskWriteRate")?,
                stats_cleanup: export(library, "CleanupSystemMonitor")?,
                proc_init: export(library, "InitializeSystemMethods")?,
                proc_snapshot: export(library, "GetSystemPerformanceSnapshot")?,
                proc_list: export(library, "GetDetailedProcessList")?,
                proc_cleanup: export(library, "CleanupSystemMethods")?,
                terminate: export(library, "TerminateSelectedProcess")?,
                set_priority: export(library, "SetProcessPriority")?,
                full_path: export(library, "GetProcessFullPath")?,
            })
        }
    }
}

/// A loaded provider library. Serves all four provider traits.
pub struct NativeLibrary {
    path: PathBuf,
    exports: Exports,
    _library: Library,
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl NativeLibrary {
    /// Load `path` and resolve every export. Any failure is fatal for the
    /// backend and reported as [`TelemetryError::ProviderUnavailable`].
    pub fn load(path: &Path) -> Result<Self> {
        // SAFETY: loading runs the library's initialisers. The path comes
        // from operator configuration.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            TelemetryError::ProviderUnavailable(format!("cannot load {}: {e}", path.display()))
        })?;
        // SAFETY: a library configured as a provider implements the ABI.
        let exports = unsafe { Exports::bind(&library) }?;
        Ok(Self {
            path: path.to_path_buf(),
            exports,
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn session_ptr(handle: ProviderHandle) -> *mut c_void {
    handle.as_raw() as *mut c_void
}

// SAFETY (all impls below): every call goes through an export resolved with
// its declared signature, and the library outlives `self.exports`. Buffers
// passed out are valid for the lengths given alongside them.

impl ConnectionProvider for NativeLibrary {
    fn name(&self) -> &'static str {
        "native"
    }

    fn create(&self) -> Option<ProviderHandle> {
        let ptr = unsafe { (self.exports.net_create)() };
        ProviderHandle::from_raw(ptr as usize)
    }

    fn destroy(&self, handle: ProviderHandle) {
        unsafe { (self.exports.net_destroy)(session_ptr(handle)) }
    }

    fn refresh(&self, handle: ProviderHandle, scope: RefreshScope) -> bool {
        let f = match scope {
            RefreshScope::All => self.exports.net_refresh,
            RefreshScope::TcpOnly => self.exports.net_refresh_tcp,
            RefreshScope::UdpOnly => self.exports.net_refresh_udp,
        };
        unsafe { f(session_ptr(handle)) }
    }

    fn record_count(&self, handle: ProviderHandle) -> usize {
        unsafe { (self.exports.net_count)(session_ptr(handle)) }
    }

    fn copy_into(&self, handle: ProviderHandle, dst: &mut [RawConnection]) -> usize {
        let n = unsafe { (self.exports.net_copy)(session_ptr(handle), dst.as_mut_ptr(), dst.len()) };
        n.min(dst.len())
    }

    fn record_size(&self) -> usize {
        let size = unsafe { (self.exports.net_record_size)() };
        usize::try_from(size).unwrap_or(0)
    }

    fn set_interval(&self, handle: ProviderHandle, interval_ms: u32) -> bool {
        unsafe { (self.exports.net_set_interval)(session_ptr(handle), interval_ms) }
    }
}

impl StatsProvider for NativeLibrary {
    fn name(&self) -> &'static str {
        "native"
    }

    fn initialize(&self) -> bool {
        unsafe { (self.exports.stats_init)() }
    }

    fn cleanup(&self) {
        unsafe { (self.exports.stats_cleanup)() }
    }

    fn update(&self) -> bool {
        unsafe { (self.exports.stats_update)() };
        true
    }

    fn cpu_usage(&self) -> f64 {
        unsafe { (self.exports.stats_cpu)() }
    }

    fn disk_read_rate(&self) -> f64 {
        unsafe { (self.exports.stats_disk_read)() }
    }

    fn disk_write_rate(&self) -> f64 {
        unsafe { (self.exports.stats_disk_write)() }
    }
}

impl ProcessProvider for NativeLibrary {
    fn name(&self) -> &'static str {
        "native"
    }

    fn initialize(&self) -> bool {
        unsafe { (self.exports.proc_init)() }
    }

    fn cleanup(&self) {
        unsafe { (self.exports.proc_cleanup)() }
    }

    fn performance_snapshot(&self) -> Option<RawPerformanceSnapshot> {
        Some(unsafe { (self.exports.proc_snapshot)() })
    }

    fn detailed_process_list(&self, dst: &mut [RawProcessDetail]) -> usize {
        let max = i32::try_from(dst.len()).unwrap_or(i32::MAX);
        let n = unsafe { (self.exports.proc_list)(dst.as_mut_ptr(), max) };
        usize::try_from(n).unwrap_or(0).min(dst.len())
    }
}

impl ProcessControl for NativeLibrary {
    fn terminate(&self, pid: u32) -> bool {
        unsafe { (self.exports.terminate)(pid) }
    }

    fn set_priority(&self, pid: u32, priority_class: u32) -> bool {
        unsafe { (self.exports.set_priority)(pid, priority_class) }
    }

    fn full_path(&self, pid: u32) -> Option<String> {
        let mut buf = vec![0 as c_char; PATH_CAPACITY];
        let ok = unsafe { (self.exports.full_path)(pid, buf.as_mut_ptr(), PATH_CAPACITY as u32) };
        if !ok {
            return None;
        }
        // The export may fill the buffer without a terminator.
        if let Some(last) = buf.last_mut() {
            *last = 0;
        }
        // SAFETY: the buffer is NUL-terminated above.
        let path = unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        (!path.is_empty()).then_some(path)
    }

    fn well_known_names(&self) -> &'static [(u32, &'static str)] {
        &[(0, "System Idle"), (4, "System")]
    }
}
