//! Owned provider sessions.
//!
//! Each feed owns exactly one session. Creation validates that the provider
//! lays records out the way this crate decodes them; a disagreement is fatal
//! and no fetch is ever attempted. Destruction happens once, either through
//! [`destroy`](ConnectionSession::destroy) or on drop, and every call after it
//! fails with [`TelemetryError::Disposed`].

use std::sync::Arc;

use crate::buffer::TransferBuffer;
use crate::error::{Result, TelemetryError};
use crate::provider::{
    ConnectionProvider, ProcessProvider, ProviderHandle, RefreshScope, StatsProvider,
};
use crate::record::{PerformanceSnapshot, RawConnection, RawProcessDetail, SystemStats};

/// Grow-and-refetch attempts before a cycle gives up on a table that keeps
/// outgrowing the buffer.
pub const MAX_FETCH_ATTEMPTS: usize = 4;

fn check_layout(native: usize, expected: usize) -> Result<()> {
    if native == expected {
        Ok(())
    } else {
        Err(TelemetryError::StructLayoutMismatch { native, expected })
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// A live connection-table session.
pub struct ConnectionSession {
    provider: Arc<dyn ConnectionProvider>,
    handle: Option<ProviderHandle>,
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("provider", &self.provider.name())
            .field("handle", &self.handle)
            .finish()
    }
}

impl ConnectionSession {
    pub fn create(provider: Arc<dyn ConnectionProvider>) -> Result<Self> {
        let handle = provider.create().ok_or_else(|| {
            TelemetryError::ProviderUnavailable(format!(
                "{} could not allocate a connection session",
                provider.name()
            ))
        })?;
        if let Err(e) = check_layout(provider.record_size(), size_of::<RawConnection>()) {
            provider.destroy(handle);
            return Err(e);
        }
        log::debug!("{} connection session created", provider.name());
        Ok(Self {
            provider,
            handle: Some(handle),
        })
    }

    fn live(&self) -> Result<ProviderHandle> {
        self.handle
            .ok_or(TelemetryError::Disposed("connection session"))
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_none()
    }

    /// One synchronous sampling pass.
    pub fn refresh(&mut self, scope: RefreshScope) -> Result<()> {
        let handle = self.live()?;
        if self.provider.refresh(handle, scope) {
            Ok(())
        } else {
            Err(TelemetryError::TransientRefreshFailure(format!(
                "{} connection refresh ({scope:?}) failed",
                self.provider.name()
            )))
        }
    }

    pub fn set_interval(&mut self, interval_ms: u32) -> Result<()> {
        let handle = self.live()?;
        if self.provider.set_interval(handle, interval_ms) {
            Ok(())
        } else {
            Err(TelemetryError::TransientRefreshFailure(format!(
                "{} rejected update interval {interval_ms} ms",
                self.provider.name()
            )))
        }
    }

    /// Copy the current table into `buffer` and return the record count.
    ///
    /// If the provider holds more records than fit, the partial copy is
    /// dropped, the buffer grows to the reported total and the copy runs
    /// again.
    pub fn fetch(&mut self, buffer: &mut TransferBuffer<RawConnection>) -> Result<usize> {
        let handle = self.live()?;
        let provider = &self.provider;
        for _ in 0..MAX_FETCH_ATTEMPTS {
            let copied = buffer.fill(|dst| Ok(provider.copy_into(handle, dst)))?;
            let total = provider.record_count(handle);
            if total <= buffer.capacity() {
                return Ok(copied);
            }
            log::debug!(
                "{} reports {total} connections, buffer holds {}; refetching",
                provider.name(),
                buffer.capacity()
            );
            buffer.discard();
            buffer.ensure_capacity(total);
        }
        Err(TelemetryError::TransientRefreshFailure(
            "connection table kept outgrowing the transfer buffer".into(),
        ))
    }

    /// Release the provider session. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.provider.destroy(handle);
            log::debug!("{} connection session destroyed", self.provider.name());
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

/// A deep-process session: global snapshot plus the per-process list.
pub struct ProcessSession {
    provider: Arc<dyn ProcessProvider>,
    live: bool,
}

impl std::fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSession")
            .field("provider", &self.provider.name())
            .field("live", &self.live)
            .finish()
    }
}

impl ProcessSession {
    pub fn create(provider: Arc<dyn ProcessProvider>) -> Result<Self> {
        if !provider.initialize() {
            return Err(TelemetryError::ProviderUnavailable(format!(
                "{} could not initialize process sampling",
                provider.name()
            )));
        }
        if let Err(e) = check_layout(provider.record_size(), size_of::<RawProcessDetail>()) {
            provider.cleanup();
            return Err(e);
        }
        Ok(Self {
            provider,
            live: true,
        })
    }

    fn check_live(&self) -> Result<()> {
        if self.live {
            Ok(())
        } else {
            Err(TelemetryError::Disposed("process session"))
        }
    }

    pub fn is_disposed(&self) -> bool {
        !self.live
    }

    pub fn snapshot(&mut self) -> Result<PerformanceSnapshot> {
        self.check_live()?;
        let raw = self.provider.performance_snapshot().ok_or_else(|| {
            TelemetryError::TransientRefreshFailure(format!(
                "{} returned no performance snapshot",
                self.provider.name()
            ))
        })?;
        raw.decode()
    }

    /// Fill `buffer` with the process list.
    ///
    /// The list call has no separate count, so a completely full buffer is
    /// taken as a sign of truncation. `expected` is the process count from the
    /// latest snapshot (0 if unknown); the buffer is kept larger than it, and
    /// each retry grows to at least 1.5x.
    pub fn fetch(
        &mut self,
        buffer: &mut TransferBuffer<RawProcessDetail>,
        expected: usize,
    ) -> Result<usize> {
        self.check_live()?;
        let provider = &self.provider;
        buffer.ensure_capacity(expected + 1);
        for _ in 0..MAX_FETCH_ATTEMPTS {
            let copied = buffer.fill(|dst| Ok(provider.detailed_process_list(dst)))?;
            if copied < buffer.capacity() {
                return Ok(copied);
            }
            let capacity = buffer.capacity();
            buffer.discard();
            buffer.ensure_capacity((expected + 1).max(capacity + 1));
        }
        Err(TelemetryError::TransientRefreshFailure(
            "process list kept filling the transfer buffer".into(),
        ))
    }

    pub fn destroy(&mut self) {
        if std::mem::replace(&mut self.live, false) {
            self.provider.cleanup();
            log::debug!("{} process session cleaned up", self.provider.name());
        }
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// CPU and disk-rate session for the fast stats feed.
pub struct StatsSession {
    provider: Arc<dyn StatsProvider>,
    live: bool,
}

impl std::fmt::Debug for StatsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsSession")
            .field("provider", &self.provider.name())
            .field("live", &self.live)
            .finish()
    }
}

impl StatsSession {
    pub fn create(provider: Arc<dyn StatsProvider>) -> Result<Self> {
        if !provider.initialize() {
            return Err(TelemetryError::ProviderUnavailable(format!(
                "{} could not initialize system stats",
                provider.name()
            )));
        }
        Ok(Self {
            provider,
            live: true,
        })
    }

    pub fn is_disposed(&self) -> bool {
        !self.live
    }

    pub fn sample(&mut self) -> Result<SystemStats> {
        if !self.live {
            return Err(TelemetryError::Disposed("stats session"));
        }
        if !self.provider.update() {
            return Err(TelemetryError::TransientRefreshFailure(format!(
                "{} stats update failed",
                self.provider.name()
            )));
        }
        let stats = SystemStats::from_rates(
            self.provider.cpu_usage(),
            self.provider.disk_read_rate(),
            self.provider.disk_write_rate(),
        );
        if !stats.cpu_percent.is_finite()
            || !stats.disk_read_mb_s.is_finite()
            || !stats.disk_write_mb_s.is_finite()
        {
            return Err(TelemetryError::DecodeFailure(
                "non-finite system stats".into(),
            ));
        }
        Ok(stats)
    }

    pub fn destroy(&mut self) {
        if std::mem::replace(&mut self.live, false) {
            self.provider.cleanup();
        }
    }
}

impl Drop for StatsSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::{FakeConnections, FakeProcesses, FakeStats};
    use crate::record::{ConnectionRecord, ConnectionState, Protocol};
    use std::net::Ipv4Addr;
    use std::sync::atomic::Ordering;

    fn conn(port: u16) -> ConnectionRecord {
        ConnectionRecord {
            local_addr: Ipv4Addr::LOCALHOST,
            local_port: port,
            remote_addr: Ipv4Addr::UNSPECIFIED,
            remote_port: 0,
            protocol: Protocol::Tcp,
            state: ConnectionState::Listen,
            pid: 100,
        }
    }

    #[test]
    fn layout_mismatch_aborts_creation() {
        let fake = Arc::new(FakeConnections::with_record_size(64));
        let err = ConnectionSession::create(fake.clone()).unwrap_err();
        assert_eq!(
            err,
            TelemetryError::StructLayoutMismatch {
                native: 64,
                expected: 32
            }
        );
        assert_eq!(fake.copy_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fake.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unavailable_provider() {
        let fake = Arc::new(FakeConnections::unavailable());
        let err = ConnectionSession::create(fake).unwrap_err();
        assert!(matches!(err, TelemetryError::ProviderUnavailable(_)));
    }

    #[test]
    fn destroy_is_idempotent_and_disposes() {
        let fake = Arc::new(FakeConnections::new());
        let mut session = ConnectionSession::create(fake.clone()).unwrap();
        session.destroy();
        session.destroy();
        drop(session);
        assert_eq!(fake.destroyed.load(Ordering::SeqCst), 1);

        let mut session = ConnectionSession::create(fake.clone()).unwrap();
        session.destroy();
        let mut buf = TransferBuffer::with_capacity(4);
        assert_eq!(
            session.refresh(RefreshScope::All),
            Err(TelemetryError::Disposed("connection session"))
        );
        assert!(matches!(
            session.fetch(&mut buf),
            Err(TelemetryError::Disposed(_))
        ));
        assert!(matches!(
            session.set_interval(500),
            Err(TelemetryError::Disposed(_))
        ));
        assert!(session.is_disposed());
    }

    #[test]
    fn outgrown_buffer_is_refetched_not_merged() {
        let fake = Arc::new(FakeConnections::new());
        fake.set_records((0..15).map(conn).collect());
        let mut session = ConnectionSession::create(fake.clone()).unwrap();
        let mut buf = TransferBuffer::with_capacity(10);

        session.refresh(RefreshScope::All).unwrap();
        let n = session.fetch(&mut buf).unwrap();

        assert_eq!(n, 15);
        assert!(buf.capacity() >= 15);
        assert_eq!(fake.copy_calls.load(Ordering::SeqCst), 2);
        let ports: Vec<u16> = buf.records().iter().map(|r| r.local_port).collect();
        assert_eq!(ports, (0..15).collect::<Vec<_>>());
    }

    #[test]
    fn refresh_failure_is_transient() {
        let fake = Arc::new(FakeConnections::new());
        fake.fail_refresh.store(true, Ordering::SeqCst);
        let mut session = ConnectionSession::create(fake).unwrap();
        let err = session.refresh(RefreshScope::TcpOnly).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn process_session_grows_when_list_fills_buffer() {
        let fake = Arc::new(FakeProcesses::new());
        fake.set_pids(&(1..=6).collect::<Vec<_>>());
        let mut session = ProcessSession::create(fake.clone()).unwrap();
        let mut buf = TransferBuffer::with_capacity(4);
        assert_eq!(session.fetch(&mut buf, 0).unwrap(), 6);
        // 4 is full, grows to 6 which is full again, then to 9.
        assert_eq!(buf.capacity(), 9);
        session.destroy();
        session.destroy();
        assert_eq!(fake.cleanups.load(Ordering::SeqCst), 1);
        assert!(matches!(
            session.snapshot(),
            Err(TelemetryError::Disposed("process session"))
        ));
    }

    #[test]
    fn process_count_hint_sizes_a_small_buffer() {
        let fake = Arc::new(FakeProcesses::new());
        fake.set_pids(&(1..=300).collect::<Vec<_>>());
        let mut session = ProcessSession::create(fake).unwrap();
        let mut buf = TransferBuffer::with_capacity(4);
        // Without a hint, 4 -> 6 -> 9 -> 13 never catches up in one cycle.
        assert!(session.fetch(&mut buf, 0).unwrap_err().is_transient());

        let mut buf = TransferBuffer::with_capacity(4);
        assert_eq!(session.fetch(&mut buf, 300).unwrap(), 300);
        assert!(buf.capacity() > 300);

        // Processes spawned after the snapshot still fit after a retry.
        let mut buf = TransferBuffer::with_capacity(4);
        assert_eq!(session.fetch(&mut buf, 250).unwrap(), 300);
    }

    #[test]
    fn stats_session_converts_rates() {
        let fake = Arc::new(FakeStats::new(25.0, 1024.0 * 1024.0, 0.0));
        let mut session = StatsSession::create(fake.clone()).unwrap();
        let stats = session.sample().unwrap();
        assert_eq!(stats.cpu_percent, 25.0);
        assert_eq!(stats.disk_read_mb_s, 1.0);
        drop(session);
        assert_eq!(fake.cleanups.load(Ordering::SeqCst), 1);
    }
}
