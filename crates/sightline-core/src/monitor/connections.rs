//! Connection-table feed.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use super::{ConsoleEvent, StaleTracker};
use crate::buffer::TransferBuffer;
use crate::config::{MonitorConfig, clamp_connection_interval};
use crate::error::Result;
use crate::feed::{CollectionFeed, SampleSink, SnapshotFeed};
use crate::filter::{Searchable, contains_folded};
use crate::handle::ConnectionSession;
use crate::names::ProcessNameCache;
use crate::poller::{CycleOutcome, Poller};
use crate::provider::{ConnectionProvider, RefreshScope};
use crate::reconcile::Keyed;
use crate::record::{ConnectionRecord, ConnectionState, Protocol, RawConnection};

/// Identity of a connection across samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionKey {
    pub protocol: Protocol,
    pub local_addr: Ipv4Addr,
    pub local_port: u16,
    pub remote_addr: Ipv4Addr,
    pub remote_port: u16,
    pub pid: u32,
}

/// A connection plus the name of the process that owns it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionView {
    pub record: ConnectionRecord,
    pub process_name: String,
}

impl ConnectionView {
    pub fn state(&self) -> ConnectionState {
        self.record.state
    }
}

impl Keyed for ConnectionView {
    type Id = ConnectionKey;

    fn id(&self) -> ConnectionKey {
        let r = &self.record;
        ConnectionKey {
            protocol: r.protocol,
            local_addr: r.local_addr,
            local_port: r.local_port,
            remote_addr: r.remote_addr,
            remote_port: r.remote_port,
            pid: r.pid,
        }
    }

    fn is_visually_different(&self, newer: &Self) -> bool {
        self.record.state != newer.record.state || self.process_name != newer.process_name
    }
}

impl Searchable for ConnectionView {
    fn matches(&self, needle: &str) -> bool {
        let r = &self.record;
        r.local_addr.to_string().contains(needle)
            || r.remote_addr.to_string().contains(needle)
            || r.local_port.to_string().contains(needle)
            || r.remote_port.to_string().contains(needle)
            || r.pid.to_string().contains(needle)
            || contains_folded(&self.process_name, needle)
            || contains_folded(&r.protocol.to_string(), needle)
            || contains_folded(r.state.display_name(), needle)
    }
}

/// Per-protocol counts of the last sample, taken before protocol filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSummary {
    pub tcp: usize,
    pub udp: usize,
    pub total: usize,
}

impl ConnectionSummary {
    fn count(records: &[ConnectionRecord]) -> Self {
        let tcp = records
            .iter()
            .filter(|r| r.protocol == Protocol::Tcp)
            .count();
        Self {
            tcp,
            udp: records.len() - tcp,
            total: records.len(),
        }
    }
}

/// Options the consumer changes and the worker reads.
#[derive(Debug, Clone)]
struct Options {
    show_tcp: Arc<AtomicBool>,
    show_udp: Arc<AtomicBool>,
    interval_ms: Arc<AtomicU64>,
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

struct ConnectionCycle {
    session: ConnectionSession,
    buffer: TransferBuffer<RawConnection>,
    initial_capacity: usize,
    options: Options,
    applied_interval_ms: Option<u64>,
    names: ProcessNameCache,
    rows: SampleSink<Vec<ConnectionView>>,
    summary: SampleSink<ConnectionSummary>,
    stale: StaleTracker,
}

impl ConnectionCycle {
    fn run(&mut self) -> Result<usize> {
        match self.sample() {
            Ok((rows, summary)) => {
                self.stale.succeeded();
                let n = rows.len();
                self.rows.publish(rows);
                self.summary.publish(summary);
                Ok(n)
            }
            Err(e) => {
                if self.stale.failed() {
                    log::warn!("connections feed emptied after repeated failures");
                    self.rows.publish(Vec::new());
                    self.summary.publish(ConnectionSummary::default());
                }
                Err(e)
            }
        }
    }

    fn sample(&mut self) -> Result<(Vec<ConnectionView>, ConnectionSummary)> {
        self.sync_interval();

        // Both tables are always refreshed so the summary covers hidden
        // protocols; visibility only filters rows.
        self.session.refresh(RefreshScope::All)?;
        if self.buffer.capacity() == 0 {
            self.buffer.ensure_capacity(self.initial_capacity);
        }
        self.session.fetch(&mut self.buffer)?;
        let records = self
            .buffer
            .records()
            .iter()
            .map(RawConnection::decode)
            .collect::<Result<Vec<_>>>()?;

        let summary = ConnectionSummary::count(&records);
        let show_tcp = self.options.show_tcp.load(Ordering::Relaxed);
        let show_udp = self.options.show_udp.load(Ordering::Relaxed);
        let rows = records
            .into_iter()
            .filter(|r| match r.protocol {
                Protocol::Tcp => show_tcp,
                Protocol::Udp => show_udp,
            })
            .map(|record| ConnectionView {
                process_name: self.names.resolve(record.pid),
                record,
            })
            .collect();
        Ok((rows, summary))
    }

    fn sync_interval(&mut self) {
        let wanted = self.options.interval_ms.load(Ordering::Relaxed);
        if self.applied_interval_ms == Some(wanted) {
            return;
        }
        let ms = u32::try_from(wanted).unwrap_or(u32::MAX);
        if let Err(e) = self.session.set_interval(ms) {
            log::debug!("connections: {e}");
        }
        self.applied_interval_ms = Some(wanted);
    }
}

// ---------------------------------------------------------------------------
// Consumer side
// ---------------------------------------------------------------------------

/// A running connection feed.
#[derive(Debug)]
pub struct ConnectionMonitor {
    poller: Poller,
    feed: CollectionFeed<ConnectionView>,
    summary: SnapshotFeed<ConnectionSummary>,
    options: Options,
    auto_refresh: bool,
}

impl ConnectionMonitor {
    /// Create the session and start polling. Creation failures are returned
    /// to the caller.
    pub fn start(
        provider: Arc<dyn ConnectionProvider>,
        names: ProcessNameCache,
        config: &MonitorConfig,
    ) -> Result<Self> {
        let session = ConnectionSession::create(provider)?;
        let (feed, rows) = CollectionFeed::new();
        let (summary, summary_sink) = SnapshotFeed::new();
        let interval_ms = clamp_connection_interval(config.connection_interval_ms);
        let options = Options {
            show_tcp: Arc::new(AtomicBool::new(config.show_tcp)),
            show_udp: Arc::new(AtomicBool::new(config.show_udp)),
            interval_ms: Arc::new(AtomicU64::new(interval_ms)),
        };

        let mut cycle = ConnectionCycle {
            session,
            buffer: TransferBuffer::new(),
            initial_capacity: config.initial_buffer_capacity,
            options: options.clone(),
            applied_interval_ms: None,
            names,
            rows,
            summary: summary_sink,
            stale: StaleTracker::new(config.stale_after_failures),
        };
        let poller = Poller::spawn(
            "connections",
            Duration::from_millis(interval_ms),
            move || cycle.run(),
        )?;

        Ok(Self {
            poller,
            feed,
            summary,
            options,
            auto_refresh: true,
        })
    }

    pub(crate) fn pump(&mut self, events: &mut Vec<ConsoleEvent>) {
        if let Some(changes) = self.feed.pump() {
            if !changes.is_empty() {
                events.push(ConsoleEvent::ConnectionsChanged(changes));
            }
        }
        if let Some(summary) = self.summary.pump() {
            events.push(ConsoleEvent::ConnectionSummaryChanged(summary));
        }
    }

    pub fn feed(&self) -> &CollectionFeed<ConnectionView> {
        &self.feed
    }

    pub fn feed_mut(&mut self) -> &mut CollectionFeed<ConnectionView> {
        &mut self.feed
    }

    pub fn summary(&self) -> ConnectionSummary {
        self.summary.current().copied().unwrap_or_default()
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn show_tcp(&self) -> bool {
        self.options.show_tcp.load(Ordering::Relaxed)
    }

    pub fn show_udp(&self) -> bool {
        self.options.show_udp.load(Ordering::Relaxed)
    }

    /// Toggle TCP rows. A change triggers an immediate refresh.
    pub fn set_show_tcp(&self, show: bool) {
        if self.options.show_tcp.swap(show, Ordering::Relaxed) != show {
            self.poller.trigger();
        }
    }

    /// Toggle UDP rows. A change triggers an immediate refresh.
    pub fn set_show_udp(&self, show: bool) {
        if self.options.show_udp.swap(show, Ordering::Relaxed) != show {
            self.poller.trigger();
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.options.interval_ms.load(Ordering::Relaxed)
    }

    /// Change the cadence (clamped to the minimum) and return what was applied.
    pub fn set_interval_ms(&self, ms: u64) -> u64 {
        let ms = clamp_connection_interval(ms);
        self.options.interval_ms.store(ms, Ordering::Relaxed);
        self.poller.set_interval(Duration::from_millis(ms));
        ms
    }

    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh
    }

    /// Pause or resume scheduled ticks. Manual refreshes still run.
    pub fn set_auto_refresh(&mut self, enabled: bool) {
        self.auto_refresh = enabled;
        self.poller.set_paused(!enabled);
    }

    pub fn request_refresh(&self) -> Result<CycleOutcome> {
        self.poller.request_refresh()
    }

    pub fn stop(mut self) {
        self.poller.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(port: u16, state: ConnectionState, name: &str) -> ConnectionView {
        ConnectionView {
            record: ConnectionRecord {
                local_addr: Ipv4Addr::new(192, 168, 1, 20),
                local_port: port,
                remote_addr: Ipv4Addr::new(140, 82, 121, 4),
                remote_port: 443,
                protocol: Protocol::Tcp,
                state,
                pid: 1234,
            },
            process_name: name.into(),
        }
    }

    #[test]
    fn identity_ignores_state() {
        let a = view(50000, ConnectionState::SynSent, "curl");
        let b = view(50000, ConnectionState::Established, "curl");
        assert_eq!(a.id(), b.id());
        assert!(a.is_visually_different(&b));
        assert!(!a.is_visually_different(&a.clone()));
        assert_ne!(a.id(), view(50001, ConnectionState::SynSent, "curl").id());
    }

    #[test]
    fn searches_every_column() {
        let v = view(50000, ConnectionState::TimeWait, "Firefox");
        for needle in ["192.168", "140.82", "50000", "443", "1234", "firefox", "tcp", "time wait"] {
            assert!(v.matches(needle), "{needle}");
        }
        assert!(!v.matches("udp"));
    }

    #[test]
    fn summary_counts_both_protocols() {
        let mut udp = view(53, ConnectionState::Unknown, "dns").record;
        udp.protocol = Protocol::Udp;
        let tcp = view(80, ConnectionState::Listen, "web").record;
        let summary = ConnectionSummary::count(&[tcp.clone(), udp, tcp]);
        assert_eq!(
            summary,
            ConnectionSummary {
                tcp: 2,
                udp: 1,
                total: 3
            }
        );
    }

    #[test]
    fn hidden_protocol_is_still_sampled_and_counted() {
        use crate::provider::testing::FakeConnections;

        let provider = Arc::new(FakeConnections::new());
        let mut udp = view(53, ConnectionState::Unknown, "dns").record;
        udp.protocol = Protocol::Udp;
        provider.set_records(vec![view(22, ConnectionState::Listen, "sshd").record, udp]);
        let config = MonitorConfig {
            connection_interval_ms: 60_000,
            show_udp: false,
            ..MonitorConfig::default()
        };
        let mut monitor =
            ConnectionMonitor::start(provider.clone(), ProcessNameCache::new(None), &config)
                .unwrap();
        monitor.request_refresh().unwrap();
        let mut events = Vec::new();
        monitor.pump(&mut events);

        assert!(
            provider
                .scopes
                .lock()
                .unwrap()
                .iter()
                .all(|&s| s == RefreshScope::All)
        );
        assert_eq!(monitor.feed().collection().len(), 1);
        assert_eq!(
            monitor.summary(),
            ConnectionSummary {
                tcp: 1,
                udp: 1,
                total: 2
            }
        );
        monitor.stop();
    }
}
