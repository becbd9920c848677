//! Feed monitors and the [`Console`] that owns them.
//!
//! Each monitor pairs a background [`Poller`](crate::Poller) with the
//! consumer-side feed state. The console starts whichever monitors the
//! backend can serve, pumps them from the consumption thread and fans the
//! resulting events out to subscribers.

mod connections;
mod processes;
mod stats;

pub use connections::{ConnectionKey, ConnectionMonitor, ConnectionSummary, ConnectionView};
pub use processes::ProcessMonitor;
pub use stats::StatsMonitor;

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::actions::ProcessActions;
use crate::config::MonitorConfig;
use crate::error::{Result, TelemetryError};
use crate::guard::ActionGuard;
use crate::names::ProcessNameCache;
use crate::poller::CycleOutcome;
use crate::provider::Backend;
use crate::reconcile::ChangeSet;
use crate::record::{PerformanceSnapshot, SystemStats};

/// The independently polled feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Connections,
    Processes,
    Stats,
}

impl FeedKind {
    pub const ALL: [Self; 3] = [Self::Connections, Self::Processes, Self::Stats];

    pub fn label(self) -> &'static str {
        match self {
            Self::Connections => "connections",
            Self::Processes => "processes",
            Self::Stats => "stats",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Change notifications produced by [`Console::pump`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    ConnectionsChanged(ChangeSet<ConnectionKey>),
    ConnectionSummaryChanged(ConnectionSummary),
    ProcessesChanged(ChangeSet<u32>),
    PerformanceChanged(PerformanceSnapshot),
    StatsChanged(SystemStats),
}

/// Counts consecutive failed cycles and says when to publish an empty sample.
#[derive(Debug)]
pub(crate) struct StaleTracker {
    limit: u32,
    failures: u32,
}

impl StaleTracker {
    pub(crate) fn new(limit: u32) -> Self {
        Self { limit, failures: 0 }
    }

    pub(crate) fn succeeded(&mut self) {
        self.failures = 0;
    }

    /// True once per failure streak, when the streak reaches the limit.
    pub(crate) fn failed(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        self.limit > 0 && self.failures == self.limit
    }
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// Consumption-side owner of every running feed.
///
/// All methods are meant to be called from one thread. Background work
/// happens on the monitors' own threads and only reaches the live
/// collections through [`Console::pump`].
#[derive(Debug)]
pub struct Console {
    connections: Option<ConnectionMonitor>,
    processes: Option<ProcessMonitor>,
    stats: Option<StatsMonitor>,
    actions: Option<ProcessActions>,
    names: ProcessNameCache,
    disabled: Vec<(FeedKind, TelemetryError)>,
    subscribers: Vec<Sender<ConsoleEvent>>,
}

fn start_feed<P, T>(
    kind: FeedKind,
    provider: Option<P>,
    disabled: &mut Vec<(FeedKind, TelemetryError)>,
    start: impl FnOnce(P) -> Result<T>,
) -> Option<T> {
    let Some(provider) = provider else {
        disabled.push((
            kind,
            TelemetryError::ProviderUnavailable(format!("no {kind} provider on this platform")),
        ));
        return None;
    };
    match start(provider) {
        Ok(monitor) => Some(monitor),
        Err(e) => {
            log::error!("{kind} feed disabled: {e}");
            disabled.push((kind, e));
            None
        }
    }
}

impl Console {
    /// Start every feed the backend supports.
    pub fn start(backend: &Backend, config: &MonitorConfig) -> Self {
        Self::start_feeds(backend, config, &FeedKind::ALL)
    }

    /// Start only the listed feeds. Feeds that fail to start are recorded in
    /// [`Console::disabled`] and show no data.
    pub fn start_feeds(backend: &Backend, config: &MonitorConfig, kinds: &[FeedKind]) -> Self {
        let config = config.clone().normalized();
        let names = ProcessNameCache::new(backend.control.clone());
        let mut disabled = Vec::new();

        let connections = if kinds.contains(&FeedKind::Connections) {
            start_feed(
                FeedKind::Connections,
                backend.connections.clone(),
                &mut disabled,
                |p| ConnectionMonitor::start(p, names.clone(), &config),
            )
        } else {
            None
        };
        let processes = if kinds.contains(&FeedKind::Processes) {
            start_feed(
                FeedKind::Processes,
                backend.processes.clone(),
                &mut disabled,
                |p| ProcessMonitor::start(p, names.clone(), &config),
            )
        } else {
            None
        };
        let stats = if kinds.contains(&FeedKind::Stats) {
            start_feed(
                FeedKind::Stats,
                backend.stats.clone(),
                &mut disabled,
                |p| StatsMonitor::start(p, &config),
            )
        } else {
            None
        };

        let guard = processes
            .as_ref()
            .map(|m| m.guard().clone())
            .unwrap_or_else(ActionGuard::new);
        let actions = backend
            .control
            .clone()
            .map(|control| ProcessActions::new(control, guard));

        log::info!(
            "console started on {} backend ({} feeds disabled)",
            backend.label,
            disabled.len()
        );
        Self {
            connections,
            processes,
            stats,
            actions,
            names,
            disabled,
            subscribers: Vec::new(),
        }
    }

    /// Reconcile whatever the workers have handed off since the last pump and
    /// notify subscribers. Returns the events it produced.
    pub fn pump(&mut self) -> Vec<ConsoleEvent> {
        let mut events = Vec::new();
        if let Some(m) = self.connections.as_mut() {
            m.pump(&mut events);
        }
        if let Some(m) = self.processes.as_mut() {
            m.pump(&mut events);
        }
        if let Some(m) = self.stats.as_mut() {
            m.pump(&mut events);
        }
        if !events.is_empty() {
            self.subscribers
                .retain(|tx| events.iter().all(|ev| tx.send(ev.clone()).is_ok()));
        }
        events
    }

    /// Receive every future [`ConsoleEvent`].
    pub fn subscribe(&mut self) -> Receiver<ConsoleEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn connections(&self) -> Option<&ConnectionMonitor> {
        self.connections.as_ref()
    }

    pub fn connections_mut(&mut self) -> Option<&mut ConnectionMonitor> {
        self.connections.as_mut()
    }

    pub fn processes(&self) -> Option<&ProcessMonitor> {
        self.processes.as_ref()
    }

    pub fn processes_mut(&mut self) -> Option<&mut ProcessMonitor> {
        self.processes.as_mut()
    }

    pub fn stats(&self) -> Option<&StatsMonitor> {
        self.stats.as_ref()
    }

    /// Process actions, gated by the process feed's guard.
    pub fn actions(&self) -> Option<&ProcessActions> {
        self.actions.as_ref()
    }

    pub fn names(&self) -> &ProcessNameCache {
        &self.names
    }

    /// Feeds that could not start, with the reason.
    pub fn disabled(&self) -> &[(FeedKind, TelemetryError)] {
        &self.disabled
    }

    pub fn is_running(&self, kind: FeedKind) -> bool {
        match kind {
            FeedKind::Connections => self.connections.is_some(),
            FeedKind::Processes => self.processes.is_some(),
            FeedKind::Stats => self.stats.is_some(),
        }
    }

    /// Out-of-cadence refresh of one feed. Joins an in-flight cycle rather
    /// than starting a second one.
    pub fn request_refresh(&self, kind: FeedKind) -> Result<CycleOutcome> {
        let not_running = || {
            TelemetryError::ProviderUnavailable(format!("{kind} feed is not running"))
        };
        match kind {
            FeedKind::Connections => self
                .connections
                .as_ref()
                .ok_or_else(not_running)?
                .request_refresh(),
            FeedKind::Processes => self
                .processes
                .as_ref()
                .ok_or_else(not_running)?
                .request_refresh(),
            FeedKind::Stats => self.stats.as_ref().ok_or_else(not_running)?.request_refresh(),
        }
    }

    /// Stop every feed, waiting for in-flight cycles before sessions are
    /// released.
    pub fn stop(mut self) {
        if let Some(m) = self.connections.take() {
            m.stop();
        }
        if let Some(m) = self.processes.take() {
            m.stop();
        }
        if let Some(m) = self.stats.take() {
            m.stop();
        }
        log::info!("console stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_tracker_fires_once_per_streak() {
        let mut t = StaleTracker::new(2);
        assert!(!t.failed());
        assert!(t.failed());
        assert!(!t.failed());
        t.succeeded();
        assert!(!t.failed());
        assert!(t.failed());
    }

    #[test]
    fn zero_limit_never_empties() {
        let mut t = StaleTracker::new(0);
        assert!((0..10).all(|_| !t.failed()));
    }

    #[test]
    fn empty_backend_disables_everything() {
        let console = Console::start(&Backend::none(), &MonitorConfig::default());
        assert_eq!(console.disabled().len(), 3);
        assert!(console.actions().is_none());
        for kind in FeedKind::ALL {
            assert!(!console.is_running(kind));
            assert!(console.request_refresh(kind).is_err());
        }
        console.stop();
    }
}
