//! Deep process feed and the global performance snapshot.

use std::sync::Arc;

use super::{ConsoleEvent, StaleTracker};
use crate::buffer::TransferBuffer;
use crate::config::MonitorConfig;
use crate::error::{Result, TelemetryError};
use crate::feed::{CollectionFeed, SampleSink, SnapshotFeed};
use crate::filter::{Searchable, contains_folded};
use crate::guard::ActionGuard;
use crate::handle::ProcessSession;
use crate::names::ProcessNameCache;
use crate::poller::{CycleOutcome, Poller};
use crate::provider::ProcessProvider;
use crate::reconcile::Keyed;
use crate::record::{PerformanceSnapshot, ProcessRecord, RawProcessDetail};

impl Keyed for ProcessRecord {
    type Id = u32;

    fn id(&self) -> u32 {
        self.pid
    }

    fn is_visually_different(&self, newer: &Self) -> bool {
        ProcessRecord::is_visually_different(self, newer)
    }
}

impl Searchable for ProcessRecord {
    fn matches(&self, needle: &str) -> bool {
        contains_folded(&self.name, needle) || self.pid.to_string().contains(needle)
    }
}

struct ProcessCycle {
    session: ProcessSession,
    buffer: TransferBuffer<RawProcessDetail>,
    initial_capacity: usize,
    names: ProcessNameCache,
    rows: SampleSink<Vec<ProcessRecord>>,
    snapshot: SampleSink<PerformanceSnapshot>,
    stale: StaleTracker,
}

impl ProcessCycle {
    fn run(&mut self) -> Result<usize> {
        let snapshot = self.session.snapshot();
        let expected = match &snapshot {
            Ok(snapshot) => {
                self.snapshot.publish(snapshot.clone());
                snapshot.process_count as usize
            }
            Err(_) => 0,
        };
        match self.sample_rows(expected) {
            Ok(rows) => {
                self.stale.succeeded();
                let n = rows.len();
                self.rows.publish(rows);
                snapshot.map(|_| n)
            }
            Err(e) => {
                if self.stale.failed() {
                    log::warn!("process feed emptied after repeated failures");
                    self.rows.publish(Vec::new());
                }
                Err(e)
            }
        }
    }

    fn sample_rows(&mut self, expected: usize) -> Result<Vec<ProcessRecord>> {
        if self.buffer.capacity() == 0 {
            self.buffer.ensure_capacity(self.initial_capacity);
        }
        let n = self.session.fetch(&mut self.buffer, expected)?;
        if n == 0 {
            return Err(TelemetryError::TransientRefreshFailure(
                "provider returned an empty process list".into(),
            ));
        }
        let rows = self
            .buffer
            .records()
            .iter()
            .map(RawProcessDetail::decode)
            .collect::<Result<Vec<_>>>()?;
        for row in &rows {
            self.names.insert(row.pid, row.name.as_str());
        }
        Ok(rows)
    }
}

/// A running process feed.
#[derive(Debug)]
pub struct ProcessMonitor {
    poller: Poller,
    feed: CollectionFeed<ProcessRecord>,
    performance: SnapshotFeed<PerformanceSnapshot>,
}

impl ProcessMonitor {
    pub fn start(
        provider: Arc<dyn ProcessProvider>,
        names: ProcessNameCache,
        config: &MonitorConfig,
    ) -> Result<Self> {
        let session = ProcessSession::create(provider)?;
        let (feed, rows) = CollectionFeed::new();
        let (performance, snapshot) = SnapshotFeed::new();
        let mut cycle = ProcessCycle {
            session,
            buffer: TransferBuffer::new(),
            initial_capacity: config.initial_buffer_capacity,
            names,
            rows,
            snapshot,
            stale: StaleTracker::new(config.stale_after_failures),
        };
        let poller = Poller::spawn("processes", config.process_interval(), move || cycle.run())?;
        Ok(Self {
            poller,
            feed,
            performance,
        })
    }

    pub(crate) fn pump(&mut self, events: &mut Vec<ConsoleEvent>) {
        if let Some(snapshot) = self.performance.pump() {
            events.push(ConsoleEvent::PerformanceChanged(snapshot));
        }
        if let Some(changes) = self.feed.pump() {
            if !changes.is_empty() {
                events.push(ConsoleEvent::ProcessesChanged(changes));
            }
        }
    }

    pub fn feed(&self) -> &CollectionFeed<ProcessRecord> {
        &self.feed
    }

    pub fn feed_mut(&mut self) -> &mut CollectionFeed<ProcessRecord> {
        &mut self.feed
    }

    pub fn guard(&self) -> &ActionGuard {
        self.feed.guard()
    }

    pub fn performance(&self) -> Option<&PerformanceSnapshot> {
        self.performance.current()
    }

    pub fn process_count(&self) -> usize {
        self.feed.collection().len()
    }

    pub fn total_handle_count(&self) -> u32 {
        self.performance.current().map_or(0, |p| p.handle_count)
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
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

    fn record(pid: u32, name: &str) -> ProcessRecord {
        ProcessRecord {
            pid,
            name: name.into(),
            cpu_percent: 0.0,
            memory_mb: 1.0,
            disk_read_mb_s: 0.0,
            disk_write_mb_s: 0.0,
            thread_count: 1,
            handle_count: 1,
            priority_class: 0x20,
        }
    }

    #[test]
    fn keyed_by_pid() {
        let a = record(42, "postgres");
        let mut b = record(42, "postgres");
        b.cpu_percent = 12.0;
        assert_eq!(Keyed::id(&a), 42);
        assert!(Keyed::is_visually_different(&a, &b));
    }

    #[test]
    fn search_by_name_or_pid() {
        let r = record(4242, "PostgreSQL");
        assert!(r.matches("postgres"));
        assert!(r.matches("424"));
        assert!(!r.matches("mysql"));
    }
}
