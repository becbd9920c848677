//! Fast CPU and disk-rate feed.

use std::sync::Arc;

use super::ConsoleEvent;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::feed::SnapshotFeed;
use crate::handle::StatsSession;
use crate::poller::{CycleOutcome, Poller};
use crate::provider::StatsProvider;
use crate::record::SystemStats;

#[derive(Debug)]
pub struct StatsMonitor {
    poller: Poller,
    stats: SnapshotFeed<SystemStats>,
}

impl StatsMonitor {
    pub fn start(provider: Arc<dyn StatsProvider>, config: &MonitorConfig) -> Result<Self> {
        let mut session = StatsSession::create(provider)?;
        let (stats, sink) = SnapshotFeed::new();
        let poller = Poller::spawn("stats", config.stats_interval(), move || {
            let sample = session.sample()?;
            sink.publish(sample);
            Ok(1)
        })?;
        Ok(Self { poller, stats })
    }

    pub(crate) fn pump(&mut self, events: &mut Vec<ConsoleEvent>) {
        if let Some(stats) = self.stats.pump() {
            events.push(ConsoleEvent::StatsChanged(stats));
        }
    }

    pub fn current(&self) -> Option<SystemStats> {
        self.stats.current().copied()
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
