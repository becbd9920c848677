//! Hand-off between a feed's background worker and the consumption thread.
//!
//! The worker decodes a sample and pushes it through a [`SampleSink`]. The
//! consumer drains the matching [`SampleSource`] when it is ready, keeps only
//! the newest sample and reconciles it. The live collection is only ever
//! touched from the consumer side.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::filter::{FilteredView, Searchable};
use crate::guard::ActionGuard;
use crate::reconcile::{ChangeSet, Keyed, LiveCollection};

/// One decoded sample in transit.
#[derive(Debug)]
struct Sample<T> {
    payload: T,
    epoch: u64,
}

/// Worker half of a feed channel.
#[derive(Debug)]
pub struct SampleSink<T> {
    tx: Sender<Sample<T>>,
    guard: ActionGuard,
}

impl<T> Clone for SampleSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T> SampleSink<T> {
    /// Hand a sample to the consumer. Samples taken while the guard is held
    /// are dropped here. Returns false once the consumer has gone away.
    pub fn publish(&self, payload: T) -> bool {
        if self.guard.is_held() {
            log::trace!("sample dropped while an action holds the feed");
            return true;
        }
        self.tx
            .send(Sample {
                payload,
                epoch: self.guard.epoch(),
            })
            .is_ok()
    }
}

/// Consumer half of a feed channel.
#[derive(Debug)]
pub struct SampleSource<T> {
    rx: Receiver<Sample<T>>,
    guard: ActionGuard,
}

impl<T> SampleSource<T> {
    /// Drain everything queued and return the newest usable sample.
    ///
    /// Returns `None` while the guard is held, and also when the newest sample
    /// was taken before the guard last changed hands.
    pub fn latest(&self) -> Option<T> {
        let newest = self.rx.try_iter().last()?;
        if self.guard.is_held() || newest.epoch != self.guard.epoch() {
            return None;
        }
        Some(newest.payload)
    }
}

/// Create a sink/source pair gated by `guard`.
pub fn channel<T>(guard: &ActionGuard) -> (SampleSink<T>, SampleSource<T>) {
    let (tx, rx) = mpsc::channel();
    (
        SampleSink {
            tx,
            guard: guard.clone(),
        },
        SampleSource {
            rx,
            guard: guard.clone(),
        },
    )
}

// ---------------------------------------------------------------------------
// Collection feed
// ---------------------------------------------------------------------------

/// Consumer-side state of a keyed feed: the live collection, its selection,
/// the filtered view and the feed's action guard.
#[derive(Debug)]
pub struct CollectionFeed<R: Keyed> {
    source: SampleSource<Vec<R>>,
    live: LiveCollection<R>,
    view: FilteredView<R::Id>,
    guard: ActionGuard,
    reconciliations: u64,
}

impl<R: Keyed + Searchable> CollectionFeed<R> {
    /// A feed plus the sink its worker publishes into.
    pub fn new() -> (Self, SampleSink<Vec<R>>) {
        let guard = ActionGuard::new();
        let (sink, source) = channel(&guard);
        let feed = Self {
            source,
            live: LiveCollection::new(),
            view: FilteredView::new(),
            guard,
            reconciliations: 0,
        };
        (feed, sink)
    }

    /// Reconcile the newest pending sample, if there is one and the guard
    /// allows it.
    pub fn pump(&mut self) -> Option<ChangeSet<R::Id>> {
        let sample = self.source.latest()?;
        let changes = self.live.apply(&sample);
        self.reconciliations += 1;
        if !changes.is_empty() {
            self.view.refresh(&self.live);
        }
        Some(changes)
    }

    pub fn collection(&self) -> &LiveCollection<R> {
        &self.live
    }

    pub fn reconciliations(&self) -> u64 {
        self.reconciliations
    }

    pub fn guard(&self) -> &ActionGuard {
        &self.guard
    }

    pub fn selected(&self) -> Option<&R::Id> {
        self.live.selected()
    }

    pub fn selected_record(&self) -> Option<&R> {
        self.live.selected_record()
    }

    pub fn select(&mut self, id: R::Id) -> bool {
        self.live.select(id)
    }

    pub fn clear_selection(&mut self) {
        self.live.clear_selection();
    }

    pub fn set_filter(&mut self, text: &str) {
        self.view.set_text(text, &self.live);
    }

    pub fn filter_text(&self) -> &str {
        self.view.text()
    }

    /// Records passing the current filter, in collection order.
    pub fn visible(&self) -> Vec<&R> {
        self.view.records(&self.live)
    }
}

// ---------------------------------------------------------------------------
// Snapshot feed
// ---------------------------------------------------------------------------

/// Consumer-side state of a whole-value feed. Each accepted sample replaces
/// the previous value outright. Snapshot feeds are never held by an action,
/// so they keep updating while a collection feed is frozen.
#[derive(Debug)]
pub struct SnapshotFeed<T> {
    source: SampleSource<T>,
    current: Option<T>,
}

impl<T: Clone + PartialEq> SnapshotFeed<T> {
    pub fn new() -> (Self, SampleSink<T>) {
        let (sink, source) = channel(&ActionGuard::new());
        (
            Self {
                source,
                current: None,
            },
            sink,
        )
    }

    /// Take the newest sample. Returns it if it differs from the current value.
    pub fn pump(&mut self) -> Option<T> {
        let value = self.source.latest()?;
        if self.current.as_ref() == Some(&value) {
            return None;
        }
        self.current = Some(value.clone());
        Some(value)
    }

    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }
}
