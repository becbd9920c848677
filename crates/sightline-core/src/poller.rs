//! Fixed-cadence background cycles, one worker thread per feed.
//!
//! A feed's cycle never overlaps itself: ticks that come due while a cycle is
//! still running are skipped, not queued. An out-of-cadence refresh requested
//! while a cycle is in flight waits for that cycle and returns its outcome
//! instead of running a second one.
//!
//! Failures (including panics) stay inside the cycle that raised them. The
//! first failure of a streak is logged at `warn`, repeats at `debug`, and the
//! next success at `info`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Result, TelemetryError};

/// What one cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The cycle handed off a sample of this many records.
    Completed(usize),
    Failed(TelemetryError),
}

impl CycleOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Counters for one poller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub cycles: u64,
    pub failures: u64,
    pub skipped_ticks: u64,
    pub manual_refreshes: u64,
}

#[derive(Debug)]
struct PollState {
    running: bool,
    paused: bool,
    in_flight: bool,
    requested: bool,
    interval: Duration,
    completed: u64,
    last: Option<CycleOutcome>,
    stats: PollerStats,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<PollState>,
    wake: Condvar,
    done: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running feed worker. Dropping it stops the worker.
#[derive(Debug)]
pub struct Poller {
    name: String,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Poller {
    /// Start a worker that runs `cycle` immediately and then every `interval`.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, cycle: F) -> Result<Self>
    where
        F: FnMut() -> Result<usize> + Send + 'static,
    {
        let name = name.into();
        let shared = Arc::new(Shared {
            state: Mutex::new(PollState {
                running: true,
                paused: false,
                in_flight: false,
                requested: false,
                interval,
                completed: 0,
                last: None,
                stats: PollerStats::default(),
            }),
            wake: Condvar::new(),
            done: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker_name = name.clone();
        let worker = thread::Builder::new()
            .name(format!("sightline-{name}"))
            .spawn(move || run_worker(&worker_name, &worker_shared, cycle))
            .map_err(|e| {
                TelemetryError::ProviderUnavailable(format!("cannot start {name} poller: {e}"))
            })?;

        log::debug!("{name} poller started at {} ms", interval.as_millis());
        Ok(Self {
            name,
            shared,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.shared.lock().interval
    }

    /// Change the cadence. Takes effect from the next scheduled tick.
    pub fn set_interval(&self, interval: Duration) {
        self.shared.lock().interval = interval;
    }

    /// Suspend or resume scheduled ticks. Requested refreshes still run while
    /// paused; on resume an overdue tick runs at once.
    pub fn set_paused(&self, paused: bool) {
        self.shared.lock().paused = paused;
        self.shared.wake.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    pub fn is_in_flight(&self) -> bool {
        self.shared.lock().in_flight
    }

    pub fn stats(&self) -> PollerStats {
        self.shared.lock().stats
    }

    /// Outcome of the most recent finished cycle.
    pub fn last_outcome(&self) -> Option<CycleOutcome> {
        self.shared.lock().last.clone()
    }

    /// Ask for an out-of-cadence cycle without waiting for it. Returns false
    /// when one is already running or queued; that cycle will do.
    pub fn trigger(&self) -> bool {
        let mut state = self.shared.lock();
        if !state.running || state.in_flight || state.requested {
            return false;
        }
        state.requested = true;
        self.shared.wake.notify_all();
        true
    }

    /// Run a cycle now and wait for its outcome.
    ///
    /// If a cycle is already in flight (or already requested) its outcome is
    /// returned and no extra cycle runs.
    pub fn request_refresh(&self) -> Result<CycleOutcome> {
        let mut state = self.shared.lock();
        if !state.running {
            return Err(TelemetryError::Disposed("poller"));
        }
        let target = state.completed + 1;
        if !state.in_flight && !state.requested {
            state.requested = true;
            self.shared.wake.notify_all();
        }
        while state.completed < target {
            if !state.running && !state.in_flight {
                return Err(TelemetryError::Disposed("poller"));
            }
            state = self
                .shared
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
            .last
            .clone()
            .ok_or(TelemetryError::Disposed("poller"))
    }

    /// Cancel future ticks and wait for an in-flight cycle to finish. Whatever
    /// the cycle owns is released once this returns.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.lock();
            if !state.running && self.worker.is_none() {
                return;
            }
            state.running = false;
            self.shared.wake.notify_all();
            self.shared.done.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("{} poller thread panicked", self.name);
            }
            log::debug!("{} poller stopped", self.name);
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn run_worker<F>(name: &str, shared: &Shared, mut cycle: F)
where
    F: FnMut() -> Result<usize>,
{
    let mut next_tick = Instant::now();
    let mut failure_streak: u64 = 0;

    loop {
        let manual = {
            let mut state = shared.lock();
            loop {
                if !state.running {
                    return;
                }
                if state.requested {
                    break;
                }
                if state.paused {
                    state = shared
                        .wake
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                    continue;
                }
                let now = Instant::now();
                if now >= next_tick {
                    break;
                }
                state = shared
                    .wake
                    .wait_timeout(state, next_tick - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            let manual = std::mem::take(&mut state.requested);
            state.in_flight = true;
            manual
        };

        let outcome = match catch_unwind(AssertUnwindSafe(&mut cycle)) {
            Ok(Ok(count)) => CycleOutcome::Completed(count),
            Ok(Err(e)) => CycleOutcome::Failed(e),
            Err(_) => CycleOutcome::Failed(TelemetryError::TransientRefreshFailure(
                "cycle panicked".into(),
            )),
        };

        match &outcome {
            CycleOutcome::Completed(_) if failure_streak > 0 => {
                log::info!("{name} feed recovered after {failure_streak} failed cycles");
                failure_streak = 0;
            }
            CycleOutcome::Completed(_) => {}
            CycleOutcome::Failed(e) => {
                failure_streak += 1;
                if failure_streak == 1 {
                    log::warn!("{name} feed cycle failed: {e}");
                } else {
                    log::debug!("{name} feed cycle failed ({failure_streak} in a row): {e}");
                }
            }
        }

        let mut state = shared.lock();
        state.in_flight = false;
        state.completed += 1;
        state.stats.cycles += 1;
        if !outcome.is_ok() {
            state.stats.failures += 1;
        }
        if manual {
            state.stats.manual_refreshes += 1;
        } else {
            let interval = state.interval.max(Duration::from_millis(1));
            next_tick += interval;
            let now = Instant::now();
            while next_tick <= now {
                next_tick += interval;
                state.stats.skipped_ticks += 1;
            }
        }
        state.last = Some(outcome);
        shared.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    const SLOW: Duration = Duration::from_secs(3600);

    #[test]
    fn first_cycle_runs_immediately() {
        let (tx, rx) = mpsc::channel();
        let mut poller = Poller::spawn("t", SLOW, move || {
            tx.send(()).ok();
            Ok(1)
        })
        .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        poller.stop();
        assert_eq!(poller.stats().cycles, 1);
    }

    #[test]
    fn refresh_while_in_flight_joins_the_running_cycle() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let counter = Arc::clone(&runs);
        let poller = Arc::new(
            Poller::spawn("t", SLOW, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                entered_tx.send(()).ok();
                release_rx.recv().ok();
                Ok(n)
            })
            .unwrap(),
        );

        // The immediate first cycle is now blocked inside the closure.
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(poller.is_in_flight());

        let waiter = {
            let poller = Arc::clone(&poller);
            thread::spawn(move || poller.request_refresh())
        };
        assert!(!poller.trigger());
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        let outcome = waiter.join().unwrap().unwrap();
        assert_eq!(outcome, CycleOutcome::Completed(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refresh_when_idle_runs_one_cycle() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let poller = Poller::spawn("t", SLOW, move || {
            Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
        })
        .unwrap();
        // Wait out the initial tick.
        while poller.stats().cycles == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        let outcome = poller.request_refresh().unwrap();
        assert_eq!(outcome, CycleOutcome::Completed(2));
        assert_eq!(poller.stats().manual_refreshes, 1);
    }

    #[test]
    fn failures_and_panics_do_not_stop_ticks() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let poller = Poller::spawn("t", Duration::from_millis(5), move || {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(TelemetryError::TransientRefreshFailure("boom".into())),
                1 => panic!("provider exploded"),
                n => Ok(n),
            }
        })
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while runs.load(Ordering::SeqCst) < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        drop(poller);
        assert!(runs.load(Ordering::SeqCst) >= 4);
    }

    #[test]
    fn slow_cycles_skip_ticks_instead_of_queueing() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let (a, o) = (Arc::clone(&active), Arc::clone(&overlap));
        let mut poller = Poller::spawn("t", Duration::from_millis(5), move || {
            if a.fetch_add(1, Ordering::SeqCst) > 0 {
                o.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(30));
            a.fetch_sub(1, Ordering::SeqCst);
            Ok(0)
        })
        .unwrap();
        thread::sleep(Duration::from_millis(200));
        poller.stop();
        let stats = poller.stats();
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        assert!(stats.skipped_ticks > 0);
        assert!(stats.cycles < 40);
    }

    #[test]
    fn stop_waits_for_in_flight_cycle_and_drops_its_state() {
        struct Owned(Arc<AtomicUsize>);
        impl Drop for Owned {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let owned = Owned(Arc::clone(&dropped));
        let done = Arc::clone(&finished);
        let (entered_tx, entered_rx) = mpsc::channel();
        let mut poller = Poller::spawn("t", SLOW, move || {
            let _keep = &owned;
            entered_tx.send(()).ok();
            thread::sleep(Duration::from_millis(50));
            done.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        })
        .unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        poller.stop();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(
            poller.request_refresh(),
            Err(TelemetryError::Disposed("poller"))
        );
    }

    #[test]
    fn paused_poller_only_runs_requested_cycles() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let poller = Poller::spawn("t", Duration::from_millis(5), move || {
            Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
        })
        .unwrap();
        while poller.stats().cycles == 0 {
            thread::sleep(Duration::from_millis(2));
        }
        poller.set_paused(true);
        // Let any cycle that raced the pause finish.
        thread::sleep(Duration::from_millis(30));
        let before = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(runs.load(Ordering::SeqCst), before);

        assert!(poller.request_refresh().unwrap().is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), before + 1);
        assert!(poller.is_paused());
    }

    #[test]
    fn interval_change_is_observable() {
        let poller = Poller::spawn("t", SLOW, || Ok(0)).unwrap();
        poller.set_interval(Duration::from_millis(250));
        assert_eq!(poller.interval(), Duration::from_millis(250));
    }
}
