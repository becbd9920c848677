//! # sightline-core
//!
//! Telemetry acquisition and differential synchronisation for a live
//! system console: active network connections, a deep process list, a
//! global performance snapshot and fast CPU/disk rates.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sightline_core::{Backend, Console, MonitorConfig};
//!
//! let config = MonitorConfig::default();
//! let backend = Backend::detect(&config).expect("telemetry backend");
//! let mut console = Console::start(&backend, &config);
//!
//! loop {
//!     for event in console.pump() {
//!         println!("{event:?}");
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! ```
//!
//! ## Architecture
//!
//! Provider → Session → TransferBuffer → Poller thread → hand-off → Reconciler → LiveCollection
//!
//! - A **provider** ([`ConnectionProvider`], [`ProcessProvider`],
//!   [`StatsProvider`]) is the opaque data source: a native shared library
//!   or the built-in procfs readers.
//! - A **session** owns one provider-side resource, checks the record layout
//!   on creation and releases the resource exactly once.
//! - The **poller** runs one cycle at a time per feed on its own thread and
//!   joins manual refreshes into an in-flight cycle.
//! - The **reconciler** turns each new sample into remove/replace/append
//!   operations so unchanged rows and the user's selection survive.
//! - The **action guard** suspends reconciliation while a destructive action
//!   waits for confirmation; samples that straddle it are discarded.
//!
//! [`Console`] ties the feeds together and is driven from one consumption
//! thread via [`Console::pump`].

pub mod actions;
pub mod buffer;
pub mod config;
pub mod error;
pub mod feed;
pub mod filter;
pub mod guard;
pub mod handle;
pub mod monitor;
pub mod names;
pub mod native;
pub mod poller;
#[cfg(target_os = "linux")]
pub mod procfs;
pub mod provider;
pub mod reconcile;
pub mod record;

pub use actions::{ActionOutcome, PriorityLevel, ProcessActions, can_act_on};
pub use buffer::{DEFAULT_BUFFER_CAPACITY, TransferBuffer};
pub use config::MonitorConfig;
pub use error::{Result, TelemetryError};
pub use feed::{CollectionFeed, SampleSink, SampleSource, SnapshotFeed};
pub use filter::{FilteredView, Searchable};
pub use guard::{ActionGuard, ActionLease};
pub use handle::{ConnectionSession, ProcessSession, StatsSession};
pub use monitor::{
    ConnectionKey, ConnectionMonitor, ConnectionSummary, ConnectionView, Console, ConsoleEvent,
    FeedKind, ProcessMonitor, StatsMonitor,
};
pub use names::ProcessNameCache;
pub use native::NativeLibrary;
pub use poller::{CycleOutcome, Poller, PollerStats};
pub use provider::{
    Backend, ConnectionProvider, ProcessControl, ProcessProvider, ProviderHandle, RefreshScope,
    StatsProvider,
};
pub use reconcile::{ChangeSet, Keyed, LiveCollection, reconcile};
pub use record::{
    ConnectionRecord, ConnectionState, PerformanceSnapshot, ProcessRecord, Protocol, SystemStats,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
