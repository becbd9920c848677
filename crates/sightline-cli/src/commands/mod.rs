pub mod config;
pub mod connections;
pub mod kill;
pub mod priority;
pub mod processes;
pub mod stats;
pub mod watch;

use std::path::PathBuf;

use sightline_core::{Backend, Console, FeedKind, MonitorConfig, ProcessRecord};

/// Options shared by every subcommand.
pub struct Context {
    pub config_path: Option<PathBuf>,
    pub native_lib: Option<PathBuf>,
}

impl Context {
    /// Explicit `--config`, else the per-user default.
    pub fn settings_path(&self) -> Option<PathBuf> {
        self.config_path.clone().or_else(MonitorConfig::default_path)
    }

    /// Load settings and apply command-line overrides. Exits on error.
    pub fn load_config(&self) -> MonitorConfig {
        let mut config = match self.settings_path() {
            Some(path) => MonitorConfig::load(&path).unwrap_or_else(|e| fail(&e.to_string())),
            None => MonitorConfig::default(),
        };
        if let Some(lib) = &self.native_lib {
            config.native_library = Some(lib.clone());
        }
        config
    }

    /// Detect the backend and start the requested feeds. Exits if none of
    /// them could start.
    pub fn start(&self, config: &MonitorConfig, kinds: &[FeedKind]) -> Console {
        let backend = Backend::detect(config).unwrap_or_else(|e| fail(&e.to_string()));
        let console = Console::start_feeds(&backend, config, kinds);
        for (kind, err) in console.disabled() {
            eprintln!("{kind} feed unavailable: {err}");
        }
        if !kinds.iter().any(|&k| console.is_running(k)) {
            fail("no telemetry feed could be started");
        }
        console
    }
}

/// Run one fresh cycle of `kind` and reconcile it.
pub fn sample(console: &mut Console, kind: FeedKind) {
    match console.request_refresh(kind) {
        Ok(outcome) if !outcome.is_ok() => log::warn!("{kind} refresh: {outcome:?}"),
        Ok(_) => {}
        Err(e) => fail(&e.to_string()),
    }
    console.pump();
}

/// Fetch the process list and find `pid` in it. Exits if it is not running.
pub fn find_process(console: &mut Console, pid: u32) -> ProcessRecord {
    sample(console, FeedKind::Processes);
    console
        .processes()
        .and_then(|m| m.feed().collection().get(&pid).cloned())
        .unwrap_or_else(|| fail(&format!("no process with pid {pid}")))
}

pub fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('~');
        out
    }
}
