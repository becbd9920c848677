//! Pid to display-name cache shared by the background workers and the
//! consumption thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::provider::ProcessControl;

/// Thread-safe name cache. Clones share one map.
#[derive(Clone)]
pub struct ProcessNameCache {
    names: Arc<Mutex<HashMap<u32, String>>>,
    well_known: &'static [(u32, &'static str)],
    resolver: Option<Arc<dyn ProcessControl>>,
}

impl std::fmt::Debug for ProcessNameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessNameCache")
            .field("entries", &self.len())
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl ProcessNameCache {
    pub fn new(resolver: Option<Arc<dyn ProcessControl>>) -> Self {
        let well_known = resolver
            .as_ref()
            .map(|r| r.well_known_names())
            .unwrap_or(&[(0, "System Idle")]);
        Self {
            names: Arc::new(Mutex::new(HashMap::new())),
            well_known,
            resolver,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, String>> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Display name for `pid`. Lookups that fail are cached as `<PID:n>`.
    pub fn resolve(&self, pid: u32) -> String {
        if let Some((_, name)) = self.well_known.iter().find(|(p, _)| *p == pid) {
            return (*name).to_string();
        }
        if let Some(name) = self.lock().get(&pid) {
            return name.clone();
        }
        // Resolve outside the lock; the provider may touch the filesystem.
        let name = self
            .resolver
            .as_ref()
            .and_then(|r| r.process_name(pid))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("<PID:{pid}>"));
        self.lock().entry(pid).or_insert(name).clone()
    }

    /// Record a name learned elsewhere, e.g. from the process list.
    pub fn insert(&self, pid: u32, name: impl Into<String>) {
        let name = name.into();
        if !name.is_empty() {
            self.lock().insert(pid, name);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
