//! Identity-keyed live collections and the reconciliation that updates them.
//!
//! A [`LiveCollection`] keeps records in first-seen order and never holds two
//! records with the same id. Reconciling a fresh sample into it:
//!
//! 1. removes every record whose id is not in the sample,
//! 2. walks the sample in order, replacing an existing record in place only
//!    when [`Keyed::is_visually_different`] says so, and appending new ids,
//! 3. keeps the selected id if it survived, otherwise clears the selection.
//!
//! Nothing is re-sorted. The returned [`ChangeSet`] lists exactly what moved so
//! a consumer can forward it as change notifications.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// A record with a stable identity.
pub trait Keyed: Clone {
    type Id: Clone + Eq + Hash + fmt::Debug;

    fn id(&self) -> Self::Id;

    /// Whether `newer`, a sample of the same id, is worth republishing.
    fn is_visually_different(&self, newer: &Self) -> bool;
}

/// What one reconciliation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<Id> {
    pub removed: Vec<Id>,
    pub changed: Vec<Id>,
    pub added: Vec<Id>,
    /// The selection pointed at a record that is now gone.
    pub selection_cleared: bool,
}

impl<Id> Default for ChangeSet<Id> {
    fn default() -> Self {
        Self {
            removed: Vec::new(),
            changed: Vec::new(),
            added: Vec::new(),
            selection_cleared: false,
        }
    }
}

impl<Id> ChangeSet<Id> {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self.changed.is_empty()
            && self.added.is_empty()
            && !self.selection_cleared
    }

    /// Number of mutation events this change set represents.
    pub fn len(&self) -> usize {
        self.removed.len() + self.changed.len() + self.added.len()
    }
}

/// Ordered, identity-keyed records plus the consumer's selected id.
#[derive(Debug, Clone)]
pub struct LiveCollection<R: Keyed> {
    records: Vec<R>,
    /// id -> position in `records`; rebuilt by every reconciliation.
    index: HashMap<R::Id, usize>,
    selected: Option<R::Id>,
}

impl<R: Keyed> Default for LiveCollection<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Keyed> LiveCollection<R> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
            selected: None,
        }
    }

    /// Build a collection from records, keeping the first record of any
    /// repeated id.
    pub fn from_records(records: impl IntoIterator<Item = R>) -> Self {
        let mut live = Self::new();
        for record in records {
            let id = record.id();
            if !live.index.contains_key(&id) {
                live.index.insert(id, live.records.len());
                live.records.push(record);
            }
        }
        live
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn position(&self, id: &R::Id) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &R::Id) -> Option<&R> {
        self.position(id).map(|i| &self.records[i])
    }

    pub fn contains(&self, id: &R::Id) -> bool {
        self.index.contains_key(id)
    }

    pub fn ids(&self) -> Vec<R::Id> {
        self.records.iter().map(Keyed::id).collect()
    }

    pub fn selected(&self) -> Option<&R::Id> {
        self.selected.as_ref()
    }

    pub fn selected_record(&self) -> Option<&R> {
        self.selected.as_ref().and_then(|id| self.get(id))
    }

    /// Select `id` if it is present. Returns whether it was.
    pub fn select(&mut self, id: R::Id) -> bool {
        if self.contains(&id) {
            self.selected = Some(id);
            true
        } else {
            false
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Merge `sample` into this collection in place.
    pub fn apply(&mut self, sample: &[R]) -> ChangeSet<R::Id> {
        let mut changes = ChangeSet::default();

        let incoming: HashSet<R::Id> = sample.iter().map(Keyed::id).collect();
        self.records.retain(|r| {
            let id = r.id();
            let keep = incoming.contains(&id);
            if !keep {
                changes.removed.push(id);
            }
            keep
        });

        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id(), i))
            .collect();
        let mut changed = HashSet::new();
        for record in sample {
            let id = record.id();
            match self.index.get(&id) {
                Some(&i) => {
                    if self.records[i].is_visually_different(record) {
                        self.records[i] = record.clone();
                        if changed.insert(id.clone()) {
                            changes.changed.push(id);
                        }
                    }
                }
                None => {
                    self.index.insert(id.clone(), self.records.len());
                    self.records.push(record.clone());
                    changes.added.push(id);
                }
            }
        }

        if let Some(selected) = &self.selected {
            if !self.index.contains_key(selected) {
                self.selected = None;
                changes.selection_cleared = true;
            }
        }

        changes
    }
}

/// Pure form of [`LiveCollection::apply`]: leaves `old` untouched.
pub fn reconcile<R: Keyed>(
    old: &LiveCollection<R>,
    sample: &[R],
) -> (LiveCollection<R>, ChangeSet<R::Id>) {
    let mut next = old.clone();
    let changes = next.apply(sample);
    (next, changes)
}
