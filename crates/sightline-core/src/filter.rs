//! Text filtering over a live collection.
//!
//! The filtered view holds ids, not records, and is derived from the
//! canonical collection. It is recomputed whenever the filter text or the
//! collection changes and never mutates the collection itself.

use crate::reconcile::{Keyed, LiveCollection};

/// Records that can be matched against a search string.
pub trait Searchable {
    /// True if any searchable field contains `needle`, which is already
    /// trimmed and lower-cased.
    fn matches(&self, needle: &str) -> bool;
}

/// Case-insensitive substring check helper for [`Searchable`] impls.
pub fn contains_folded(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

/// Ids of the records that pass the current filter, in collection order.
#[derive(Debug, Clone)]
pub struct FilteredView<Id> {
    needle: String,
    visible: Vec<Id>,
}

impl<Id> Default for FilteredView<Id> {
    fn default() -> Self {
        Self {
            needle: String::new(),
            visible: Vec::new(),
        }
    }
}

impl<Id: Clone> FilteredView<Id> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.needle
    }

    pub fn is_active(&self) -> bool {
        !self.needle.is_empty()
    }

    /// Replace the filter text and recompute against `collection`.
    pub fn set_text<R>(&mut self, text: &str, collection: &LiveCollection<R>)
    where
        R: Keyed<Id = Id> + Searchable,
    {
        self.needle = text.trim().to_lowercase();
        self.refresh(collection);
    }

    /// Recompute after the collection changed.
    pub fn refresh<R>(&mut self, collection: &LiveCollection<R>)
    where
        R: Keyed<Id = Id> + Searchable,
    {
        self.visible = collection
            .iter()
            .filter(|r| self.needle.is_empty() || r.matches(&self.needle))
            .map(Keyed::id)
            .collect();
    }

    pub fn ids(&self) -> &[Id] {
        &self.visible
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    /// Visible records, resolved against `collection`.
    pub fn records<'a, R>(&self, collection: &'a LiveCollection<R>) -> Vec<&'a R>
    where
        R: Keyed<Id = Id> + Searchable,
    {
        self.visible
            .iter()
            .filter_map(|id| collection.get(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Named {
        id: u32,
        name: &'static str,
    }

    impl Keyed for Named {
        type Id = u32;
        fn id(&self) -> u32 {
            self.id
        }
        fn is_visually_different(&self, newer: &Self) -> bool {
            self.name != newer.name
        }
    }

    impl Searchable for Named {
        fn matches(&self, needle: &str) -> bool {
            contains_folded(self.name, needle) || self.id.to_string().contains(needle)
        }
    }

    fn collection() -> LiveCollection<Named> {
        LiveCollection::from_records([
            Named { id: 10, name: "Firefox" },
            Named { id: 22, name: "sshd" },
            Named { id: 310, name: "fish" },
        ])
    }

    #[test]
    fn empty_filter_shows_everything() {
        let live = collection();
        let mut view = FilteredView::new();
        view.set_text("   ", &live);
        assert!(!view.is_active());
        assert_eq!(view.ids(), &[10, 22, 310]);
    }

    #[test]
    fn matches_name_case_insensitively_or_pid() {
        let live = collection();
        let mut view = FilteredView::new();
        view.set_text("FI", &live);
        assert_eq!(view.ids(), &[10, 310]);
        view.set_text("31", &live);
        assert_eq!(view.ids(), &[310]);
        let names: Vec<&str> = view.records(&live).iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["fish"]);
    }

    #[test]
    fn recomputed_when_collection_changes_without_touching_it() {
        let mut live = collection();
        let mut view = FilteredView::new();
        view.set_text("s", &live);
        assert_eq!(view.ids(), &[22, 310]);
        live.apply(&[Named { id: 22, name: "sshd" }, Named { id: 40, name: "bash" }]);
        view.refresh(&live);
        assert_eq!(view.ids(), &[22, 40]);
        assert_eq!(live.len(), 2);
    }
}
