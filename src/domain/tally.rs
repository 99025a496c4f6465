//! Tally reconciliation: merges incoming counts and diffs keyed lists.
//!
//! Every collection-bearing resource routes its event deltas through these
//! two functions so that list bookkeeping behaves identically everywhere.

use serde::{Deserialize, Serialize};

use super::types::{Tally, TallyField};

/// Counts carried by an event. Absent fields leave the current value alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyUpdate {
    #[serde(default)]
    pub up: Option<u32>,
    #[serde(default)]
    pub down: Option<u32>,
    #[serde(default)]
    pub unknown: Option<u32>,
    #[serde(default)]
    pub partial: Option<u32>,
    #[serde(default)]
    pub empty: Option<u32>,
}

impl TallyUpdate {
    pub fn get(&self, field: TallyField) -> Option<u32> {
        match field {
            TallyField::Up => self.up,
            TallyField::Down => self.down,
            TallyField::Unknown => self.unknown,
            TallyField::Partial => self.partial,
            TallyField::Empty => self.empty,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.up.is_none()
            && self.down.is_none()
            && self.unknown.is_none()
            && self.partial.is_none()
            && self.empty.is_none()
    }
}

/// Overwrite every field in `fields` that `incoming` defines.
///
/// Returns the tally as it was before the merge.
pub fn reconcile_tally(current: &mut Tally, incoming: &TallyUpdate, fields: &[TallyField]) -> Tally {
    let previous = *current;
    for &field in fields {
        if let Some(value) = incoming.get(field) {
            current.set(field, value);
        }
    }
    previous
}

/// An element of a reconciled list, identified by a string key.
pub trait ListEntry: Clone {
    fn key(&self) -> &str;
}

impl ListEntry for String {
    fn key(&self) -> &str {
        self
    }
}

/// Outcome of a list reconciliation. `added` and `removed` hold only the
/// entries that actually changed the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListDelta<T> {
    pub new_list: Vec<T>,
    pub old_list: Vec<T>,
    pub added: Vec<T>,
    pub removed: Vec<String>,
}

impl<T> ListDelta<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Remove every entry keyed in `removed`, then append every entry of `added`
/// whose key is not already present. Unknown removals and duplicate
/// additions are ignored, which makes a repeated call a no-op.
pub fn reconcile_list<T: ListEntry>(current: &mut Vec<T>, added: &[T], removed: &[String]) -> ListDelta<T> {
    let old_list = current.clone();
    let mut actually_removed = Vec::new();
    let mut actually_added = Vec::new();

    for key in removed {
        if let Some(pos) = current.iter().position(|e| e.key() == key.as_str()) {
            current.remove(pos);
            actually_removed.push(key.clone());
        }
    }

    for entry in added {
        if !current.iter().any(|e| e.key() == entry.key()) {
            current.push(entry.clone());
            actually_added.push(entry.clone());
        }
    }

    ListDelta {
        new_list: current.clone(),
        old_list,
        added: actually_added,
        removed: actually_removed,
    }
}

/// Diff a freshly computed list against `current` and adopt it wholesale.
///
/// Used by projections whose membership is recomputed rather than delivered
/// as deltas; the order of `next` becomes the order of the list.
pub fn replace_list<T: ListEntry>(current: &mut Vec<T>, next: Vec<T>) -> ListDelta<T> {
    let old_list = std::mem::replace(current, next);
    let removed = old_list
        .iter()
        .filter(|old| !current.iter().any(|e| e.key() == old.key()))
        .map(|old| old.key().to_string())
        .collect();
    let added = current
        .iter()
        .filter(|e| !old_list.iter().any(|old| old.key() == e.key()))
        .cloned()
        .collect();
    ListDelta {
        new_list: current.clone(),
        old_list,
        added,
        removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reconcile_tally_leaves_absent_fields() {
        let mut tally = Tally {
            up: 1,
            down: 2,
            unknown: 3,
            partial: Some(4),
            empty: None,
        };
        let previous = reconcile_tally(
            &mut tally,
            &TallyUpdate {
                up: Some(9),
                partial: Some(0),
                ..Default::default()
            },
            TallyField::WITH_PARTIAL,
        );
        assert_eq!(previous.up, 1);
        assert_eq!(tally.up, 9);
        assert_eq!(tally.down, 2);
        assert_eq!(tally.unknown, 3);
        assert_eq!(tally.partial, Some(0));
    }

    #[test]
    fn reconcile_tally_ignores_fields_the_collection_does_not_track() {
        let mut tally = Tally::zeroed(TallyField::BASIC);
        reconcile_tally(
            &mut tally,
            &TallyUpdate {
                empty: Some(5),
                ..Default::default()
            },
            TallyField::BASIC,
        );
        assert_eq!(tally.empty, None);
    }

    #[test]
    fn removals_apply_before_additions() {
        let mut list = ids(&["snoop", "melanie"]);
        let delta = reconcile_list(&mut list, &ids(&["phoenix"]), &ids(&["snoop", "melanie"]));
        assert_eq!(list, ids(&["phoenix"]));
        assert_eq!(delta.added, ids(&["phoenix"]));
        assert_eq!(delta.removed, ids(&["snoop", "melanie"]));
        assert_eq!(delta.old_list, ids(&["snoop", "melanie"]));
    }

    #[test]
    fn unknown_removals_and_duplicate_additions_are_ignored() {
        let mut list = ids(&["a"]);
        let delta = reconcile_list(&mut list, &ids(&["a", "b", "b"]), &ids(&["zzz"]));
        assert_eq!(list, ids(&["a", "b"]));
        assert_eq!(delta.added, ids(&["b"]));
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn second_identical_reconcile_is_a_no_op() {
        let mut list = ids(&["a", "b", "c"]);
        let first = reconcile_list(&mut list, &ids(&["d"]), &ids(&["b"]));
        assert!(!first.is_empty());
        let after_first = list.clone();

        let second = reconcile_list(&mut list, &ids(&["d"]), &ids(&["b"]));
        assert!(second.is_empty());
        assert_eq!(list, after_first);
    }

    #[test]
    fn removing_middle_entry_preserves_order() {
        let mut list = ids(&["h,/a", "h,/b", "h,/c"]);
        reconcile_list(&mut list, &[], &ids(&["h,/b"]));
        assert_eq!(list, ids(&["h,/a", "h,/c"]));
    }

    #[test]
    fn replace_list_reports_membership_changes() {
        let mut list = ids(&["a", "b"]);
        let delta = replace_list(&mut list, ids(&["b", "c"]));
        assert_eq!(delta.added, ids(&["c"]));
        assert_eq!(delta.removed, ids(&["a"]));
        assert_eq!(list, ids(&["b", "c"]));

        let again = replace_list(&mut list, ids(&["b", "c"]));
        assert!(again.is_empty());
    }
}
