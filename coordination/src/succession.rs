//! The ordered worker list (§4.4): position 1 is always the active
//! coordinator. Every mutation leaves positions contiguous, `1..=len`.

use shardline_model::SuccessionEntryWire;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One row of the succession list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SuccessionEntry {
    pub position: u32,
    pub process_id: String,
    pub url: String,
    pub is_original_coordinator: bool,
}

impl From<SuccessionEntry> for SuccessionEntryWire {
    fn from(entry: SuccessionEntry) -> Self {
        Self {
            position: entry.position,
            process_id: entry.process_id,
            url: entry.url,
            is_original_coordinator: entry.is_original_coordinator,
        }
    }
}

impl From<SuccessionEntryWire> for SuccessionEntry {
    fn from(wire: SuccessionEntryWire) -> Self {
        Self { position: wire.position, process_id: wire.process_id, url: wire.url, is_original_coordinator: wire.is_original_coordinator }
    }
}

#[derive(Debug, Default)]
pub struct SuccessionList {
    entries: Mutex<Vec<SuccessionEntry>>,
}

impl SuccessionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes any existing entry for `process_id`, appends at the end,
    /// and returns the new position.
    pub fn add(&self, process_id: impl Into<String>, url: impl Into<String>, is_original: bool) -> u32 {
        let process_id = process_id.into();
        let mut entries = self.lock();
        entries.retain(|entry| entry.process_id != process_id);
        let position = entries.len() as u32 + 1;
        entries.push(SuccessionEntry { position, process_id, url: url.into(), is_original_coordinator: is_original });
        position
    }

    pub fn remove(&self, process_id: &str) {
        let mut entries = self.lock();
        entries.retain(|entry| entry.process_id != process_id);
        renumber(&mut entries);
    }

    pub fn position_of(&self, process_id: &str) -> Option<u32> {
        self.lock().iter().find(|entry| entry.process_id == process_id).map(|entry| entry.position)
    }

    /// The first standby, i.e. the entry at position 2.
    pub fn next_coordinator(&self) -> Option<SuccessionEntry> {
        self.lock().iter().find(|entry| entry.position == 2).cloned()
    }

    pub fn current_coordinator(&self) -> Option<SuccessionEntry> {
        self.lock().iter().find(|entry| entry.position == 1).cloned()
    }

    /// Replaces the whole list, in ascending-position order, then
    /// re-validates contiguity. Used when applying a broadcast succession
    /// update or a coordinator handoff.
    pub fn load_from(&self, mut entries_in: Vec<SuccessionEntry>) {
        entries_in.sort_by_key(|entry| entry.position);
        let mut entries = self.lock();
        *entries = entries_in;
        renumber(&mut entries);
    }

    /// Moves `process_id` to position 1 (inserting it if absent), pushing
    /// every other entry down by one. Used when an original coordinator
    /// reclaims the role after a recovery.
    pub fn promote_to_first(&self, process_id: impl Into<String>, url: impl Into<String>, is_original: bool) {
        let process_id = process_id.into();
        let mut entries = self.lock();
        entries.retain(|entry| entry.process_id != process_id);
        entries.insert(0, SuccessionEntry { position: 1, process_id, url: url.into(), is_original_coordinator: is_original });
        renumber(&mut entries);
    }

    pub fn snapshot(&self) -> Vec<SuccessionEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SuccessionEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn renumber(entries: &mut [SuccessionEntry]) {
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.position = index as u32 + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_appends_and_returns_position() {
        let list = SuccessionList::new();
        assert_eq!(list.add("w1", "http://a", true), 1);
        assert_eq!(list.add("w2", "http://b", false), 2);
        assert_eq!(list.position_of("w2"), Some(2));
    }

    #[test]
    fn re_adding_an_existing_process_moves_it_to_the_end() {
        let list = SuccessionList::new();
        list.add("w1", "http://a", false);
        list.add("w2", "http://b", false);
        list.add("w1", "http://a", false);
        assert_eq!(list.position_of("w1"), Some(2));
        assert_eq!(list.position_of("w2"), Some(1));
    }

    #[test]
    fn remove_compacts_positions() {
        let list = SuccessionList::new();
        list.add("w1", "http://a", false);
        list.add("w2", "http://b", false);
        list.add("w3", "http://c", false);
        list.remove("w2");
        let snapshot = list.snapshot();
        let positions: Vec<u32> = snapshot.iter().map(|entry| entry.position).collect();
        assert_eq!(positions, vec![1, 2]);
        assert_eq!(list.position_of("w3"), Some(2));
    }

    #[test]
    fn add_then_remove_restores_the_list() {
        let list = SuccessionList::new();
        list.add("w1", "http://a", false);
        let before = list.snapshot();
        list.add("w2", "http://b", false);
        list.remove("w2");
        assert_eq!(list.snapshot(), before);
    }

    #[test]
    fn promote_to_first_reorders_without_duplicating() {
        let list = SuccessionList::new();
        list.add("w1", "http://a", true);
        list.add("w2", "http://b", false);
        list.add("w3", "http://c", false);
        list.promote_to_first("w3", "http://c", false);
        let snapshot = list.snapshot();
        assert_eq!(snapshot[0].process_id, "w3");
        assert_eq!(snapshot.iter().filter(|e| e.process_id == "w3").count(), 1);
        let positions: Vec<u32> = snapshot.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn next_coordinator_is_position_two() {
        let list = SuccessionList::new();
        list.add("w1", "http://a", true);
        list.add("w2", "http://b", false);
        assert_eq!(list.next_coordinator().unwrap().process_id, "w2");
    }
}
