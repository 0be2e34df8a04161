//! In-memory list of notes shown to the user
//!
//! Kept newest first (date descending, then id descending), the same order
//! the store uses for listings and collection snapshots.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::{Note, NoteId};

fn newest_first(a: &Note, b: &Note) -> Ordering {
    b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id))
}

#[derive(Debug, Clone, Default)]
pub(crate) struct NoteList {
    notes: Vec<Note>,
}

impl NoteList {
    pub fn as_slice(&self) -> &[Note] {
        &self.notes
    }

    /// Take a full snapshot as the new contents
    pub fn replace(&mut self, notes: Vec<Note>) {
        self.notes = notes;
        self.notes.sort_by(newest_first);
    }

    /// Merge a page of notes, skipping ids already present
    ///
    /// Returns the number of notes added.
    pub fn merge_page(&mut self, page: Vec<Note>) -> usize {
        let known: HashSet<NoteId> = self.notes.iter().map(|n| n.id.clone()).collect();
        let before = self.notes.len();
        self.notes
            .extend(page.into_iter().filter(|note| !known.contains(&note.id)));
        let added = self.notes.len() - before;
        if added > 0 {
            self.notes.sort_by(newest_first);
        }
        added
    }

    pub fn remove(&mut self, id: &NoteId) {
        self.notes.retain(|note| note.id != *id);
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use chrono::DateTime;

    fn note(id: &str, micros: i64) -> Note {
        Note {
            id: NoteId::from(id),
            title: id.to_string(),
            content: String::new(),
            date: DateTime::from_timestamp_micros(micros).unwrap(),
            user_id: UserId::from("u1"),
            locked_by: None,
        }
    }

    fn ids(list: &NoteList) -> Vec<&str> {
        list.as_slice().iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_merge_dedups_and_orders() {
        let mut list = NoteList::default();
        list.replace(vec![note("b", 2), note("d", 4)]);

        let added = list.merge_page(vec![note("d", 4), note("a", 1), note("c", 3)]);
        assert_eq!(added, 2);
        assert_eq!(ids(&list), vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn test_merge_keeps_live_copy() {
        let mut list = NoteList::default();
        let mut live = note("a", 5);
        live.title = "live".to_string();
        list.replace(vec![live]);

        // An older page copy of the same note does not overwrite it
        assert_eq!(list.merge_page(vec![note("a", 1)]), 0);
        assert_eq!(list.as_slice()[0].title, "live");
    }

    #[test]
    fn test_equal_dates_break_ties_on_id() {
        let mut list = NoteList::default();
        list.replace(vec![note("a", 1), note("b", 1)]);
        assert_eq!(ids(&list), vec!["b", "a"]);
    }

    #[test]
    fn test_replace_drops_missing() {
        let mut list = NoteList::default();
        list.replace(vec![note("a", 1), note("b", 2)]);
        list.replace(vec![note("a", 1)]);
        assert_eq!(ids(&list), vec!["a"]);

        list.remove(&NoteId::from("a"));
        assert!(list.as_slice().is_empty());
    }
}
