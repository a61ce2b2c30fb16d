//! Write-ahead buffer of profile mutations that have not been confirmed by the server.
//!
//! Two logs exist at runtime: the live log, which takes application writes at any time, and
//! the request log, which the sync worker fills via [`CommitLog::merge`] right before a batch
//! is built and clears only after the batch was applied.

mod entry;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::profile::{normalize_values, EventType, OperationType};

pub use entry::*;

/// Insertion-ordered commit entries plus a "modified since last persisted" flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLog {
    entries: Vec<CommitEntry>,
    #[serde(skip)]
    modified: bool,
}

impl Default for CommitLog {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitLog {
    /// Empty log, flagged modified so it gets written once.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            modified: true,
        }
    }

    /// Buffers a SET. Replaces the values of an existing entry for `name`.
    pub fn set_property<S: AsRef<str>>(&mut self, name: &str, values: &[S]) {
        let values = normalize_values(values);
        if name.is_empty() || values.is_empty() {
            return;
        }

        match self.property_entry_mut(name) {
            Some(existing) => existing.replace(values),
            None => self.entries.push(CommitEntry::Property(PropertyEntry::new(
                name,
                OperationType::Set,
                values,
            ))),
        }
        self.modified = true;
    }

    /// Buffers an ADD. Unions with the values of an existing entry for `name`.
    pub fn add_property<S: AsRef<str>>(&mut self, name: &str, values: &[S]) {
        let values = normalize_values(values);
        if name.is_empty() || values.is_empty() {
            return;
        }

        match self.property_entry_mut(name) {
            Some(existing) => {
                existing.extend(&values);
            }
            None => self.entries.push(CommitEntry::Property(PropertyEntry::new(
                name,
                OperationType::Add,
                values,
            ))),
        }
        self.modified = true;
    }

    /// Counts one occurrence of `event_type` for `interaction_id`.
    pub fn record_event(&mut self, event_type: EventType, interaction_id: &str) {
        if interaction_id.is_empty() {
            return;
        }
        self.apply_event(event_type, interaction_id, 1);
        self.modified = true;
    }

    fn apply_event(&mut self, event_type: EventType, interaction_id: &str, amount: u32) {
        let existing = self.entries.iter_mut().find_map(|entry| match entry {
            CommitEntry::Event(event) if event.matches(event_type, interaction_id) => Some(event),
            _ => None,
        });
        match existing {
            Some(event) => event.increase(amount),
            None => self.entries.push(CommitEntry::Event(EventEntry::new(
                event_type,
                interaction_id,
                amount,
            ))),
        }
    }

    pub fn property_entry(&self, name: &str) -> Option<&PropertyEntry> {
        self.entries.iter().find_map(|entry| match entry {
            CommitEntry::Property(property) if property.property_id() == name => Some(property),
            _ => None,
        })
    }

    fn property_entry_mut(&mut self, name: &str) -> Option<&mut PropertyEntry> {
        self.entries.iter_mut().find_map(|entry| match entry {
            CommitEntry::Property(property) if property.property_id() == name => Some(property),
            _ => None,
        })
    }

    pub fn event_entry(&self, event_type: EventType, interaction_id: &str) -> Option<&EventEntry> {
        self.events()
            .into_iter()
            .find(|event| event.matches(event_type, interaction_id))
    }

    /// Property entries of one operation, keyed by property id.
    pub fn entries_by_operation(&self, operation: OperationType) -> BTreeMap<&str, &PropertyEntry> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                CommitEntry::Property(property) if property.operation() == operation => {
                    Some((property.property_id(), property))
                }
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<&EventEntry> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                CommitEntry::Event(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn entries(&self) -> &[CommitEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry. Does not touch the modified flag.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replays `other` into this log (SET overwrites, ADD unions, event counts add), then
    /// empties `other`.
    pub fn merge(&mut self, other: &mut CommitLog) {
        if other.is_empty() {
            return;
        }

        for entry in std::mem::take(&mut other.entries) {
            match entry {
                CommitEntry::Property(property) => {
                    let (name, values) = (property.property_id(), property.values());
                    match property.operation() {
                        OperationType::Set => self.set_property(name, values),
                        OperationType::Add => self.add_property(name, values),
                    }
                }
                CommitEntry::Event(event) => {
                    self.apply_event(event.event_type(), event.interaction_id(), event.count());
                    self.modified = true;
                }
            }
        }
        // The drained log no longer matches what is on disk.
        other.modified = true;
    }

    /// Peeks at the modified flag without resetting it.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Returns the modified flag and resets it.
    pub fn is_dirty_since_last_check(&mut self) -> bool {
        std::mem::take(&mut self.modified)
    }

    pub fn mark_modified(&mut self) {
        self.modified = true;
    }
}
