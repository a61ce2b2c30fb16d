//! Commit log entry types.

use serde::{Deserialize, Serialize};

use crate::profile::{append_unique, EventType, OperationType};

/// A buffered mutation waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommitEntry {
    Property(PropertyEntry),
    Event(EventEntry),
}

/// Pending add/set of values for one property. At most one per property id in a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyEntry {
    property_id: String,
    operation: OperationType,
    values: Vec<String>,
}

impl PropertyEntry {
    pub(crate) fn new(property_id: &str, operation: OperationType, values: Vec<String>) -> Self {
        Self {
            property_id: property_id.to_string(),
            operation,
            values,
        }
    }

    pub fn property_id(&self) -> &str {
        &self.property_id
    }

    pub fn operation(&self) -> OperationType {
        self.operation
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// A later SET supersedes whatever was buffered, including an ADD.
    pub(crate) fn replace(&mut self, values: Vec<String>) {
        self.operation = OperationType::Set;
        self.values = values;
    }

    /// Union with the buffered values. A buffered SET stays a SET.
    pub(crate) fn extend(&mut self, values: &[String]) -> bool {
        append_unique(&mut self.values, values)
    }
}

/// Pending event occurrences for one (interaction, type) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEntry {
    interaction_id: String,
    event_type: EventType,
    count: u32,
}

impl EventEntry {
    pub(crate) fn new(event_type: EventType, interaction_id: &str, count: u32) -> Self {
        Self {
            interaction_id: interaction_id.to_string(),
            event_type,
            count: count.max(1),
        }
    }

    pub fn interaction_id(&self) -> &str {
        &self.interaction_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub(crate) fn increase(&mut self, amount: u32) {
        self.count = self.count.saturating_add(amount);
    }

    pub(crate) fn matches(&self, event_type: EventType, interaction_id: &str) -> bool {
        self.event_type == event_type && self.interaction_id == interaction_id
    }
}
