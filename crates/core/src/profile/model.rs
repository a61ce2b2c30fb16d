//! Shared profile data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Property name -> ordered, duplicate-free values.
pub type PropertyMap = BTreeMap<String, Vec<String>>;

/// Event type name used to register a screen view; never buffered in a commit log.
pub const PAGEVIEW_EVENT: &str = "PAGEVIEW";

/// How a buffered property mutation is applied server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Add,
    Set,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Set => "SET",
        }
    }
}

/// Interaction event types that are buffered and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    View,
    Click,
    Conversion,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "VIEW",
            Self::Click => "CLICK",
            Self::Conversion => "CONVERSION",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "VIEW" => Ok(Self::View),
            "CLICK" => Ok(Self::Click),
            "CONVERSION" => Ok(Self::Conversion),
            other => Err(format!("Unsupported event type '{}'", other)),
        }
    }
}

/// Drops empty strings and duplicates, keeping first-seen order.
pub fn normalize_values<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    let mut result: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.as_ref();
        if !value.is_empty() && !result.iter().any(|existing| existing == value) {
            result.push(value.to_string());
        }
    }
    result
}

/// Appends the values not yet present in `target`. Returns whether anything was added.
pub fn append_unique<S: AsRef<str>>(target: &mut Vec<String>, values: &[S]) -> bool {
    let before = target.len();
    for value in values {
        let value = value.as_ref();
        if !value.is_empty() && !target.iter().any(|existing| existing == value) {
            target.push(value.to_string());
        }
    }
    target.len() != before
}
