//! Batch responses keyed by call id.

use serde_json::{Map, Value};
use std::collections::HashMap;

use super::call::CallId;
use crate::errors::{Error, Result};
use crate::profile::PropertyMap;

/// Identity fields of a `getProfile` result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileResult {
    pub profile_id: Option<String>,
    pub domain_group_id: Option<String>,
}

/// Parsed batch response: call id -> call result object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcResponse {
    results: HashMap<String, Value>,
}

impl RpcResponse {
    /// Builds a response from the decoded JSON payload, which must be an array of result objects.
    pub fn from_value(payload: Value) -> Result<Self> {
        let Value::Array(items) = payload else {
            return Err(Error::parse("Batch response is not a JSON array"));
        };

        let mut results = HashMap::with_capacity(items.len());
        for item in items {
            let id = match item.get("id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => continue,
            };
            results.insert(id, item);
        }
        Ok(Self { results })
    }

    /// Parses a response body, unwrapping a `bc_json(...)` envelope when present.
    pub fn from_body(body: &str) -> Result<Self> {
        let payload = unwrap_envelope(body);
        if payload.is_empty() {
            return Err(Error::parse("Empty response body"));
        }
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(value)
    }

    /// Inserts a raw call result, mostly useful for scripted transports.
    pub fn insert(&mut self, id: impl Into<String>, result: Value) {
        self.results.insert(id.into(), result);
    }

    pub fn with_result(mut self, id: impl Into<String>, result: Value) -> Self {
        self.insert(id, result);
        self
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Full result object of a call.
    pub fn call(&self, id: &str) -> Option<&Value> {
        self.results.get(id)
    }

    /// The `result` sub-object of a call.
    pub fn result(&self, id: &str) -> Option<&Map<String, Value>> {
        self.call(id)?.get("result")?.as_object()
    }

    pub fn profile(&self) -> Option<ProfileResult> {
        let call = self.call(&CallId::Profile.key())?;
        let result = call.get("result").and_then(Value::as_object);

        let profile_id = result
            .and_then(|r| r.get("profileId"))
            .or_else(|| call.get("profileId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let domain_group_id = result
            .and_then(|r| r.get("domainGroupId"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(ProfileResult {
            profile_id,
            domain_group_id,
        })
    }

    /// `result.properties` of a call as a property map.
    pub fn properties(&self, id: &str) -> Option<PropertyMap> {
        let properties = self.result(id)?.get("properties")?.as_object()?;
        Some(parse_property_map(properties))
    }

    /// `result.properties` of a call kept as an opaque JSON object.
    pub fn raw_properties(&self, id: &str) -> Option<Map<String, Value>> {
        self.result(id)?.get("properties")?.as_object().cloned()
    }

    pub fn interactions(&self, id: &str) -> &[Value] {
        self.array_field(id, "interactions")
    }

    pub fn connections(&self, id: &str) -> Option<&[Value]> {
        self.result(id)?
            .get("connections")?
            .as_array()
            .map(Vec::as_slice)
    }

    fn array_field(&self, id: &str, field: &str) -> &[Value] {
        self.result(id)
            .and_then(|r| r.get(field))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// `{name: [string]}` -> property map. Non-string list items and non-list values are skipped.
pub fn parse_property_map(properties: &Map<String, Value>) -> PropertyMap {
    properties
        .iter()
        .filter_map(|(name, values)| {
            let values = values.as_array()?;
            Some((name.clone(), string_values(values)))
        })
        .collect()
}

pub(crate) fn string_values(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

fn unwrap_envelope(body: &str) -> &str {
    let trimmed = body.trim();
    trimmed
        .strip_prefix("bc_json(")
        .and_then(|inner| inner.strip_suffix(')'))
        .map(str::trim)
        .unwrap_or(trimmed)
}
