//! Remote procedure calls and the batch layouts the sync layer sends.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::commit_log::{EventEntry, PropertyEntry};
use crate::errors::Result;
use crate::profile::{EventType, PAGEVIEW_EVENT};

/// Remote methods exposed by the profile endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    GetProfile,
    GetProperties,
    AddProperties,
    SetProperties,
    CreateEvent,
    GetPropertyLabels,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetProfile => "getProfile",
            Self::GetProperties => "getProperties",
            Self::AddProperties => "addProperties",
            Self::SetProperties => "setProperties",
            Self::CreateEvent => "createEvent",
            Self::GetPropertyLabels => "getPropertyLabels",
        }
    }
}

/// Fixed call ids within a sync batch. Event calls follow from [`FIRST_EVENT_CALL_ID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallId {
    Profile = 0,
    AddProperties = 1,
    SetProperties = 2,
    GetProperties = 3,
    Interactions = 4,
}

impl CallId {
    pub fn key(self) -> String {
        (self as u32).to_string()
    }
}

pub const FIRST_EVENT_CALL_ID: u32 = 5;

/// Call id of the labels call in a labels refresh batch.
pub const LABELS_CALL_ID: u32 = 1;

/// One named call in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    method: RpcMethod,
    id: String,
    params: Option<Value>,
}

impl RpcCall {
    pub fn new(method: RpcMethod, id: u32, params: Option<Value>) -> Self {
        Self {
            method,
            id: id.to_string(),
            params,
        }
    }

    /// `getProfile` with `forceCreate`, so the server creates a profile when none exists.
    pub fn get_profile(id: u32) -> Self {
        Self::new(
            RpcMethod::GetProfile,
            id,
            Some(json!({ "forceCreate": ["true"] })),
        )
    }

    /// `getProperties`, optionally restricted to properties that differ from `hash`.
    pub fn get_properties(id: u32, hash: Option<&str>) -> Self {
        let params = match hash {
            Some(hash) => json!({ "hash": [hash] }),
            None => json!({}),
        };
        Self::new(RpcMethod::GetProperties, id, Some(params))
    }

    pub fn add_properties(id: u32, entries: &BTreeMap<&str, &PropertyEntry>) -> Self {
        Self::new(
            RpcMethod::AddProperties,
            id,
            Some(properties_params(entries)),
        )
    }

    pub fn set_properties(id: u32, entries: &BTreeMap<&str, &PropertyEntry>) -> Self {
        Self::new(
            RpcMethod::SetProperties,
            id,
            Some(properties_params(entries)),
        )
    }

    pub fn create_event(id: u32, event_type: EventType, interaction_id: &str) -> Self {
        Self::new(
            RpcMethod::CreateEvent,
            id,
            Some(json!({ "type": [event_type.as_str()], "interaction": [interaction_id] })),
        )
    }

    /// Registers a screen view; the response carries the interactions for that screen.
    pub fn page_view(id: u32) -> Self {
        Self::new(
            RpcMethod::CreateEvent,
            id,
            Some(json!({ "type": [PAGEVIEW_EVENT] })),
        )
    }

    pub fn property_labels(id: u32) -> Self {
        Self::new(RpcMethod::GetPropertyLabels, id, None)
    }

    pub fn method(&self) -> RpcMethod {
        self.method
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    /// Wire form: `params` travels as a JSON-encoded string.
    pub fn to_wire(&self) -> Result<Value> {
        let mut object = Map::new();
        object.insert("method".to_string(), json!(self.method.as_str()));
        object.insert("alt".to_string(), json!("json"));
        object.insert("id".to_string(), json!(self.id));
        if let Some(params) = &self.params {
            object.insert(
                "params".to_string(),
                Value::String(serde_json::to_string(params)?),
            );
        }
        Ok(Value::Object(object))
    }
}

fn properties_params(entries: &BTreeMap<&str, &PropertyEntry>) -> Value {
    let properties: Map<String, Value> = entries
        .iter()
        .map(|(name, entry)| (name.to_string(), json!(entry.values())))
        .collect();
    json!({ "properties": properties })
}

/// JSON array text of a whole batch.
pub fn encode_batch(calls: &[RpcCall]) -> Result<String> {
    let wire = calls
        .iter()
        .map(RpcCall::to_wire)
        .collect::<Result<Vec<_>>>()?;
    Ok(serde_json::to_string(&wire)?)
}

/// Profile call, then add/set calls when non-empty, then one call per event occurrence.
pub fn build_update_calls(
    to_add: &BTreeMap<&str, &PropertyEntry>,
    to_set: &BTreeMap<&str, &PropertyEntry>,
    events: &[&EventEntry],
) -> Vec<RpcCall> {
    let mut calls = vec![RpcCall::get_profile(CallId::Profile as u32)];

    if !to_add.is_empty() {
        calls.push(RpcCall::add_properties(CallId::AddProperties as u32, to_add));
    }
    if !to_set.is_empty() {
        calls.push(RpcCall::set_properties(CallId::SetProperties as u32, to_set));
    }

    let mut next_id = FIRST_EVENT_CALL_ID;
    for event in events {
        for _ in 0..event.count() {
            calls.push(RpcCall::create_event(
                next_id,
                event.event_type(),
                event.interaction_id(),
            ));
            next_id += 1;
        }
    }
    calls
}

/// Batch of a labels refresh: profile first so the server has a profile to label.
pub fn build_labels_calls() -> Vec<RpcCall> {
    vec![
        RpcCall::get_profile(CallId::Profile as u32),
        RpcCall::property_labels(LABELS_CALL_ID),
    ]
}
