use serde::Serialize;
use serde_json::Value;

use super::context::parameter_list_to_map;
use crate::profile::PropertyMap;

/// Named parameter bundle returned alongside the interactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    id: String,
    parameters: PropertyMap,
}

impl Connection {
    pub fn new(id: impl Into<String>, parameters: PropertyMap) -> Self {
        Self {
            id: id.into(),
            parameters,
        }
    }

    /// Reads `{id, parameters: [{parameter: [..]}]}`; only the first bundle is used.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = value.get("id").and_then(Value::as_str)?;
        let parameters = value
            .get("parameters")
            .and_then(Value::as_array)
            .and_then(|bundles| bundles.first())
            .and_then(|bundle| bundle.get("parameter"))
            .and_then(Value::as_array)
            .map(|list| parameter_list_to_map(list))
            .unwrap_or_default();
        Some(Self::new(id, parameters))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parameters(&self) -> &PropertyMap {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&[String]> {
        self.parameters.get(name).map(Vec::as_slice)
    }
}

pub fn parse_connections(values: &[Value]) -> Vec<Connection> {
    values.iter().filter_map(Connection::from_value).collect()
}
