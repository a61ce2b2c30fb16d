use log::debug;
use serde::Serialize;
use serde_json::Value;

use crate::profile::PropertyMap;
use crate::rpc::string_values;

/// One interaction returned for the current screen, with its parameters resolved for a locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionContext {
    interaction_id: String,
    interaction_type_id: Option<String>,
    handler_name: String,
    position_identifier: Option<String>,
    parameters: PropertyMap,
    locale: Option<String>,
}

impl InteractionContext {
    /// Reads an interaction object. Returns `None` when it has no id or no handler name.
    pub fn from_value(interaction: &Value, requested_locale: Option<&str>) -> Option<Self> {
        let interaction_id = non_empty_str(interaction.get("id"))?;
        let handler_name = non_empty_str(interaction.get("pluginClass"))?;
        let default_locale = non_empty_str(interaction.get("defaultLocale"));

        let bundles = interaction
            .get("parameters")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let (locale, parameters) =
            resolve_locale_parameters(bundles, requested_locale, default_locale.as_deref());

        Some(Self {
            interaction_id,
            interaction_type_id: non_empty_str(interaction.get("myInteractionTypeId")),
            handler_name,
            position_identifier: non_empty_str(interaction.get("position")),
            parameters,
            locale,
        })
    }

    pub fn interaction_id(&self) -> &str {
        &self.interaction_id
    }

    pub fn interaction_type_id(&self) -> Option<&str> {
        self.interaction_type_id.as_deref()
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn position_identifier(&self) -> Option<&str> {
        self.position_identifier.as_deref()
    }

    pub fn parameters(&self) -> &PropertyMap {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&[String]> {
        self.parameters.get(name).map(Vec::as_slice)
    }

    /// Locale whose parameters were used, if any bundle matched.
    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }
}

/// Picks the parameter bundle for the requested locale, else the default locale, else the first
/// locale present. Returns the chosen locale and its parameters.
pub fn resolve_locale_parameters(
    bundles: &[Value],
    requested: Option<&str>,
    default_locale: Option<&str>,
) -> (Option<String>, PropertyMap) {
    let available: Vec<&str> = bundles
        .iter()
        .filter_map(|bundle| bundle.get("locale").and_then(Value::as_str))
        .collect();

    let requested = requested.map(str::trim).filter(|l| !l.is_empty());
    let chosen = requested
        .filter(|l| available.contains(l))
        .or_else(|| default_locale.filter(|l| available.contains(l)))
        .or_else(|| available.first().copied());

    let Some(chosen) = chosen else {
        debug!("[ProfileSync] Interaction has no localized parameters");
        return (None, PropertyMap::new());
    };
    if requested.is_some_and(|r| r != chosen) {
        debug!(
            "[ProfileSync] Locale '{}' not available, using '{}' (available: {:?})",
            requested.unwrap_or_default(),
            chosen,
            available
        );
    }

    let parameters = bundles
        .iter()
        .find(|bundle| bundle.get("locale").and_then(Value::as_str) == Some(chosen))
        .and_then(|bundle| bundle.get("parameter"))
        .and_then(Value::as_array)
        .map(|list| parameter_list_to_map(list))
        .unwrap_or_default();
    (Some(chosen.to_string()), parameters)
}

/// `[{id, value: [..]}]` -> parameter map.
pub(crate) fn parameter_list_to_map(list: &[Value]) -> PropertyMap {
    list.iter()
        .filter_map(|parameter| {
            let id = non_empty_str(parameter.get("id"))?;
            let values = parameter
                .get("value")
                .and_then(Value::as_array)
                .map(|values| string_values(values))
                .unwrap_or_default();
            Some((id, values))
        })
        .collect()
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
