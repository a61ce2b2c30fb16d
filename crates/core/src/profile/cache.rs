//! Read-optimized mirror of the last known profile properties.

use serde::{Deserialize, Serialize};

use super::hash;
use super::model::{append_unique, normalize_values, PropertyMap};

/// Local copy of the profile properties plus the domain group they belong to.
///
/// Updated optimistically by local writes and authoritatively by server responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyCache {
    properties: PropertyMap,
    #[serde(default)]
    domain_group: Option<String>,
    #[serde(skip)]
    modified: bool,
}

impl Default for PropertyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyCache {
    /// Empty cache, flagged modified so it gets written once.
    pub fn new() -> Self {
        Self {
            properties: PropertyMap::new(),
            domain_group: None,
            modified: true,
        }
    }

    /// First value of the property, or an empty string.
    pub fn first_value(&self, name: &str) -> String {
        self.properties
            .get(name)
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_default()
    }

    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.properties.get(name).map(Vec::as_slice)
    }

    pub fn all_properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// Appends the values not already stored for `name`.
    pub fn add_values<S: AsRef<str>>(&mut self, name: &str, values: &[S]) {
        if name.is_empty() {
            return;
        }
        let existing = self.properties.entry(name.to_string()).or_default();
        append_unique(existing, values);
        self.modified = true;
    }

    /// Replaces the values stored for `name`.
    pub fn set_values<S: AsRef<str>>(&mut self, name: &str, values: &[S]) {
        if name.is_empty() {
            return;
        }
        self.properties
            .insert(name.to_string(), normalize_values(values));
        self.modified = true;
    }

    pub fn set_all(&mut self, properties: &PropertyMap) {
        for (name, values) in properties {
            self.set_values(name, values);
        }
    }

    pub fn clear(&mut self) {
        self.properties.clear();
        self.modified = true;
    }

    pub fn fingerprint(&self) -> String {
        hash::fingerprint(&self.properties)
    }

    pub fn domain_group(&self) -> Option<&str> {
        self.domain_group.as_deref()
    }

    pub fn set_domain_group(&mut self, domain_group: impl Into<String>) {
        self.domain_group = Some(domain_group.into());
        self.modified = true;
    }

    /// Peeks at the modified flag without resetting it.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Returns the modified flag and resets it.
    pub fn is_dirty_since_last_check(&mut self) -> bool {
        std::mem::take(&mut self.modified)
    }

    /// Re-flags the cache after a failed write.
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_value_defaults_to_empty() {
        let mut cache = PropertyCache::new();
        assert_eq!(cache.first_value("hobby"), "");
        assert!(cache.values("hobby").is_none());

        cache.set_values("hobby", &["tennis", "golf"]);
        assert_eq!(cache.first_value("hobby"), "tennis");
    }

    #[test]
    fn add_values_keeps_existing_order() {
        let mut cache = PropertyCache::new();
        cache.add_values("p", &["a", "b"]);
        cache.add_values("p", &["b", "c", "a"]);
        assert_eq!(cache.values("p").unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn set_values_filters_empty_strings() {
        let mut cache = PropertyCache::new();
        cache.set_values("p", &["x"]);
        cache.set_values("p", &["", "y", ""]);
        assert_eq!(cache.values("p").unwrap(), ["y"]);
    }

    #[test]
    fn empty_name_is_ignored() {
        let mut cache = PropertyCache::new();
        cache.is_dirty_since_last_check();
        cache.set_values("", &["x"]);
        cache.add_values("", &["x"]);
        assert!(cache.all_properties().is_empty());
        assert!(!cache.is_dirty_since_last_check());
    }

    #[test]
    fn dirty_flag_is_one_shot() {
        let mut cache = PropertyCache::new();
        assert!(cache.is_dirty_since_last_check());
        assert!(!cache.is_dirty_since_last_check());

        cache.set_domain_group("dg-1");
        assert!(cache.is_modified());
        assert!(cache.is_dirty_since_last_check());
        assert!(!cache.is_dirty_since_last_check());
        assert_eq!(cache.domain_group(), Some("dg-1"));
    }

    #[test]
    fn clear_empties_and_flags() {
        let mut cache = PropertyCache::new();
        cache.set_values("x", &["1"]);
        cache.is_dirty_since_last_check();
        cache.clear();
        assert_eq!(cache.first_value("x"), "");
        assert!(cache.is_dirty_since_last_check());
    }

    #[test]
    fn fingerprint_tracks_content() {
        let mut cache = PropertyCache::new();
        cache.set_values("a", &["b"]);
        let first = cache.fingerprint();
        assert_eq!(first, cache.fingerprint());
        cache.set_values("a", &["c"]);
        assert_ne!(first, cache.fingerprint());
    }

    #[test]
    fn deserialized_cache_starts_clean() {
        let mut cache = PropertyCache::new();
        cache.set_values("a", &["b"]);
        let json = serde_json::to_string(&cache).unwrap();
        let mut restored: PropertyCache = serde_json::from_str(&json).unwrap();
        assert!(!restored.is_dirty_since_last_check());
        assert_eq!(restored.all_properties(), cache.all_properties());
    }
}
