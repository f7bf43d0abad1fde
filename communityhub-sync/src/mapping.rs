//! Field mapping from local user meta keys to Salesforce Account fields.

use crate::settings::{self, SettingsStore, FIELD_MAPPING_OPTION};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Data associated with one local key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Salesforce Account field API name.
    #[serde(default, alias = "salesforce_key")]
    pub remote: String,
}

impl MappingEntry {
    /// Creates an entry pointing at `remote`.
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
        }
    }
}

/// Ordered mapping of local keys to [`MappingEntry`] values.
///
/// Local keys are unique. Setting an existing key replaces its entry in
/// place, so insertion order is kept. It serializes as a JSON object in that
/// same order, e.g. `{"first_name": {"remote": "FirstName"}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping {
    entries: Vec<(String, MappingEntry)>,
}

impl FieldMapping {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `local_key`.
    pub fn get(&self, local_key: &str) -> Option<&MappingEntry> {
        self.entries
            .iter()
            .find(|(key, _)| key == local_key)
            .map(|(_, entry)| entry)
    }

    /// Inserts or replaces the entry for `local_key`.
    pub fn set(&mut self, local_key: impl Into<String>, entry: MappingEntry) {
        let local_key = local_key.into();
        match self.entries.iter_mut().find(|(key, _)| *key == local_key) {
            Some((_, existing)) => *existing = entry,
            None => self.entries.push((local_key, entry)),
        }
    }

    /// Returns true if `local_key` is mapped.
    pub fn has(&self, local_key: &str) -> bool {
        self.get(local_key).is_some()
    }

    /// Removes and returns the entry for `local_key`.
    pub fn remove(&mut self, local_key: &str) -> Option<MappingEntry> {
        let index = self.entries.iter().position(|(key, _)| key == local_key)?;
        Some(self.entries.remove(index).1)
    }

    /// Iterates over `(local_key, entry)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MappingEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    /// Number of mapped local keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loads the mapping stored under `option_name`.
    ///
    /// A missing or `null` option is an empty mapping.
    pub fn load(store: &dyn SettingsStore, option_name: &str) -> Result<Self, settings::Error> {
        match store.get_option(option_name)? {
            None | Some(Value::Null) => Ok(Self::new()),
            Some(value) => {
                serde_json::from_value(value).map_err(|source| settings::Error::ParseSettings {
                    option: option_name.to_string(),
                    source,
                })
            }
        }
    }

    /// Loads the mapping from the default option.
    pub fn load_default(store: &dyn SettingsStore) -> Result<Self, settings::Error> {
        Self::load(store, FIELD_MAPPING_OPTION)
    }

    /// Persists the mapping under `option_name`.
    pub fn save(&self, store: &dyn SettingsStore, option_name: &str) -> Result<(), settings::Error> {
        let value =
            serde_json::to_value(self).map_err(|source| settings::Error::SerializeSettings {
                option: option_name.to_string(),
                source,
            })?;
        store.set_option(option_name, value)
    }

    /// Collects the account values to write, as `(local_key, value)` pairs.
    ///
    /// An entry is skipped when its remote key is empty, or when the account
    /// value is missing or empty.
    pub fn mapped_values<'a>(
        &'a self,
        account: &'a serde_json::Map<String, Value>,
    ) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        self.iter().filter_map(move |(local_key, entry)| {
            if entry.remote.is_empty() {
                return None;
            }
            account
                .get(&entry.remote)
                .filter(|value| !is_empty_value(value))
                .map(|value| (local_key, value))
        })
    }
}

/// Returns true for the values treated as "no value upstream".
///
/// These are `null`, `false`, `0`, `""`, `"0"` and empty collections.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

impl<K: Into<String>> FromIterator<(K, MappingEntry)> for FieldMapping {
    fn from_iter<I: IntoIterator<Item = (K, MappingEntry)>>(iter: I) -> Self {
        let mut mapping = Self::new();
        for (key, entry) in iter {
            mapping.set(key, entry);
        }
        mapping
    }
}

impl Serialize for FieldMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, entry) in &self.entries {
            map.serialize_entry(key, entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MappingVisitor;

        impl<'de> Visitor<'de> for MappingVisitor {
            type Value = FieldMapping;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of local keys to mapping entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldMapping, A::Error> {
                let mut mapping = FieldMapping::new();
                while let Some((key, entry)) = access.next_entry::<String, MappingEntry>()? {
                    mapping.set(key, entry);
                }
                Ok(mapping)
            }
        }

        deserializer.deserialize_map(MappingVisitor)
    }
}
