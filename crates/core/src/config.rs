//! Dispatcher configuration
//!
//! Settings are plain string pairs. Keys in the reserved `AUTO_` namespace are
//! accepted verbatim; the only other accepted key is the `PERF_COUNT` toggle,
//! which must be `YES` or `NO`.

use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// Reserved namespace prefix
pub const NAMESPACE_PREFIX: &str = "AUTO_";
/// Comma-delimited explicit device list
pub const KEY_DEVICE_LIST: &str = "AUTO_DEVICE_LIST";
/// Performance counter toggle
pub const KEY_PERF_COUNT: &str = "PERF_COUNT";
pub const YES: &str = "YES";
pub const NO: &str = "NO";

/// Keys reported under the `SUPPORTED_CONFIG_KEYS` metric
pub fn supported_config_keys() -> Vec<String> {
    vec![KEY_DEVICE_LIST.to_string(), KEY_PERF_COUNT.to_string()]
}

/// String key/value settings. Iteration order is by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigMap(BTreeMap<String, String>);

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Parse `KEY=VALUE` pairs, later pairs overriding earlier ones
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| CoreError::MalformedPair(pair.to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(CoreError::MalformedPair(pair.to_string()));
            }
            map.insert(key, value.trim());
        }
        Ok(map)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    /// Raw explicit device list, if configured
    pub fn device_list(&self) -> Option<&str> {
        self.get(KEY_DEVICE_LIST)
    }

    /// Performance counters are requested by the presence of the toggle,
    /// whatever its value
    pub fn perf_count_enabled(&self) -> bool {
        self.contains_key(KEY_PERF_COUNT)
    }

    /// Copy every entry of `other` into `self`, overriding shared keys
    pub fn extend_from(&mut self, other: &ConfigMap) {
        for (key, value) in other.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<'a> IntoIterator for &'a ConfigMap {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Right-biased merge: `overrides` wins on shared keys
pub fn merge(base: &ConfigMap, overrides: &ConfigMap) -> ConfigMap {
    let mut merged = base.clone();
    merged.extend_from(overrides);
    merged
}

/// Check a single key/value pair against the accepted-key policy
pub fn validate_entry(key: &str, value: &str) -> Result<()> {
    if key.starts_with(NAMESPACE_PREFIX) {
        return Ok(());
    }
    if key == KEY_PERF_COUNT {
        if value == YES || value == NO {
            return Ok(());
        }
        return Err(CoreError::UnsupportedValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Err(CoreError::UnsupportedKey(key.to_string()))
}

/// Reject the map at its first unsupported key or value
pub fn validate(config: &ConfigMap) -> Result<()> {
    config
        .iter()
        .try_for_each(|(key, value)| validate_entry(key, value))
}
