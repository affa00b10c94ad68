//! Per-call key/value metadata propagated through every pipeline stage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Well-known metadata keys.
pub mod keys {
    /// Bearer credential forwarded by the caller or an upstream node.
    pub const AUTHENTICATION: &str = "Authentication";
    /// Marks a call that skips authentication.
    pub const AUTH_IGNORE: &str = "AuthIgnore";
    /// Distributed trace identifier header.
    pub const TRACE_ID: &str = "x-trace-id";
}

/// Ordered string map with ASCII case-insensitive key lookup.
///
/// Header names arrive lowercased from the HTTP layer while handlers use the
/// canonical spelling (`Authentication`), so lookups ignore case. The first
/// spelling inserted for a key is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn find_key(&self, key: &str) -> Option<&String> {
        self.0.keys().find(|k| k.eq_ignore_ascii_case(key))
    }

    /// Returns the value stored under `key`, ignoring case.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.find_key(key)
            .and_then(|k| self.0.get(k))
            .map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.find_key(key).is_some()
    }

    /// Inserts or replaces a value. Returns the previous value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let existing = self.find_key(&key).cloned();
        match existing {
            Some(existing) => self.0.insert(existing, value.into()),
            None => self.0.insert(key, value.into()),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let existing = self.find_key(key).cloned()?;
        self.0.remove(&existing)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut md = Self::new();
        for (k, v) in iter {
            md.insert(k, v);
        }
        md
    }
}
