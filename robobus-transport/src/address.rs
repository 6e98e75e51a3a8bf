//! Logical peer names to endpoints.

use std::collections::BTreeMap;
use std::sync::RwLock;

use robobus_core::Endpoint;

/// Maps peer names (`"arm"`, `"drive"`) to where they listen.
///
/// Filled from [`NodeConfig::peers`](crate::NodeConfig::peers) or at runtime;
/// how a deployment discovers the endpoints is up to the caller.
#[derive(Debug, Default)]
pub struct AddressTable {
    entries: RwLock<BTreeMap<String, Endpoint>>,
}

impl AddressTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry, returning the previous endpoint.
    pub fn insert(&self, name: impl Into<String>, endpoint: Endpoint) -> Option<Endpoint> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), endpoint)
    }

    /// Look up a name.
    pub fn resolve(&self, name: &str) -> Option<Endpoint> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Remove an entry.
    pub fn remove(&self, name: &str) -> Option<Endpoint> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    /// Known names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<(String, Endpoint)> for AddressTable {
    fn from_iter<I: IntoIterator<Item = (String, Endpoint)>>(iter: I) -> Self {
        Self {
            entries: RwLock::new(iter.into_iter().collect()),
        }
    }
}
