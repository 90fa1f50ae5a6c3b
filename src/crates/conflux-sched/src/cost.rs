//! Multi-resource cost descriptors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Conventional resource name for "slots".
pub const CAPACITY: &str = "capacity";

/// A mapping from resource name to a non-negative amount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceCost(HashMap<String, u64>);

impl ResourceCost {
    /// The zero cost.
    pub fn none() -> Self {
        Self::default()
    }

    /// A cost of `n` slots under the conventional `capacity` key.
    pub fn slots(n: u64) -> Self {
        Self::none().with(CAPACITY, n)
    }

    /// Add or overwrite one resource amount.
    pub fn with(mut self, resource: impl Into<String>, amount: u64) -> Self {
        self.0.insert(resource.into(), amount);
        self
    }

    /// Amount required of the given resource (zero if unnamed).
    pub fn get(&self, resource: &str) -> u64 {
        self.0.get(resource).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(String, u64)> for ResourceCost {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
