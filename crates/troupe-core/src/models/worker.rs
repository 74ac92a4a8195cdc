//! Workers and the capability tags they advertise.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tagged skill a worker advertises (e.g. `code_generation`).
///
/// Tags are normalized to lowercase so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Capability(String);

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Normalize on the way in so externally-authored tags match.
        let tag = String::deserialize(deserializer)?;
        Ok(Self::new(tag))
    }
}

impl Capability {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tag attached to every topic step by the planner.
    pub fn topic_expertise() -> Self {
        Self::new("topic_expertise")
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Capability {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// An explicit tagged set with a superset-membership test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn remove(&mut self, capability: &Capability) -> bool {
        self.0.remove(capability)
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }

    /// True when every capability in `required` is present in `self`.
    pub fn is_superset_of(&self, required: &CapabilitySet) -> bool {
        required.0.iter().all(|c| self.0.contains(c))
    }

    pub fn union(&self, other: &CapabilitySet) -> CapabilitySet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comma-joined tags, used in error messages and logs.
    pub fn describe(&self) -> String {
        self.0
            .iter()
            .map(Capability::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(Capability::new).collect())
    }
}

/// An entity that can execute workflow steps.
///
/// Mutated only by the router (`last_interaction`) and by external
/// capability assignment. Never deleted mid-workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: String,
    pub name: String,
    pub capabilities: CapabilitySet,
    pub last_interaction: DateTime<Utc>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(id: String, name: String, capabilities: CapabilitySet) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            capabilities,
            last_interaction: now,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_normalization() {
        assert_eq!(Capability::new("  Code_Generation "), Capability::new("code_generation"));
    }

    #[test]
    fn test_superset_membership() {
        let a: CapabilitySet = ["x", "y"].into_iter().collect();
        let b: CapabilitySet = ["x"].into_iter().collect();
        let required: CapabilitySet = ["x", "y"].into_iter().collect();

        assert!(a.is_superset_of(&required));
        assert!(!b.is_superset_of(&required));
        assert!(a.is_superset_of(&CapabilitySet::new()));
    }

    #[test]
    fn test_union_keeps_both_sides() {
        let a: CapabilitySet = ["research"].into_iter().collect();
        let b: CapabilitySet = ["writing"].into_iter().collect();
        let merged = a.union(&b);
        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&Capability::new("research")));
        assert!(merged.contains(&Capability::new("writing")));
    }

    #[test]
    fn test_set_round_trips_through_json() {
        let set: CapabilitySet = ["x", "y"].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        let back: CapabilitySet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
    }

    #[test]
    fn test_deserialization_normalizes_tags() {
        let set: CapabilitySet = serde_json::from_str(r#"[" Research ", "WRITING"]"#).unwrap();
        assert!(set.contains(&Capability::new("research")));
        assert!(set.contains(&Capability::new("writing")));
    }
}
