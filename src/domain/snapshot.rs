//! Variable snapshots and the static variable metadata registry.

use super::primitives::{TimeMs, VariableKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single variable reading: numeric or boolean flag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Flag(bool),
    Number(f64),
}

impl VariableValue {
    /// Numeric view used by every comparison; flags map to 1.0 / 0.0.
    pub fn as_f64(&self) -> f64 {
        match self {
            VariableValue::Number(v) => *v,
            VariableValue::Flag(true) => 1.0,
            VariableValue::Flag(false) => 0.0,
        }
    }

    /// Rebuild a value of the same kind from a numeric result.
    pub fn with_numeric(&self, v: f64) -> VariableValue {
        match self {
            VariableValue::Number(_) => VariableValue::Number(v),
            VariableValue::Flag(_) => VariableValue::Flag(v != 0.0),
        }
    }
}

impl From<f64> for VariableValue {
    fn from(v: f64) -> Self {
        VariableValue::Number(v)
    }
}

impl From<bool> for VariableValue {
    fn from(v: bool) -> Self {
        VariableValue::Flag(v)
    }
}

/// Immutable map of named variable values captured at one instant.
///
/// There are no in-place mutators: every change produces a new snapshot, so
/// a solve or decision that holds one keeps exactly what it saw.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariableSnapshot {
    values: BTreeMap<VariableKey, VariableValue>,
    captured_at: TimeMs,
}

impl VariableSnapshot {
    pub fn new(values: BTreeMap<VariableKey, VariableValue>, captured_at: TimeMs) -> Self {
        Self {
            values,
            captured_at,
        }
    }

    pub fn from_pairs<K, V, I>(pairs: I, captured_at: TimeMs) -> Self
    where
        K: Into<VariableKey>,
        V: Into<VariableValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            captured_at,
        )
    }

    pub fn get(&self, key: &VariableKey) -> Option<VariableValue> {
        self.values.get(key).copied()
    }

    pub fn get_f64(&self, key: &VariableKey) -> Option<f64> {
        self.values.get(key).map(VariableValue::as_f64)
    }

    pub fn captured_at(&self) -> TimeMs {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VariableKey, &VariableValue)> {
        self.values.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &VariableKey> {
        self.values.keys()
    }

    /// New snapshot with one numeric value replaced. The stored kind is kept
    /// when the key already exists.
    pub fn with_value(&self, key: &VariableKey, v: f64) -> VariableSnapshot {
        let mut values = self.values.clone();
        let next = match values.get(key) {
            Some(existing) => existing.with_numeric(v),
            None => VariableValue::Number(v),
        };
        values.insert(key.clone(), next);
        VariableSnapshot {
            values,
            captured_at: self.captured_at,
        }
    }

    /// New snapshot with `other`'s entries laid over this one.
    pub fn merged_with(&self, other: &VariableSnapshot) -> VariableSnapshot {
        let mut values = self.values.clone();
        for (k, v) in &other.values {
            values.insert(k.clone(), *v);
        }
        VariableSnapshot {
            values,
            captured_at: self.captured_at.max(other.captured_at),
        }
    }

    pub fn restamped(&self, captured_at: TimeMs) -> VariableSnapshot {
        VariableSnapshot {
            values: self.values.clone(),
            captured_at,
        }
    }

    /// Values of the given keys only, as plain numbers.
    pub fn project(&self, keys: impl IntoIterator<Item = VariableKey>) -> BTreeMap<VariableKey, f64> {
        keys.into_iter()
            .filter_map(|k| self.get_f64(&k).map(|v| (k, v)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Number,
    Flag,
}

/// Display and grouping category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableGroup {
    Environment,
    Operations,
    Commercial,
}

/// Static metadata for one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableMeta {
    pub key: VariableKey,
    pub label: String,
    pub unit: String,
    pub group: VariableGroup,
    pub kind: VariableKind,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl VariableMeta {
    pub fn number(
        key: &str,
        label: &str,
        unit: &str,
        group: VariableGroup,
        (min, max, step): (f64, f64, f64),
    ) -> Self {
        Self {
            key: VariableKey::new(key),
            label: label.to_string(),
            unit: unit.to_string(),
            group,
            kind: VariableKind::Number,
            min,
            max,
            step,
        }
    }

    pub fn flag(key: &str, label: &str, group: VariableGroup) -> Self {
        Self {
            key: VariableKey::new(key),
            label: label.to_string(),
            unit: String::new(),
            group,
            kind: VariableKind::Flag,
            min: 0.0,
            max: 1.0,
            step: 1.0,
        }
    }

    pub fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.min, self.max)
    }
}

/// Ordered registry of variable metadata, keyed like the snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableRegistry {
    metas: Vec<VariableMeta>,
}

impl VariableRegistry {
    pub fn new(metas: Vec<VariableMeta>) -> Self {
        Self { metas }
    }

    pub fn get(&self, key: &VariableKey) -> Option<&VariableMeta> {
        self.metas.iter().find(|m| &m.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableMeta> {
        self.metas.iter()
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    pub fn contains(&self, key: &VariableKey) -> bool {
        self.get(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> VariableKey {
        VariableKey::new(s)
    }

    #[test]
    fn test_default_snapshot_is_empty_at_epoch() {
        let snap = VariableSnapshot::default();
        assert!(snap.is_empty());
        assert_eq!(snap.captured_at(), TimeMs::new(0));
    }

    #[test]
    fn test_with_value_keeps_flag_kind() {
        let snap = VariableSnapshot::from_pairs(
            [("stl_outage", VariableValue::Flag(false))],
            TimeMs::new(0),
        );
        let next = snap.with_value(&key("stl_outage"), 1.0);
        assert_eq!(next.get(&key("stl_outage")), Some(VariableValue::Flag(true)));
        // Original is untouched.
        assert_eq!(snap.get(&key("stl_outage")), Some(VariableValue::Flag(false)));
    }

    #[test]
    fn test_merged_with_overlays_entries() {
        let base = VariableSnapshot::from_pairs([("a", 1.0), ("b", 2.0)], TimeMs::new(10));
        let top = VariableSnapshot::from_pairs([("b", 5.0)], TimeMs::new(20));
        let merged = base.merged_with(&top);
        assert_eq!(merged.get_f64(&key("a")), Some(1.0));
        assert_eq!(merged.get_f64(&key("b")), Some(5.0));
        assert_eq!(merged.captured_at(), TimeMs::new(20));
    }

    #[test]
    fn test_value_json_is_untagged() {
        let snap = VariableSnapshot::from_pairs(
            [
                ("river_stage", VariableValue::Number(12.5)),
                ("mem_outage", VariableValue::Flag(true)),
            ],
            TimeMs::new(1),
        );
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["values"]["river_stage"], 12.5);
        assert_eq!(json["values"]["mem_outage"], true);
    }

    #[test]
    fn test_project_skips_missing_keys() {
        let snap = VariableSnapshot::from_pairs([("a", 1.0)], TimeMs::new(0));
        let projected = snap.project([key("a"), key("missing")]);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[&key("a")], 1.0);
    }
}
