//! Per-NPC relationship state and the delta value object that mutates it.
//!
//! `RelationshipRecord` is the single source of truth for how an NPC stands
//! toward the player within one session. Metric writes are clamped to the
//! world schema's bounds and the derived tier/intimacy caches are recomputed
//! on every write, so no caller can ever observe them out of sync.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NpcId, SessionId};
use crate::tiers::WorldSchema;

/// A flag stored on a relationship. Strings and numbers are allowed so
/// authored content can record names and counters, not just booleans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FlagValue {
    pub fn as_bool(&self) -> bool {
        match self {
            FlagValue::Bool(b) => *b,
            FlagValue::Number(n) => *n != 0.0,
            FlagValue::Text(s) => !s.is_empty(),
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            FlagValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            FlagValue::Number(n) => *n,
            FlagValue::Text(_) => 0.0,
        }
    }
}

/// Flag mutations carried by a delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagChanges {
    /// Flags to set (overwrite)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub set: HashMap<String, FlagValue>,
    /// Flags to remove
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<String>,
    /// Numeric flags to add to; missing keys are treated as 0
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub increment: HashMap<String, f64>,
}

impl FlagChanges {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.delete.is_empty() && self.increment.is_empty()
    }
}

/// Additive metric deltas plus flag mutations, applied atomically.
///
/// This is the only way relationship state changes; nodes and choices carry
/// these as authored effects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDelta {
    /// Metric name -> additive delta
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metrics: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "FlagChanges::is_empty")]
    pub flags: FlagChanges,
}

impl RelationshipDelta {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.flags.is_empty()
    }

    /// Convenience constructor for a single metric delta.
    pub fn metric(name: impl Into<String>, delta: f64) -> Self {
        Self {
            metrics: HashMap::from([(name.into(), delta)]),
            flags: FlagChanges::default(),
        }
    }
}

/// Relationship state for one (session, npc) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub session_id: SessionId,
    pub npc_id: NpcId,
    /// Metric name -> current value, always within schema bounds
    pub metrics: HashMap<String, f64>,
    pub flags: HashMap<String, FlagValue>,
    /// Derived caches, recomputed on every metric write
    pub tier_ids: HashMap<String, String>,
    pub intimacy_level_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RelationshipRecord {
    /// Zero-valued record created on first access.
    pub fn new(session_id: SessionId, npc_id: NpcId, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            npc_id,
            metrics: HashMap::new(),
            flags: HashMap::new(),
            tier_ids: HashMap::new(),
            intimacy_level_id: None,
            updated_at: now,
        }
    }

    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }

    /// Apply a delta: sum first, clamp after summation (not per-term), then
    /// recompute the derived tier/intimacy caches.
    pub fn apply_delta(&mut self, schema: &WorldSchema, delta: &RelationshipDelta, now: DateTime<Utc>) {
        for (name, amount) in &delta.metrics {
            let current = self.metrics.get(name).copied().unwrap_or(0.0);
            let bounds = schema.bounds_for(name);
            self.metrics.insert(name.clone(), bounds.clamp(current + amount));
        }

        for (name, value) in &delta.flags.set {
            self.flags.insert(name.clone(), value.clone());
        }
        for name in &delta.flags.delete {
            self.flags.remove(name);
        }
        for (name, amount) in &delta.flags.increment {
            let current = self.flags.get(name).map(FlagValue::as_number).unwrap_or(0.0);
            self.flags.insert(name.clone(), FlagValue::Number(current + amount));
        }

        self.recompute_derived(schema);
        self.updated_at = now;
    }

    /// Recompute cached tier ids and the intimacy level from current metrics.
    pub fn recompute_derived(&mut self, schema: &WorldSchema) {
        self.tier_ids.clear();
        for metric in schema.tier_tables.keys() {
            if let Some(tier) = schema.resolve_tier(metric, self.metric(metric)) {
                self.tier_ids.insert(metric.clone(), tier.to_string());
            }
        }
        self.intimacy_level_id = schema
            .resolve_intimacy_level(&self.metrics)
            .map(|id| id.to_string());
    }
}
