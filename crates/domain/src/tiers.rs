//! World-configured tier tables and intimacy levels.
//!
//! A tier maps one numeric metric onto a named bracket ("stranger", "friend",
//! "lover"). An intimacy level is derived from several metrics jointly crossing
//! configured minimums. Both tables are authored per world and treated as
//! read-only input by the runtime.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::WorldId;

/// Inclusive bounds a metric is clamped to on every write.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for MetricBounds {
    fn default() -> Self {
        Self { min: 0.0, max: 100.0 }
    }
}

impl MetricBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// One named bracket of a tier table. Ranges are inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRange {
    pub id: String,
    pub min: f64,
    pub max: f64,
}

/// A named state requiring all of several metric minimums.
///
/// Levels are declared most-demanding-first so the first satisfied level wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntimacyLevel {
    pub id: String,
    /// Metric name -> minimum value required
    pub thresholds: HashMap<String, f64>,
}

/// Per-world threshold configuration consumed by the tier resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSchema {
    pub world_id: WorldId,
    /// Per-metric bounds; metrics absent here use `default_bounds`
    #[serde(default)]
    pub bounds: HashMap<String, MetricBounds>,
    #[serde(default)]
    pub default_bounds: MetricBounds,
    /// Metric name -> ascending, contiguous tier ranges
    #[serde(default)]
    pub tier_tables: HashMap<String, Vec<TierRange>>,
    /// Most-demanding-first
    #[serde(default)]
    pub intimacy_levels: Vec<IntimacyLevel>,
    /// Player-facing line shown when a scene cannot continue (authoring bug)
    #[serde(default = "WorldSchema::default_fallback_line")]
    pub fallback_line: String,
}

impl WorldSchema {
    fn default_fallback_line() -> String {
        "This scene can't continue right now.".to_string()
    }

    /// A plain 0-100 schema with the stock affinity tier ladder.
    pub fn standard(world_id: WorldId) -> Self {
        let affinity_tiers = vec![
            TierRange { id: "stranger".into(), min: 0.0, max: 19.0 },
            TierRange { id: "acquaintance".into(), min: 19.0, max: 39.0 },
            TierRange { id: "friend".into(), min: 39.0, max: 69.0 },
            TierRange { id: "close_friend".into(), min: 69.0, max: 89.0 },
            TierRange { id: "lover".into(), min: 89.0, max: 100.0 },
        ];
        let mut tier_tables = HashMap::new();
        tier_tables.insert("affinity".to_string(), affinity_tiers);

        let intimacy_levels = vec![
            IntimacyLevel {
                id: "intimate".into(),
                thresholds: HashMap::from([
                    ("affinity".to_string(), 80.0),
                    ("trust".to_string(), 70.0),
                    ("chemistry".to_string(), 60.0),
                ]),
            },
            IntimacyLevel {
                id: "romantic".into(),
                thresholds: HashMap::from([
                    ("affinity".to_string(), 60.0),
                    ("chemistry".to_string(), 40.0),
                ]),
            },
            IntimacyLevel {
                id: "warm".into(),
                thresholds: HashMap::from([("affinity".to_string(), 30.0)]),
            },
        ];

        Self {
            world_id,
            bounds: HashMap::new(),
            default_bounds: MetricBounds::default(),
            tier_tables,
            intimacy_levels,
            fallback_line: Self::default_fallback_line(),
        }
    }

    pub fn bounds_for(&self, metric: &str) -> MetricBounds {
        self.bounds.get(metric).copied().unwrap_or(self.default_bounds)
    }

    /// Resolve a metric value to the id of the tier range containing it.
    ///
    /// Values are clamped into the metric's bounds first, so the resolver is
    /// total over metrics that have a table. Metrics without a table resolve
    /// to `None`.
    pub fn resolve_tier(&self, metric: &str, value: f64) -> Option<&str> {
        let table = self.tier_tables.get(metric)?;
        let value = self.bounds_for(metric).clamp(value);
        // Ranges are ascending and contiguous; shared boundaries resolve to
        // the higher tier.
        table
            .iter()
            .rev()
            .find(|range| value >= range.min)
            .or_else(|| table.first())
            .map(|range| range.id.as_str())
    }

    /// Rank of a tier id within its table (0 = lowest). Used for ordered
    /// tier comparisons in condition expressions.
    pub fn tier_rank(&self, metric: &str, tier_id: &str) -> Option<usize> {
        self.tier_tables
            .get(metric)?
            .iter()
            .position(|range| range.id == tier_id)
    }

    /// Highest-priority intimacy level whose thresholds are all satisfied.
    ///
    /// Levels are ordered most-demanding-first, so the first match wins.
    /// Metrics missing from the record count as 0.
    pub fn resolve_intimacy_level(&self, metrics: &HashMap<String, f64>) -> Option<&str> {
        self.intimacy_levels
            .iter()
            .find(|level| {
                level
                    .thresholds
                    .iter()
                    .all(|(metric, min)| metrics.get(metric).copied().unwrap_or(0.0) >= *min)
            })
            .map(|level| level.id.as_str())
    }

    /// Structural validation performed at registration time.
    ///
    /// Tier tables must be ascending and exhaustive over the metric's bounds;
    /// a table that leaves a gap would make the resolver ambiguous at runtime.
    pub fn validate(&self) -> Result<(), DomainError> {
        for (metric, table) in &self.tier_tables {
            if table.is_empty() {
                return Err(DomainError::validation(format!(
                    "tier table for '{}' is empty",
                    metric
                )));
            }
            let bounds = self.bounds_for(metric);
            if table[0].min > bounds.min {
                return Err(DomainError::validation(format!(
                    "tier table for '{}' does not cover the lower bound {}",
                    metric, bounds.min
                )));
            }
            if table[table.len() - 1].max < bounds.max {
                return Err(DomainError::validation(format!(
                    "tier table for '{}' does not cover the upper bound {}",
                    metric, bounds.max
                )));
            }
            for pair in table.windows(2) {
                if pair[1].min < pair[0].max {
                    return Err(DomainError::validation(format!(
                        "tier table for '{}' has overlapping ranges '{}' and '{}'",
                        metric, pair[0].id, pair[1].id
                    )));
                }
                if pair[1].min > pair[0].max {
                    return Err(DomainError::validation(format!(
                        "tier table for '{}' has a gap between '{}' and '{}'",
                        metric, pair[0].id, pair[1].id
                    )));
                }
            }
        }
        for level in &self.intimacy_levels {
            if level.thresholds.is_empty() {
                return Err(DomainError::validation(format!(
                    "intimacy level '{}' has no thresholds",
                    level.id
                )));
            }
        }
        Ok(())
    }
}
