//! Migration telemetry: native-runtime starts vs. legacy shim traffic.
//!
//! Coarse per-world counters used to judge when a world's content has fully
//! moved off the legacy single-shot endpoints.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use reverie_domain::WorldId;

#[derive(Default)]
struct Counters {
    native_states: AtomicU64,
    shim_calls: AtomicU64,
}

#[derive(Default)]
pub struct MigrationStats {
    per_world: DashMap<WorldId, Counters>,
}

impl MigrationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_native_start(&self, world_id: WorldId) {
        self.per_world
            .entry(world_id)
            .or_default()
            .native_states
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shim_call(&self, world_id: WorldId) {
        self.per_world
            .entry(world_id)
            .or_default()
            .shim_calls
            .fetch_add(1, Ordering::Relaxed);
    }

    /// (native starts, shim calls) for one world.
    pub fn snapshot(&self, world_id: WorldId) -> (u64, u64) {
        self.per_world
            .get(&world_id)
            .map(|counters| {
                (
                    counters.native_states.load(Ordering::Relaxed),
                    counters.shim_calls.load(Ordering::Relaxed),
                )
            })
            .unwrap_or((0, 0))
    }
}
