//! Per-world migration diagnostics.

use std::sync::Arc;

use reverie_domain::WorldId;
use reverie_protocol::MigrationStatusResponse;

use crate::stores::MigrationStats;

pub struct GetMigrationStatus {
    stats: Arc<MigrationStats>,
}

impl GetMigrationStatus {
    pub fn new(stats: Arc<MigrationStats>) -> Self {
        Self { stats }
    }

    pub fn execute(&self, world_id: WorldId) -> MigrationStatusResponse {
        let (native_states, shim_calls) = self.stats.snapshot(world_id);
        MigrationStatusResponse {
            world_id: world_id.to_uuid(),
            native_states,
            shim_calls,
        }
    }
}
