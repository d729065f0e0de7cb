//! Per-world schema registry.
//!
//! Worlds that never register a schema get the standard 0-100 configuration,
//! so the tier resolver is total over all worlds.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use reverie_domain::{WorldId, WorldSchema};

use crate::error::RuntimeError;

#[derive(Default)]
pub struct WorldSchemaStore {
    schemas: DashMap<WorldId, Arc<WorldSchema>>,
}

impl WorldSchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a world's schema, replacing any previous one. The schema is
    /// validated first so a gapped tier table can never reach the resolver.
    pub fn register(&self, schema: WorldSchema) -> Result<(), RuntimeError> {
        schema
            .validate()
            .map_err(|err| RuntimeError::Validation(vec![err.to_string()]))?;
        info!(world = %schema.world_id, "Registered world schema");
        self.schemas.insert(schema.world_id, Arc::new(schema));
        Ok(())
    }

    pub fn get_or_default(&self, world_id: WorldId) -> Arc<WorldSchema> {
        self.schemas
            .entry(world_id)
            .or_insert_with(|| Arc::new(WorldSchema::standard(world_id)))
            .value()
            .clone()
    }
}
