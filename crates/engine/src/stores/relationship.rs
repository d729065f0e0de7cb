//! Relationship store: atomic delta application over the repository.
//!
//! Reads-modify-writes on one (session, npc) pair are serialized through a
//! per-pair async mutex so two effects applied concurrently can never lose an
//! update. Records are zero-initialized on first access.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use reverie_domain::{
    NpcId, RelationshipDelta, RelationshipRecord, SessionId, WorldSchema,
};

use crate::error::RuntimeError;
use crate::infrastructure::ports::RelationshipRepo;

pub struct RelationshipStore {
    repo: Arc<dyn RelationshipRepo>,
    locks: DashMap<(SessionId, NpcId), Arc<Mutex<()>>>,
}

impl RelationshipStore {
    pub fn new(repo: Arc<dyn RelationshipRepo>) -> Self {
        Self {
            repo,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, session_id: SessionId, npc_id: NpcId) -> Arc<Mutex<()>> {
        self.locks
            .entry((session_id, npc_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Current record, zero-initialized (with derived caches computed) if the
    /// pair has never been seen.
    pub async fn get_record(
        &self,
        schema: &WorldSchema,
        session_id: SessionId,
        npc_id: NpcId,
        now: DateTime<Utc>,
    ) -> Result<RelationshipRecord, RuntimeError> {
        if let Some(record) = self.repo.get(session_id, npc_id).await? {
            return Ok(record);
        }
        let mut record = RelationshipRecord::new(session_id, npc_id, now);
        record.recompute_derived(schema);
        Ok(record)
    }

    /// Apply a delta atomically and return the updated record.
    pub async fn apply_delta(
        &self,
        schema: &WorldSchema,
        session_id: SessionId,
        npc_id: NpcId,
        delta: &RelationshipDelta,
        now: DateTime<Utc>,
    ) -> Result<RelationshipRecord, RuntimeError> {
        if delta.is_empty() {
            return self.get_record(schema, session_id, npc_id, now).await;
        }

        let lock = self.lock_for(session_id, npc_id);
        let _guard = lock.lock().await;

        let mut record = self.get_record(schema, session_id, npc_id, now).await?;
        record.apply_delta(schema, delta, now);
        self.repo.put(record.clone()).await?;
        debug!(session = %session_id, npc = %npc_id, "Applied relationship delta");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::memory::MemoryRelationshipRepo;
    use reverie_domain::WorldId;

    fn store() -> (RelationshipStore, WorldSchema) {
        (
            RelationshipStore::new(Arc::new(MemoryRelationshipRepo::new())),
            WorldSchema::standard(WorldId::new()),
        )
    }

    #[tokio::test]
    async fn test_first_access_yields_zeroed_record_with_derived_caches() {
        let (store, schema) = store();
        let record = store
            .get_record(&schema, SessionId::new(), NpcId::new(), Utc::now())
            .await
            .expect("record");
        assert_eq!(record.metric("affinity"), 0.0);
        assert_eq!(record.tier_ids.get("affinity").map(String::as_str), Some("stranger"));
    }

    #[tokio::test]
    async fn test_concurrent_deltas_both_land() {
        let (store, schema) = store();
        let store = Arc::new(store);
        let schema = Arc::new(schema);
        let session_id = SessionId::new();
        let npc_id = NpcId::new();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            let schema = schema.clone();
            handles.push(tokio::spawn(async move {
                store
                    .apply_delta(
                        &schema,
                        session_id,
                        npc_id,
                        &RelationshipDelta::metric("affinity", 5.0),
                        Utc::now(),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("delta");
        }

        let record = store
            .get_record(&schema, session_id, npc_id, Utc::now())
            .await
            .expect("record");
        assert_eq!(record.metric("affinity"), 50.0);
    }
}
