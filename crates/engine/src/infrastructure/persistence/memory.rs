//! In-memory repository implementations backed by `DashMap`.
//!
//! The default storage for development and tests. Every record round-trips
//! through the same serde shapes a persistent store would use, so swapping in
//! a database adapter changes no behavior.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use reverie_domain::{
    ExecutionId, ExecutionState, NarrativeProgram, NpcId, ProgramId, RelationshipRecord, SessionId,
};

use crate::infrastructure::ports::{
    ExecutionRepo, ProgramRepo, RelationshipRepo, RepoError, StateKey,
};

// =============================================================================
// Programs
// =============================================================================

#[derive(Default)]
pub struct MemoryProgramRepo {
    /// cache_key ("id@version") -> program
    by_version: DashMap<String, NarrativeProgram>,
    /// program id -> latest published version
    latest: DashMap<ProgramId, String>,
}

impl MemoryProgramRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgramRepo for MemoryProgramRepo {
    async fn get(
        &self,
        program_id: &ProgramId,
        version: Option<String>,
    ) -> Result<Option<NarrativeProgram>, RepoError> {
        let version = match version {
            Some(version) => version,
            None => match self.latest.get(program_id) {
                Some(entry) => entry.value().clone(),
                None => return Ok(None),
            },
        };
        let key = format!("{}@{}", program_id, version);
        Ok(self.by_version.get(&key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, program: NarrativeProgram) -> Result<(), RepoError> {
        self.latest
            .insert(program.id.clone(), program.version.clone());
        self.by_version.insert(program.cache_key(), program);
        Ok(())
    }
}

// =============================================================================
// Relationships
// =============================================================================

#[derive(Default)]
pub struct MemoryRelationshipRepo {
    records: DashMap<(SessionId, NpcId), RelationshipRecord>,
}

impl MemoryRelationshipRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationshipRepo for MemoryRelationshipRepo {
    async fn get(
        &self,
        session_id: SessionId,
        npc_id: NpcId,
    ) -> Result<Option<RelationshipRecord>, RepoError> {
        Ok(self
            .records
            .get(&(session_id, npc_id))
            .map(|entry| entry.value().clone()))
    }

    async fn put(&self, record: RelationshipRecord) -> Result<(), RepoError> {
        self.records
            .insert((record.session_id, record.npc_id), record);
        Ok(())
    }
}

// =============================================================================
// Execution states
// =============================================================================

#[derive(Default)]
pub struct MemoryExecutionRepo {
    by_id: DashMap<ExecutionId, ExecutionState>,
    /// Live state per (session, npc, program); cleared once the state ends
    live: DashMap<StateKey, ExecutionId>,
}

impl MemoryExecutionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepo for MemoryExecutionRepo {
    async fn get(&self, key: &StateKey) -> Result<Option<ExecutionState>, RepoError> {
        let Some(id) = self.live.get(key).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|entry| entry.value().clone()))
    }

    async fn get_by_id(&self, id: ExecutionId) -> Result<Option<ExecutionState>, RepoError> {
        Ok(self.by_id.get(&id).map(|entry| entry.value().clone()))
    }

    async fn commit(&self, mut state: ExecutionState) -> Result<u64, RepoError> {
        let key = StateKey::of(&state);
        let id = state.id;

        // The live slot is claimed create-if-absent before the state lands,
        // so two racing creators of one (session, npc, program) cannot both
        // win; the loser gets a conflict against the incumbent.
        let mut claimed = false;
        if state.status.is_live() {
            match self.live.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(slot) => {
                    if *slot.get() != id {
                        let found = self
                            .by_id
                            .get(slot.get())
                            .map(|entry| entry.version)
                            .unwrap_or(0);
                        return Err(RepoError::VersionConflict {
                            expected: state.version,
                            found,
                        });
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(id);
                    claimed = true;
                }
            }
        }

        match self.by_id.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let stored = entry.get().version;
                if stored != state.version {
                    if claimed {
                        self.live.remove_if(&key, |_, live_id| *live_id == id);
                    }
                    return Err(RepoError::VersionConflict {
                        expected: state.version,
                        found: stored,
                    });
                }
                state.version += 1;
                entry.insert(state.clone());
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                state.version += 1;
                entry.insert(state.clone());
            }
        }

        if !state.status.is_live() {
            self.live.remove_if(&key, |_, live_id| *live_id == id);
        }
        Ok(state.version)
    }

    async fn list_suspended_updated_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ExecutionState>, RepoError> {
        Ok(self
            .by_id
            .iter()
            .filter(|entry| entry.status.is_suspended() && entry.updated_at < cutoff)
            .map(|entry| entry.value().clone())
            .collect())
    }
}
