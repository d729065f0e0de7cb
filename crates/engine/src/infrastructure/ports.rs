//! Port traits for infrastructure boundaries.
//!
//! These are the ONLY abstractions in the engine. Everything else is concrete
//! types. Ports exist for:
//! - Program/relationship/execution storage (could swap memory -> database)
//! - The generation provider boundary (dialogue lines, action-block selection)
//! - Clock (for testing)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use reverie_domain::{
    ExecutionId, ExecutionState, NarrativeProgram, NpcId, ProgramId, RelationshipRecord,
    SessionId, TagQuery,
};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("Not found")]
    NotFound,
    #[error("Version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GenError {
    #[error("Generation request failed: {0}")]
    RequestFailed(String),
    #[error("Provider unavailable")]
    Unavailable,
}

// =============================================================================
// Storage keys
// =============================================================================

/// Storage key for one program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub session_id: SessionId,
    pub npc_id: NpcId,
    pub program_id: ProgramId,
}

impl StateKey {
    pub fn of(state: &ExecutionState) -> Self {
        Self {
            session_id: state.session_id,
            npc_id: state.npc_id,
            program_id: state.program_id.clone(),
        }
    }
}

// =============================================================================
// Repository ports
// =============================================================================

/// Published program definitions, keyed by id and version.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProgramRepo: Send + Sync {
    /// Fetch a specific version, or the latest published one when `version`
    /// is `None`.
    async fn get(
        &self,
        program_id: &ProgramId,
        version: Option<String>,
    ) -> Result<Option<NarrativeProgram>, RepoError>;

    async fn put(&self, program: NarrativeProgram) -> Result<(), RepoError>;
}

/// Relationship records, keyed by (session, npc).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RelationshipRepo: Send + Sync {
    async fn get(
        &self,
        session_id: SessionId,
        npc_id: NpcId,
    ) -> Result<Option<RelationshipRecord>, RepoError>;

    async fn put(&self, record: RelationshipRecord) -> Result<(), RepoError>;
}

/// Execution states with optimistic-concurrency commit.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionRepo: Send + Sync {
    async fn get(&self, key: &StateKey) -> Result<Option<ExecutionState>, RepoError>;

    async fn get_by_id(&self, id: ExecutionId) -> Result<Option<ExecutionState>, RepoError>;

    /// Compare-and-swap commit: succeeds only when the stored version still
    /// equals `state.version`, then stores with the version bumped. Returns
    /// the new version.
    async fn commit(&self, state: ExecutionState) -> Result<u64, RepoError>;

    /// Suspended states not touched since the cutoff (for passive expiry).
    async fn list_suspended_updated_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ExecutionState>, RepoError>;
}

// =============================================================================
// Generation provider boundary
// =============================================================================

/// Context handed to the prompt subsystem for generated dialogue lines.
#[derive(Debug, Clone)]
pub struct DialoguePrompt {
    pub prompt_ref: Option<String>,
    pub session_id: SessionId,
    pub npc_id: NpcId,
    pub player_input: Option<String>,
}

/// Synchronous half of the provider boundary: generated dialogue lines are
/// resolved within the producing call (action blocks suspend instead).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DialogueGenPort: Send + Sync {
    async fn generate_line(&self, prompt: &DialoguePrompt) -> Result<String, GenError>;
}

/// Single-shot action-block selection used by the legacy shim layer.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ActionSelectPort: Send + Sync {
    /// Returns the id of the best block matching the tag query, if any.
    async fn select_block(&self, query: &TagQuery) -> Result<Option<String>, GenError>;
}

// =============================================================================
// Clock
// =============================================================================

#[cfg_attr(test, automock)]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
