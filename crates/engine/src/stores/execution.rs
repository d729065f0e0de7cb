//! Execution state store: load/commit plus per-state resume serialization.
//!
//! Two concurrent resumes of the same state must not both win. The first line
//! of defense is a per-state try-lock taken for the duration of the call; the
//! second is the repository's versioned commit, which rejects a writer that
//! loaded a state another writer has since committed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use reverie_domain::{ExecutionId, ExecutionState};

use crate::error::RuntimeError;
use crate::infrastructure::ports::{ExecutionRepo, RepoError, StateKey};

pub struct ExecutionStateStore {
    repo: Arc<dyn ExecutionRepo>,
    locks: DashMap<ExecutionId, Arc<Mutex<()>>>,
    start_locks: DashMap<StateKey, Arc<Mutex<()>>>,
}

/// Held for the duration of one resume/abort call.
pub struct StateGuard {
    _inner: OwnedMutexGuard<()>,
}

impl ExecutionStateStore {
    pub fn new(repo: Arc<dyn ExecutionRepo>) -> Self {
        Self {
            repo,
            locks: DashMap::new(),
            start_locks: DashMap::new(),
        }
    }

    /// Claim exclusive access to one state; fails fast rather than queueing,
    /// so a double-submitted resume surfaces immediately.
    pub fn guard(&self, id: ExecutionId) -> Result<StateGuard, RuntimeError> {
        let lock = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let inner = lock
            .try_lock_owned()
            .map_err(|_| RuntimeError::ConcurrentResume)?;
        Ok(StateGuard { _inner: inner })
    }

    /// Claim the check-then-create window of `start` for one
    /// (session, npc, program) key, so two racing starts cannot both create
    /// a live state. Fails fast like `guard`.
    pub fn start_guard(&self, key: &StateKey) -> Result<StateGuard, RuntimeError> {
        let lock = self
            .start_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let inner = lock
            .try_lock_owned()
            .map_err(|_| RuntimeError::ConcurrentResume)?;
        Ok(StateGuard { _inner: inner })
    }

    pub async fn get_live(&self, key: &StateKey) -> Result<Option<ExecutionState>, RuntimeError> {
        Ok(self.repo.get(key).await?)
    }

    pub async fn get_by_id(&self, id: ExecutionId) -> Result<ExecutionState, RuntimeError> {
        self.repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("execution state", id.to_string()))
    }

    /// Versioned commit. Returns the state with its version advanced; a
    /// conflicting writer is reported as a concurrent resume.
    pub async fn commit(&self, mut state: ExecutionState) -> Result<ExecutionState, RuntimeError> {
        match self.repo.commit(state.clone()).await {
            Ok(version) => {
                state.version = version;
                if !state.status.is_live() {
                    self.locks.remove(&state.id);
                }
                Ok(state)
            }
            Err(RepoError::VersionConflict { .. }) => Err(RuntimeError::ConcurrentResume),
            Err(err) => Err(err.into()),
        }
    }

    /// Abort suspended states idle past the retention window. Returns how
    /// many were expired.
    pub async fn expire_stale(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, RuntimeError> {
        let cutoff = now - retention;
        let stale = self.repo.list_suspended_updated_before(cutoff).await?;
        let mut expired = 0;
        for mut state in stale {
            // Skip states mid-resume; the next sweep will catch them
            let Ok(_guard) = self.guard(state.id) else {
                continue;
            };
            state.abort(now);
            match self.repo.commit(state.clone()).await {
                Ok(_) => {
                    self.locks.remove(&state.id);
                    debug!(execution = %state.id, "Expired idle execution state");
                    expired += 1;
                }
                Err(RepoError::VersionConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        if expired > 0 {
            info!(count = expired, "Expired idle execution states");
        }
        Ok(expired)
    }
}
