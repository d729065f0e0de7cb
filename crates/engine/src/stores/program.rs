//! Validated program cache.
//!
//! Programs are immutable once published, so structural validation runs
//! exactly once per distinct (id, version): on publish, or on the first load
//! of a version that entered the repository out of band. Cache hits hand out
//! the same `Arc` to every caller.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use reverie_domain::{NarrativeProgram, ProgramId, ValidationResult};

use crate::error::RuntimeError;
use crate::infrastructure::ports::ProgramRepo;

pub struct ProgramStore {
    repo: Arc<dyn ProgramRepo>,
    /// cache_key ("id@version") -> validated program
    cache: DashMap<String, Arc<NarrativeProgram>>,
}

impl ProgramStore {
    pub fn new(repo: Arc<dyn ProgramRepo>) -> Self {
        Self {
            repo,
            cache: DashMap::new(),
        }
    }

    /// Fetch a program for execution. `version: None` means the latest
    /// published version.
    pub async fn load(
        &self,
        program_id: &ProgramId,
        version: Option<String>,
    ) -> Result<Arc<NarrativeProgram>, RuntimeError> {
        if let Some(version) = &version {
            let key = format!("{}@{}", program_id, version);
            if let Some(cached) = self.cache.get(&key) {
                return Ok(cached.value().clone());
            }
        }

        let program = self
            .repo
            .get(program_id, version)
            .await?
            .ok_or_else(|| RuntimeError::not_found("program", program_id.as_str()))?;

        let key = program.cache_key();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.value().clone());
        }

        let result = program.validate();
        if !result.ok {
            warn!(program = %key, errors = result.errors.len(), "Program failed validation on load");
            return Err(RuntimeError::Validation(result.errors));
        }
        debug!(program = %key, "Program validated and cached");

        let program = Arc::new(program);
        self.cache.insert(key, program.clone());
        Ok(program)
    }

    /// Validate and store a new program version. Rejected programs are never
    /// persisted.
    pub async fn publish(&self, program: NarrativeProgram) -> Result<(), RuntimeError> {
        let result = program.validate();
        if !result.ok {
            return Err(RuntimeError::Validation(result.errors));
        }
        let key = program.cache_key();
        self.repo.put(program.clone()).await?;
        self.cache.insert(key, Arc::new(program));
        Ok(())
    }

    /// Dry-run validation for authoring tools; nothing is stored.
    pub fn check(&self, program: &NarrativeProgram) -> ValidationResult {
        program.validate()
    }
}
