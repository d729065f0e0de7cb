//! Program publishing and dry-run validation for authoring tools.

use std::sync::Arc;

use tracing::info;

use reverie_domain::{NarrativeProgram, ValidationResult};

use crate::error::RuntimeError;
use crate::stores::ProgramStore;

pub struct PublishProgram {
    programs: Arc<ProgramStore>,
}

impl PublishProgram {
    pub fn new(programs: Arc<ProgramStore>) -> Self {
        Self { programs }
    }

    pub async fn execute(&self, program: NarrativeProgram) -> Result<(), RuntimeError> {
        let key = program.cache_key();
        self.programs.publish(program).await?;
        info!(program = %key, "Published narrative program");
        Ok(())
    }
}

pub struct ValidateProgram {
    programs: Arc<ProgramStore>,
}

impl ValidateProgram {
    pub fn new(programs: Arc<ProgramStore>) -> Self {
        Self { programs }
    }

    pub fn execute(&self, program: &NarrativeProgram) -> ValidationResult {
        self.programs.check(program)
    }
}
