//! Explicitly abort a live execution.

use std::sync::Arc;

use tracing::info;

use reverie_domain::ExecutionId;
use reverie_protocol::{AbortRequest, NarrativeResponse};

use crate::error::RuntimeError;
use crate::infrastructure::ports::ClockPort;
use crate::stores::ExecutionStateStore;

pub struct AbortNarrative {
    executions: Arc<ExecutionStateStore>,
    clock: Arc<dyn ClockPort>,
}

impl AbortNarrative {
    pub fn new(executions: Arc<ExecutionStateStore>, clock: Arc<dyn ClockPort>) -> Self {
        Self { executions, clock }
    }

    pub async fn execute(&self, request: AbortRequest) -> Result<NarrativeResponse, RuntimeError> {
        let id = ExecutionId::from_uuid(request.execution_state_id);
        let _guard = self.executions.guard(id)?;

        let mut state = self.executions.get_by_id(id).await?;
        if !state.status.is_live() {
            return Err(RuntimeError::WrongState {
                status: state.status,
            });
        }

        state.abort(self.clock.now());
        let state = self.executions.commit(state).await?;
        info!(execution = %id, "Aborted narrative execution");

        Ok(NarrativeResponse {
            execution_state_id: state.id.to_uuid(),
            state: state.status,
            lines: Vec::new(),
            offer: None,
            generation_request: None,
        })
    }
}
