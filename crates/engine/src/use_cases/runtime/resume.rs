//! Resume a suspended execution with a choice or a generation result.
//!
//! The per-state guard is held for the whole call and the commit comes
//! before any side effect lands, so a failed resume leaves both the stored
//! state and the relationship record untouched and a concurrent resume of
//! the same state fails fast.

use std::sync::Arc;

use tracing::info;

use reverie_domain::ExecutionId;
use reverie_protocol::{NarrativeResponse, ResumeInput, ResumeRequest};

use crate::error::RuntimeError;
use crate::infrastructure::ports::ClockPort;
use crate::stores::ExecutionStateStore;
use crate::use_cases::runtime::start::respond;
use crate::use_cases::runtime::stepper::{CallContext, Stepper};

pub struct ResumeNarrative {
    stepper: Arc<Stepper>,
    executions: Arc<ExecutionStateStore>,
    clock: Arc<dyn ClockPort>,
}

impl ResumeNarrative {
    pub fn new(
        stepper: Arc<Stepper>,
        executions: Arc<ExecutionStateStore>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            stepper,
            executions,
            clock,
        }
    }

    pub async fn execute(&self, request: ResumeRequest) -> Result<NarrativeResponse, RuntimeError> {
        let id = ExecutionId::from_uuid(request.execution_state_id);
        let _guard = self.executions.guard(id)?;

        let state = self.executions.get_by_id(id).await?;
        if !state.status.is_suspended() {
            return Err(RuntimeError::WrongState {
                status: state.status,
            });
        }

        let ctx = CallContext::resolve(
            request.time_of_day,
            request.player_input.clone(),
            self.clock.as_ref(),
        );

        let mut outcome = match request.input {
            ResumeInput::Choice { choice_id } => {
                info!(execution = %id, choice = %choice_id, "Resuming with choice");
                self.stepper
                    .resume_choice(state, None, &ctx, &choice_id)
                    .await?
            }
            ResumeInput::Generation { generation_result } => {
                info!(execution = %id, "Resuming with generation result");
                self.stepper
                    .resume_generation(state, None, &ctx, generation_result)
                    .await?
            }
        };

        outcome.state = self.executions.commit(outcome.state).await?;
        self.stepper.flush_effects(&outcome).await?;
        respond(outcome)
    }
}
