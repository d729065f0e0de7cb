//! Start (or idempotently re-enter) a program for a (session, npc) pair.

use std::sync::Arc;

use tracing::info;

use reverie_domain::{ExecutionState, NpcId, ProgramId, SessionId, WorldId};
use reverie_protocol::{NarrativeResponse, StartRequest};

use crate::error::RuntimeError;
use crate::infrastructure::ports::{ClockPort, StateKey};
use crate::stores::{ExecutionStateStore, MigrationStats, ProgramStore};
use crate::use_cases::runtime::stepper::{CallContext, StepOutcome, Stepper};

pub struct StartNarrative {
    stepper: Arc<Stepper>,
    programs: Arc<ProgramStore>,
    executions: Arc<ExecutionStateStore>,
    stats: Arc<MigrationStats>,
    clock: Arc<dyn ClockPort>,
    history_cap: usize,
}

impl StartNarrative {
    pub fn new(
        stepper: Arc<Stepper>,
        programs: Arc<ProgramStore>,
        executions: Arc<ExecutionStateStore>,
        stats: Arc<MigrationStats>,
        clock: Arc<dyn ClockPort>,
        history_cap: usize,
    ) -> Self {
        Self {
            stepper,
            programs,
            executions,
            stats,
            clock,
            history_cap,
        }
    }

    pub async fn execute(&self, request: StartRequest) -> Result<NarrativeResponse, RuntimeError> {
        let session_id = SessionId::from_uuid(request.session_id);
        let npc_id = NpcId::from_uuid(request.npc_id);
        let world_id = WorldId::from_uuid(request.world_id);
        let program_id = ProgramId::new(request.program_id.clone());

        let program = self.programs.load(&program_id, request.version.clone()).await?;
        let ctx = CallContext::resolve(
            request.time_of_day,
            request.player_input.clone(),
            self.clock.as_ref(),
        );

        // One live state per (session, npc, program): a repeated start does
        // not fork a second run, it re-describes the current suspension. The
        // key guard closes the window between the liveness check and the
        // commit, so two racing starts cannot both create a state.
        let key = StateKey {
            session_id,
            npc_id,
            program_id: program.id.clone(),
        };
        let _guard = self.executions.start_guard(&key)?;
        if let Some(existing) = self.executions.get_live(&key).await? {
            info!(execution = %existing.id, program = %program.id, "Start re-entered a live execution");
            let outcome = self.stepper.describe(existing, None, &ctx).await?;
            return respond(outcome);
        }

        let state = ExecutionState::new(
            session_id,
            npc_id,
            world_id,
            program.id.clone(),
            program.entry_node_id.clone(),
            self.history_cap,
            self.clock.now(),
        );
        info!(execution = %state.id, program = %program.cache_key(), "Starting narrative execution");

        let mut outcome = self.stepper.advance(state, None, &ctx).await?;
        outcome.state = self.executions.commit(outcome.state).await?;
        self.stepper.flush_effects(&outcome).await?;
        self.stats.record_native_start(world_id);
        respond(outcome)
    }
}

/// Translate a committed outcome into the wire response. A dead-ended
/// execution is already aborted and persisted; it surfaces as an error.
pub(crate) fn respond(outcome: StepOutcome) -> Result<NarrativeResponse, RuntimeError> {
    if let Some(fallback_line) = outcome.dead_end_fallback {
        return Err(RuntimeError::NoAvailableChoice { fallback_line });
    }
    Ok(build_response(outcome))
}

fn build_response(outcome: StepOutcome) -> NarrativeResponse {
    NarrativeResponse {
        execution_state_id: outcome.state.id.to_uuid(),
        state: outcome.state.status,
        lines: outcome.lines,
        offer: outcome.offer,
        generation_request: outcome.generation_request,
    }
}
