//! Legacy single-shot dialogue endpoint, reimplemented as a one-node program.
//!
//! The pre-runtime contract takes player input and returns one generated
//! line. Internally the call now runs the same interpreter as everything
//! else, against an ephemeral program that is never published: a single
//! generated dialogue node. The wire shape is frozen.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use reverie_domain::{
    DialogueMode, ExecutionState, NarrativeProgram, Node, NodeId, NodeKind, NpcId, ProgramId,
    ProgramKind, SessionId, WorldId,
};
use reverie_protocol::{LegacyDialogueRequest, LegacyDialogueResponse};

use crate::error::RuntimeError;
use crate::infrastructure::ports::ClockPort;
use crate::stores::MigrationStats;
use crate::use_cases::runtime::stepper::{CallContext, Stepper};

pub(crate) const SHIM_PROGRAM_ID: &str = "__legacy_dialogue";
const SHIM_PROMPT_REF: &str = "legacy_dialogue";

pub struct LegacyDialogue {
    stepper: Arc<Stepper>,
    stats: Arc<MigrationStats>,
    clock: Arc<dyn ClockPort>,
}

impl LegacyDialogue {
    pub fn new(
        stepper: Arc<Stepper>,
        stats: Arc<MigrationStats>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            stepper,
            stats,
            clock,
        }
    }

    pub async fn execute(
        &self,
        request: LegacyDialogueRequest,
    ) -> Result<LegacyDialogueResponse, RuntimeError> {
        let session_id = SessionId::from_uuid(request.session_id);
        let npc_id = NpcId::from_uuid(request.npc_id);
        let world_id = WorldId::from_uuid(request.world_id);

        let program = Arc::new(shim_program());
        let mut state = ExecutionState::new(
            session_id,
            npc_id,
            world_id,
            program.id.clone(),
            program.entry_node_id.clone(),
            1,
            self.clock.now(),
        );
        state.legacy_shim = true;

        let ctx = CallContext::resolve(None, Some(request.player_input), self.clock.as_ref());
        // The shim state is ephemeral: run to completion, keep only the line.
        let outcome = self.stepper.advance(state, Some(&program), &ctx).await?;
        let dialogue = outcome
            .lines
            .into_iter()
            .next()
            .map(|line| line.text)
            .ok_or_else(|| RuntimeError::Generation("provider returned no line".to_string()))?;

        self.stats.record_shim_call(world_id);
        debug!(session = %session_id, npc = %npc_id, "Served legacy dialogue call");

        Ok(LegacyDialogueResponse {
            npc_id: request.npc_id,
            session_id: request.session_id,
            dialogue,
        })
    }
}

fn shim_program() -> NarrativeProgram {
    let node_id = NodeId::new("line");
    NarrativeProgram {
        id: ProgramId::new(SHIM_PROGRAM_ID),
        version: "shim".to_string(),
        kind: ProgramKind::Dialogue,
        nodes: vec![Node {
            id: node_id.clone(),
            terminal: true,
            kind: NodeKind::Dialogue {
                mode: DialogueMode::Generated,
                text: None,
                program_ref: None,
                prompt_ref: Some(SHIM_PROMPT_REF.to_string()),
                effects: None,
            },
        }],
        edges: Vec::new(),
        entry_node_id: node_id,
        metadata: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::generation::TemplateDialogueGen;
    use crate::infrastructure::persistence::memory::{MemoryProgramRepo, MemoryRelationshipRepo};
    use crate::stores::{ProgramStore, RelationshipStore, WorldSchemaStore};
    use uuid::Uuid;

    fn use_case() -> (LegacyDialogue, Arc<MigrationStats>) {
        let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);
        let stepper = Arc::new(Stepper::new(
            Arc::new(ProgramStore::new(Arc::new(MemoryProgramRepo::new()))),
            Arc::new(RelationshipStore::new(Arc::new(
                MemoryRelationshipRepo::new(),
            ))),
            Arc::new(WorldSchemaStore::new()),
            Arc::new(TemplateDialogueGen::new().with_template(SHIM_PROMPT_REF, "Hello, traveler.")),
            clock.clone(),
            8,
            256,
        ));
        let stats = Arc::new(MigrationStats::new());
        (
            LegacyDialogue::new(stepper, stats.clone(), clock),
            stats,
        )
    }

    #[test]
    fn test_shim_program_is_structurally_valid() {
        assert!(shim_program().validate().ok);
    }

    #[tokio::test]
    async fn test_legacy_call_returns_one_line_and_counts_shim_traffic() {
        let (use_case, stats) = use_case();
        let world = Uuid::new_v4();
        let response = use_case
            .execute(LegacyDialogueRequest {
                npc_id: Uuid::new_v4(),
                session_id: Uuid::new_v4(),
                world_id: world,
                player_input: "hi".to_string(),
            })
            .await
            .expect("execute");

        assert_eq!(response.dialogue, "Hello, traveler.");
        assert_eq!(stats.snapshot(WorldId::from_uuid(world)), (0, 1));
    }
}
