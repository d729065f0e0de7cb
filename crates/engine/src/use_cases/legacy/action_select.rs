//! Legacy single-shot action selection, reimplemented as a one-node program.
//!
//! The pre-runtime contract sends a tag list and gets back the best matching
//! block, synchronously. Internally the call now runs the same interpreter
//! as everything else: an ephemeral action-block program suspends awaiting
//! generation, the selection port answers the emitted request, and the
//! resumed outcome folds back into the frozen wire shape. No execution state
//! is ever persisted.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use reverie_domain::{
    ActionBlockMode, ExecutionState, NarrativeProgram, Node, NodeId, NodeKind, NpcId, ProgramId,
    ProgramKind, SessionId, TagQuery, WorldId,
};
use reverie_protocol::{
    GenerationResultData, LegacyActionSelectRequest, LegacyActionSelectResponse,
};

use crate::error::RuntimeError;
use crate::infrastructure::ports::{ActionSelectPort, ClockPort};
use crate::stores::MigrationStats;
use crate::use_cases::runtime::stepper::{CallContext, Stepper};

const SHIM_PROGRAM_ID: &str = "__legacy_action_select";

pub struct LegacyActionSelect {
    stepper: Arc<Stepper>,
    selector: Arc<dyn ActionSelectPort>,
    stats: Arc<MigrationStats>,
    clock: Arc<dyn ClockPort>,
}

impl LegacyActionSelect {
    pub fn new(
        stepper: Arc<Stepper>,
        selector: Arc<dyn ActionSelectPort>,
        stats: Arc<MigrationStats>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            stepper,
            selector,
            stats,
            clock,
        }
    }

    pub async fn execute(
        &self,
        request: LegacyActionSelectRequest,
    ) -> Result<LegacyActionSelectResponse, RuntimeError> {
        let world_id = WorldId::from_uuid(request.world_id);
        let session_id = SessionId::from_uuid(request.session_id);
        // The legacy contract carries no NPC; the shim state runs with a nil
        // one.
        let npc_id = NpcId::from_uuid(Uuid::nil());

        let program = Arc::new(shim_program(TagQuery {
            include: request.tags.clone(),
            exclude: request.excluded_tags.clone(),
        }));
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

        let ctx = CallContext::resolve(None, None, self.clock.as_ref());
        // Suspend at the action block; its emitted request drives the port
        let suspended = self.stepper.advance(state, Some(&program), &ctx).await?;
        let emitted = suspended.generation_request.ok_or_else(|| {
            RuntimeError::Generation("action block emitted no generation request".to_string())
        })?;
        let selected_block_id = self
            .selector
            .select_block(&emitted.query.unwrap_or_default())
            .await?;

        // Feed the answer back; the completed shim state is dropped, never
        // committed
        self.stepper
            .resume_generation(
                suspended.state,
                Some(&program),
                &ctx,
                GenerationResultData {
                    text: None,
                    selected_block_id: selected_block_id.clone(),
                    meta: HashMap::new(),
                },
            )
            .await?;

        let matched_tags = if selected_block_id.is_some() {
            request.tags
        } else {
            Vec::new()
        };

        self.stats.record_shim_call(world_id);
        debug!(world = %world_id, selected = ?selected_block_id, "Served legacy action select");

        Ok(LegacyActionSelectResponse {
            selected_block_id,
            matched_tags,
        })
    }
}

fn shim_program(query: TagQuery) -> NarrativeProgram {
    let node_id = NodeId::new("select");
    NarrativeProgram {
        id: ProgramId::new(SHIM_PROGRAM_ID),
        version: "shim".to_string(),
        kind: ProgramKind::Scene,
        nodes: vec![Node {
            id: node_id.clone(),
            terminal: true,
            kind: NodeKind::ActionBlock {
                mode: ActionBlockMode::Query,
                query: Some(query),
                block_id: None,
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
    use crate::infrastructure::blocks::MemoryBlockIndex;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::generation::TemplateDialogueGen;
    use crate::infrastructure::persistence::memory::{MemoryProgramRepo, MemoryRelationshipRepo};
    use crate::stores::{ProgramStore, RelationshipStore, WorldSchemaStore};

    fn use_case(index: Arc<MemoryBlockIndex>) -> LegacyActionSelect {
        let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);
        let stepper = Arc::new(Stepper::new(
            Arc::new(ProgramStore::new(Arc::new(MemoryProgramRepo::new()))),
            Arc::new(RelationshipStore::new(Arc::new(
                MemoryRelationshipRepo::new(),
            ))),
            Arc::new(WorldSchemaStore::new()),
            Arc::new(TemplateDialogueGen::new()),
            clock.clone(),
            8,
            256,
        ));
        LegacyActionSelect::new(stepper, index, Arc::new(MigrationStats::new()), clock)
    }

    #[test]
    fn test_shim_program_is_structurally_valid() {
        let program = shim_program(TagQuery {
            include: vec!["combat".into()],
            exclude: Vec::new(),
        });
        assert!(program.validate().ok);
    }

    #[tokio::test]
    async fn test_selection_reports_the_matched_tags() {
        let index = Arc::new(MemoryBlockIndex::new());
        index.register("spar", vec!["combat".into(), "friendly".into()]);
        let use_case = use_case(index);

        let response = use_case
            .execute(LegacyActionSelectRequest {
                world_id: Uuid::new_v4(),
                session_id: Uuid::new_v4(),
                tags: vec!["combat".into()],
                excluded_tags: vec!["hostile".into()],
            })
            .await
            .expect("execute");

        assert_eq!(response.selected_block_id.as_deref(), Some("spar"));
        assert_eq!(response.matched_tags, vec!["combat".to_string()]);
    }

    #[tokio::test]
    async fn test_no_match_returns_empty_selection() {
        let use_case = use_case(Arc::new(MemoryBlockIndex::new()));

        let response = use_case
            .execute(LegacyActionSelectRequest {
                world_id: Uuid::new_v4(),
                session_id: Uuid::new_v4(),
                tags: vec!["combat".into()],
                excluded_tags: Vec::new(),
            })
            .await
            .expect("execute");

        assert!(response.selected_block_id.is_none());
        assert!(response.matched_tags.is_empty());
    }
}
