//! The graph interpreter.
//!
//! `Stepper::advance` runs a loaded execution state forward until it reaches
//! a suspension point (choice offer, generation request) or a terminal node,
//! collecting the dialogue lines produced along the way. The resume methods
//! apply player/provider input to a suspended state and hand back to the same
//! loop.
//!
//! The stepper itself never persists anything. Relationship effects are
//! accumulated on the outcome and flushed by the caller only after the
//! execution-state commit succeeds, so a failed call leaves both the stored
//! state and the relationship record exactly as they were.

use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use tracing::debug;

use reverie_domain::{
    CallFrame, Choice, DialogueMode, EvalContext, ExecutionState, ExecutionStatus,
    NarrativeProgram, Node, NodeId, NodeKind, ProgramId, RelationshipDelta, RelationshipRecord,
    TimeOfDay, WorldSchema,
};
use reverie_protocol::{
    CallbackContextData, ChoiceOfferData, DialogueLineData, GenerationKind, GenerationRequestData,
    GenerationResultData, OfferedChoiceData,
};

use crate::error::RuntimeError;
use crate::infrastructure::ports::{ClockPort, DialogueGenPort, DialoguePrompt};
use crate::stores::{ProgramStore, RelationshipStore, WorldSchemaStore};

/// Per-call evaluation inputs, resolved once at the API boundary so every
/// condition in one call sees the same time of day and player input.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub time_of_day: TimeOfDay,
    pub player_input: Option<String>,
}

impl CallContext {
    pub fn resolve(
        time_of_day: Option<TimeOfDay>,
        player_input: Option<String>,
        clock: &dyn ClockPort,
    ) -> Self {
        let time_of_day =
            time_of_day.unwrap_or_else(|| TimeOfDay::from_hour(clock.now().hour() as u8));
        Self {
            time_of_day,
            player_input,
        }
    }
}

/// What one advance produced: the new state plus everything to show the
/// caller.
pub struct StepOutcome {
    pub state: ExecutionState,
    pub lines: Vec<DialogueLineData>,
    pub offer: Option<ChoiceOfferData>,
    pub generation_request: Option<GenerationRequestData>,
    /// Set when the execution dead-ended (every choice gated out with no
    /// default, or every edge off a node gated out): the state has been
    /// aborted and the world's fallback line should surface to the caller as
    /// a `NoAvailableChoice` error after it is committed.
    pub dead_end_fallback: Option<String>,
    /// Relationship deltas produced by nodes and choices this call, in
    /// application order. Persisted by `flush_effects` after the state
    /// commit; until then only the in-call working record saw them.
    pub effects: Vec<RelationshipDelta>,
}

/// In-call working copy of the relationship record. Effects land here first
/// so later conditions in the same call see them; the deltas themselves are
/// carried out on the outcome and persisted only once the state commit won.
struct EffectLedger {
    schema: Arc<WorldSchema>,
    record: RelationshipRecord,
    pending: Vec<RelationshipDelta>,
}

impl EffectLedger {
    fn apply(&mut self, delta: &RelationshipDelta, now: DateTime<Utc>) {
        self.record.apply_delta(&self.schema, delta, now);
        self.pending.push(delta.clone());
    }

    fn eval<'a>(&'a self, ctx: &'a CallContext) -> EvalContext<'a> {
        EvalContext::for_record(
            &self.schema,
            &self.record,
            ctx.time_of_day,
            ctx.player_input.as_deref(),
        )
    }
}

/// Where edge-following left the execution.
enum EdgeStep {
    /// Moved to the next node; keep stepping.
    Moved,
    /// The program (and every caller frame) ran out at a terminal node.
    Finished,
    /// The node has outgoing edges but every one was gated out: the state
    /// was aborted and the fallback line carries to the caller.
    DeadEnd(String),
}

pub struct Stepper {
    programs: Arc<ProgramStore>,
    relationships: Arc<RelationshipStore>,
    schemas: Arc<WorldSchemaStore>,
    dialogue_gen: Arc<dyn DialogueGenPort>,
    clock: Arc<dyn ClockPort>,
    max_call_depth: usize,
    step_budget: u32,
}

impl Stepper {
    pub fn new(
        programs: Arc<ProgramStore>,
        relationships: Arc<RelationshipStore>,
        schemas: Arc<WorldSchemaStore>,
        dialogue_gen: Arc<dyn DialogueGenPort>,
        clock: Arc<dyn ClockPort>,
        max_call_depth: usize,
        step_budget: u32,
    ) -> Self {
        Self {
            programs,
            relationships,
            schemas,
            dialogue_gen,
            clock,
            max_call_depth,
            step_budget,
        }
    }

    /// Resolve a program id, preferring the overlay. The overlay carries an
    /// ephemeral program (legacy shims) that is never published to the store.
    async fn program(
        &self,
        overlay: Option<&Arc<NarrativeProgram>>,
        id: &ProgramId,
    ) -> Result<Arc<NarrativeProgram>, RuntimeError> {
        if let Some(program) = overlay {
            if &program.id == id {
                return Ok(program.clone());
            }
        }
        self.programs.load(id, None).await
    }

    /// Working relationship copy read once per call; every condition in the
    /// call evaluates against it, including effects applied earlier in the
    /// same call.
    async fn ledger(&self, state: &ExecutionState) -> Result<EffectLedger, RuntimeError> {
        let schema = self.schemas.get_or_default(state.world_id);
        let record = self
            .relationships
            .get_record(&schema, state.session_id, state.npc_id, self.clock.now())
            .await?;
        Ok(EffectLedger {
            schema,
            record,
            pending: Vec::new(),
        })
    }

    /// Persist the relationship deltas a call produced. Called by the use
    /// case after the execution-state commit, so a failed call flushes
    /// nothing and a retry starts from an unchanged record.
    pub async fn flush_effects(&self, outcome: &StepOutcome) -> Result<(), RuntimeError> {
        if outcome.effects.is_empty() {
            return Ok(());
        }
        let schema = self.schemas.get_or_default(outcome.state.world_id);
        for delta in &outcome.effects {
            self.relationships
                .apply_delta(
                    &schema,
                    outcome.state.session_id,
                    outcome.state.npc_id,
                    delta,
                    self.clock.now(),
                )
                .await?;
        }
        Ok(())
    }

    /// Pick the next node after `node_id` from its outgoing edges, popping
    /// call frames as programs run out. A node whose edges are all gated out
    /// is an authoring dead end, not a quiet ending.
    async fn follow_edges(
        &self,
        state: &mut ExecutionState,
        overlay: Option<&Arc<NarrativeProgram>>,
        ctx: &CallContext,
        ledger: &EffectLedger,
        mut program: Arc<NarrativeProgram>,
        mut node_id: NodeId,
    ) -> Result<EdgeStep, RuntimeError> {
        loop {
            let eval = ledger.eval(ctx);
            let mut has_edges = false;
            let target = program
                .edges_from(&node_id)
                .inspect(|_| has_edges = true)
                .find(|edge| {
                    edge.condition
                        .as_ref()
                        .map(|condition| condition.evaluate(&eval))
                        .unwrap_or(true)
                })
                .map(|edge| edge.to.clone());

            match target {
                Some(to) => {
                    state.current_node_id = to;
                    return Ok(EdgeStep::Moved);
                }
                // Edges exist but every one was gated out: the author routed
                // this node nowhere. Surfaced, never silently completed.
                None if has_edges => {
                    state.abort(self.clock.now());
                    return Ok(EdgeStep::DeadEnd(ledger.schema.fallback_line.clone()));
                }
                // No edges at all: this program is done; return to the caller
                // frame or complete the whole execution.
                None => match state.pop_frame() {
                    Some(CallFrame {
                        program_id,
                        return_node_id,
                    }) => {
                        program = self.program(overlay, &program_id).await?;
                        state.current_program_id = program_id;
                        node_id = return_node_id;
                    }
                    None => {
                        state.complete(self.clock.now());
                        return Ok(EdgeStep::Finished);
                    }
                },
            }
        }
    }

    /// Run the state forward to the next suspension point or completion.
    pub async fn advance(
        &self,
        state: ExecutionState,
        overlay: Option<&Arc<NarrativeProgram>>,
        ctx: &CallContext,
    ) -> Result<StepOutcome, RuntimeError> {
        let mut ledger = self.ledger(&state).await?;
        let mut outcome = self.advance_with(state, overlay, ctx, &mut ledger).await?;
        outcome.effects = ledger.pending;
        Ok(outcome)
    }

    async fn advance_with(
        &self,
        mut state: ExecutionState,
        overlay: Option<&Arc<NarrativeProgram>>,
        ctx: &CallContext,
        ledger: &mut EffectLedger,
    ) -> Result<StepOutcome, RuntimeError> {
        let mut lines = Vec::new();
        let mut offer = None;
        let mut generation_request = None;
        let mut dead_end_fallback = None;
        let mut steps: u32 = 0;

        while state.status == ExecutionStatus::Running {
            steps += 1;
            if steps > self.step_budget {
                return Err(RuntimeError::StepBudgetExhausted {
                    budget: self.step_budget,
                });
            }

            let program = self.program(overlay, &state.current_program_id).await?;
            let node = program
                .node(&state.current_node_id)
                .cloned()
                .ok_or_else(|| RuntimeError::not_found("node", state.current_node_id.as_str()))?;

            match &node.kind {
                NodeKind::Dialogue {
                    mode,
                    text,
                    program_ref,
                    prompt_ref,
                    effects,
                } => {
                    // A generated node carrying a program ref is a nested
                    // call, not a line.
                    if let (DialogueMode::Generated, Some(sub_id)) = (*mode, program_ref) {
                        let depth = state.call_stack.len();
                        if depth >= self.max_call_depth {
                            return Err(RuntimeError::CallStackOverflow { depth });
                        }
                        let sub = self.program(overlay, sub_id).await?;
                        debug!(from = %state.current_program_id, into = %sub.id, depth, "Entering sub-program");
                        state.record_visit(node.id.clone());
                        state.push_frame(CallFrame {
                            program_id: state.current_program_id.clone(),
                            return_node_id: node.id.clone(),
                        });
                        state.current_program_id = sub.id.clone();
                        state.current_node_id = sub.entry_node_id.clone();
                        continue;
                    }

                    let line = match mode {
                        DialogueMode::Static => text.clone().ok_or_else(|| {
                            RuntimeError::Validation(vec![format!(
                                "static dialogue node '{}' has no text",
                                node.id
                            )])
                        })?,
                        DialogueMode::Generated => {
                            self.dialogue_gen
                                .generate_line(&DialoguePrompt {
                                    prompt_ref: prompt_ref.clone(),
                                    session_id: state.session_id,
                                    npc_id: state.npc_id,
                                    player_input: ctx.player_input.clone(),
                                })
                                .await?
                        }
                    };
                    lines.push(DialogueLineData {
                        node_id: node.id.to_string(),
                        text: line,
                        generated: *mode == DialogueMode::Generated,
                    });

                    if let Some(effects) = effects {
                        ledger.apply(effects, self.clock.now());
                    }

                    state.record_visit(node.id.clone());
                    match self
                        .follow_edges(&mut state, overlay, ctx, ledger, program.clone(), node.id.clone())
                        .await?
                    {
                        EdgeStep::Moved => {}
                        EdgeStep::Finished => break,
                        EdgeStep::DeadEnd(line) => {
                            dead_end_fallback = Some(line);
                            break;
                        }
                    }
                }

                NodeKind::Choice {
                    prompt,
                    choices,
                    default_target_node_id,
                } => {
                    let eval = ledger.eval(ctx);
                    let available: Vec<&Choice> = choices
                        .iter()
                        .filter(|choice| {
                            choice
                                .condition
                                .as_ref()
                                .map(|condition| condition.evaluate(&eval))
                                .unwrap_or(true)
                        })
                        .collect();

                    if available.is_empty() {
                        match default_target_node_id {
                            Some(target) => {
                                state.record_visit(node.id.clone());
                                state.current_node_id = target.clone();
                                continue;
                            }
                            // Authoring bug: the scene dead-ends. Abort the
                            // execution; the caller commits the abort and
                            // then surfaces `NoAvailableChoice`.
                            None => {
                                state.record_visit(node.id.clone());
                                state.abort(self.clock.now());
                                dead_end_fallback = Some(ledger.schema.fallback_line.clone());
                                continue;
                            }
                        }
                    }

                    state.record_visit(node.id.clone());
                    state.status = ExecutionStatus::AwaitingChoice;
                    offer = Some(ChoiceOfferData {
                        node_id: node.id.to_string(),
                        prompt: prompt.clone(),
                        choices: available
                            .iter()
                            .map(|choice| OfferedChoiceData {
                                id: choice.id.to_string(),
                                text: choice.text.clone(),
                            })
                            .collect(),
                    });
                }

                NodeKind::ActionBlock {
                    mode: _,
                    query,
                    block_id,
                } => {
                    state.record_visit(node.id.clone());
                    state.status = ExecutionStatus::AwaitingGeneration;
                    generation_request = Some(GenerationRequestData {
                        kind: GenerationKind::ActionBlock,
                        query: query.clone(),
                        block_id: block_id.clone(),
                        prompt_ref: None,
                        callback_context: self.callback_context(&state, &node),
                    });
                }

                NodeKind::Branch {
                    branches,
                    default_target_node_id,
                } => {
                    let eval = ledger.eval(ctx);
                    let target = branches
                        .iter()
                        .find(|branch| branch.condition.evaluate(&eval))
                        .map(|branch| branch.target_node_id.clone())
                        .unwrap_or_else(|| default_target_node_id.clone());
                    state.record_visit(node.id.clone());
                    state.current_node_id = target;
                }
            }
        }

        state.updated_at = self.clock.now();
        Ok(StepOutcome {
            state,
            lines,
            offer,
            generation_request,
            dead_end_fallback,
            effects: Vec::new(),
        })
    }

    /// Apply a player's choice to a state suspended at a choice node, then
    /// advance.
    pub async fn resume_choice(
        &self,
        mut state: ExecutionState,
        overlay: Option<&Arc<NarrativeProgram>>,
        ctx: &CallContext,
        choice_id: &str,
    ) -> Result<StepOutcome, RuntimeError> {
        if state.status != ExecutionStatus::AwaitingChoice {
            return Err(RuntimeError::WrongState {
                status: state.status,
            });
        }

        let program = self.program(overlay, &state.current_program_id).await?;
        let node = program
            .node(&state.current_node_id)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found("node", state.current_node_id.as_str()))?;
        let NodeKind::Choice { choices, .. } = &node.kind else {
            return Err(RuntimeError::WrongState {
                status: state.status,
            });
        };

        let choice = choices
            .iter()
            .find(|choice| choice.id.as_str() == choice_id)
            .ok_or_else(|| {
                RuntimeError::Validation(vec![format!(
                    "choice '{}' does not exist on node '{}'",
                    choice_id, node.id
                )])
            })?;

        // Conditions are re-evaluated at selection time; a choice that was
        // offered but has since been gated out is stale, not invalid.
        let mut ledger = self.ledger(&state).await?;
        let still_available = {
            let eval = ledger.eval(ctx);
            choice
                .condition
                .as_ref()
                .map(|condition| condition.evaluate(&eval))
                .unwrap_or(true)
        };
        if !still_available {
            return Err(RuntimeError::StaleChoice {
                choice_id: choice_id.to_string(),
            });
        }

        if let Some(effects) = &choice.effects {
            ledger.apply(effects, self.clock.now());
        }

        state.status = ExecutionStatus::Running;
        state.current_node_id = choice.target_node_id.clone();
        let mut outcome = self.advance_with(state, overlay, ctx, &mut ledger).await?;
        outcome.effects = ledger.pending;
        Ok(outcome)
    }

    /// Apply a provider result to a state suspended at an action block, then
    /// advance past it.
    pub async fn resume_generation(
        &self,
        mut state: ExecutionState,
        overlay: Option<&Arc<NarrativeProgram>>,
        ctx: &CallContext,
        result: GenerationResultData,
    ) -> Result<StepOutcome, RuntimeError> {
        if state.status != ExecutionStatus::AwaitingGeneration {
            return Err(RuntimeError::WrongState {
                status: state.status,
            });
        }

        let program = self.program(overlay, &state.current_program_id).await?;
        let node = program
            .node(&state.current_node_id)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found("node", state.current_node_id.as_str()))?;
        if !matches!(node.kind, NodeKind::ActionBlock { .. }) {
            return Err(RuntimeError::WrongState {
                status: state.status,
            });
        }

        let mut lines = Vec::new();
        if let Some(text) = result.text {
            lines.push(DialogueLineData {
                node_id: node.id.to_string(),
                text,
                generated: true,
            });
        }

        let mut ledger = self.ledger(&state).await?;
        state.status = ExecutionStatus::Running;
        match self
            .follow_edges(&mut state, overlay, ctx, &ledger, program.clone(), node.id.clone())
            .await?
        {
            EdgeStep::Moved => {}
            EdgeStep::Finished => {
                state.updated_at = self.clock.now();
                return Ok(StepOutcome {
                    state,
                    lines,
                    offer: None,
                    generation_request: None,
                    dead_end_fallback: None,
                    effects: ledger.pending,
                });
            }
            EdgeStep::DeadEnd(line) => {
                state.updated_at = self.clock.now();
                return Ok(StepOutcome {
                    state,
                    lines,
                    offer: None,
                    generation_request: None,
                    dead_end_fallback: Some(line),
                    effects: ledger.pending,
                });
            }
        }

        let mut outcome = self.advance_with(state, overlay, ctx, &mut ledger).await?;
        let mut all_lines = lines;
        all_lines.append(&mut outcome.lines);
        outcome.lines = all_lines;
        outcome.effects = ledger.pending;
        Ok(outcome)
    }

    /// Rebuild the suspension view of an already-suspended state without
    /// advancing it. Used by idempotent re-entry on `start`.
    pub async fn describe(
        &self,
        state: ExecutionState,
        overlay: Option<&Arc<NarrativeProgram>>,
        ctx: &CallContext,
    ) -> Result<StepOutcome, RuntimeError> {
        let program = self.program(overlay, &state.current_program_id).await?;
        let node = program
            .node(&state.current_node_id)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found("node", state.current_node_id.as_str()))?;

        let mut offer = None;
        let mut generation_request = None;
        match (&state.status, &node.kind) {
            (
                ExecutionStatus::AwaitingChoice,
                NodeKind::Choice {
                    prompt, choices, ..
                },
            ) => {
                let ledger = self.ledger(&state).await?;
                let eval = ledger.eval(ctx);
                offer = Some(ChoiceOfferData {
                    node_id: node.id.to_string(),
                    prompt: prompt.clone(),
                    choices: choices
                        .iter()
                        .filter(|choice| {
                            choice
                                .condition
                                .as_ref()
                                .map(|condition| condition.evaluate(&eval))
                                .unwrap_or(true)
                        })
                        .map(|choice| OfferedChoiceData {
                            id: choice.id.to_string(),
                            text: choice.text.clone(),
                        })
                        .collect(),
                });
            }
            (
                ExecutionStatus::AwaitingGeneration,
                NodeKind::ActionBlock {
                    query, block_id, ..
                },
            ) => {
                generation_request = Some(GenerationRequestData {
                    kind: GenerationKind::ActionBlock,
                    query: query.clone(),
                    block_id: block_id.clone(),
                    prompt_ref: None,
                    callback_context: self.callback_context(&state, &node),
                });
            }
            _ => {}
        }

        Ok(StepOutcome {
            state,
            lines: Vec::new(),
            offer,
            generation_request,
            dead_end_fallback: None,
            effects: Vec::new(),
        })
    }

    fn callback_context(&self, state: &ExecutionState, node: &Node) -> CallbackContextData {
        CallbackContextData {
            execution_state_id: state.id.to_uuid(),
            session_id: state.session_id.to_uuid(),
            npc_id: state.npc_id.to_uuid(),
            program_id: state.current_program_id.to_string(),
            node_id: node.id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::generation::TemplateDialogueGen;
    use crate::infrastructure::persistence::memory::{MemoryProgramRepo, MemoryRelationshipRepo};
    use reverie_domain::{NpcId, RelationshipDelta, SessionId, WorldId};

    struct Harness {
        stepper: Stepper,
        programs: Arc<ProgramStore>,
        relationships: Arc<RelationshipStore>,
        schemas: Arc<WorldSchemaStore>,
    }

    fn harness() -> Harness {
        let programs = Arc::new(ProgramStore::new(Arc::new(MemoryProgramRepo::new())));
        let relationships = Arc::new(RelationshipStore::new(Arc::new(
            MemoryRelationshipRepo::new(),
        )));
        let schemas = Arc::new(WorldSchemaStore::new());
        let stepper = Stepper::new(
            programs.clone(),
            relationships.clone(),
            schemas.clone(),
            Arc::new(TemplateDialogueGen::new().with_template("greet", "Well met.")),
            Arc::new(SystemClock),
            8,
            256,
        );
        Harness {
            stepper,
            programs,
            relationships,
            schemas,
        }
    }

    fn ctx() -> CallContext {
        CallContext {
            time_of_day: TimeOfDay::Evening,
            player_input: None,
        }
    }

    async fn publish(harness: &Harness, json: serde_json::Value) -> Arc<NarrativeProgram> {
        let program: NarrativeProgram = serde_json::from_value(json).expect("program json");
        harness
            .programs
            .publish(program.clone())
            .await
            .expect("publish");
        harness
            .programs
            .load(&program.id, Some(program.version.clone()))
            .await
            .expect("load")
    }

    fn start_state(program: &NarrativeProgram, world_id: WorldId) -> ExecutionState {
        ExecutionState::new(
            SessionId::new(),
            NpcId::new(),
            world_id,
            program.id.clone(),
            program.entry_node_id.clone(),
            64,
            chrono::Utc::now(),
        )
    }

    fn linear_program() -> serde_json::Value {
        serde_json::json!({
            "id": "linear", "version": "1", "kind": "dialogue", "entry_node_id": "a",
            "nodes": [
                {"id": "a", "type": "dialogue", "mode": "static", "text": "Hello."},
                {"id": "b", "type": "dialogue", "mode": "static", "text": "Goodbye.", "terminal": true}
            ],
            "edges": [{"id": "e1", "from": "a", "to": "b"}]
        })
    }

    fn choice_program() -> serde_json::Value {
        serde_json::json!({
            "id": "tavern", "version": "1", "kind": "hybrid", "entry_node_id": "hello",
            "nodes": [
                {"id": "hello", "type": "dialogue", "mode": "static", "text": "Evening."},
                {
                    "id": "pick", "type": "choice", "prompt": "What do you say?",
                    "choices": [
                        {
                            "id": "flirt", "text": "You look lovely.",
                            "target_node_id": "blush",
                            "condition": "chemistry >= 40",
                            "effects": {"metrics": {"affinity": 5.0}}
                        },
                        {"id": "chat", "text": "Nice weather.", "target_node_id": "bye"}
                    ]
                },
                {"id": "blush", "type": "dialogue", "mode": "static", "text": "Oh!", "terminal": true},
                {"id": "bye", "type": "dialogue", "mode": "static", "text": "Quite.", "terminal": true}
            ],
            "edges": [{"id": "e1", "from": "hello", "to": "pick"}]
        })
    }

    #[tokio::test]
    async fn test_linear_program_runs_to_completion() {
        let h = harness();
        let program = publish(&h, linear_program()).await;
        let state = start_state(&program, WorldId::new());

        let outcome = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        let texts: Vec<&str> = outcome.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello.", "Goodbye."]);
        assert!(outcome.state.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_choice_offer_filters_gated_choices() {
        let h = harness();
        let program = publish(&h, choice_program()).await;
        let state = start_state(&program, WorldId::new());

        let outcome = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        assert_eq!(outcome.state.status, ExecutionStatus::AwaitingChoice);
        let offer = outcome.offer.expect("offer");
        // chemistry is 0, so "flirt" is gated out
        let ids: Vec<&str> = offer.choices.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["chat"]);
    }

    #[tokio::test]
    async fn test_resume_choice_applies_effects_and_advances() {
        let h = harness();
        let program = publish(&h, choice_program()).await;
        let world_id = WorldId::new();
        let schema = h.schemas.get_or_default(world_id);
        let state = start_state(&program, world_id);
        let session_id = state.session_id;
        let npc_id = state.npc_id;

        // Open the gated choice
        h.relationships
            .apply_delta(
                &schema,
                session_id,
                npc_id,
                &RelationshipDelta::metric("chemistry", 50.0),
                chrono::Utc::now(),
            )
            .await
            .expect("delta");

        let suspended = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        let outcome = h
            .stepper
            .resume_choice(suspended.state, None, &ctx(), "flirt")
            .await
            .expect("resume");

        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        assert_eq!(outcome.lines[0].text, "Oh!");
        h.stepper.flush_effects(&outcome).await.expect("flush");
        let record = h
            .relationships
            .get_record(&schema, session_id, npc_id, chrono::Utc::now())
            .await
            .expect("record");
        assert_eq!(record.metric("affinity"), 5.0);
    }

    #[tokio::test]
    async fn test_effects_stay_pending_until_flushed() {
        let h = harness();
        let program = publish(&h, choice_program()).await;
        let world_id = WorldId::new();
        let schema = h.schemas.get_or_default(world_id);
        let state = start_state(&program, world_id);
        let session_id = state.session_id;
        let npc_id = state.npc_id;

        h.relationships
            .apply_delta(
                &schema,
                session_id,
                npc_id,
                &RelationshipDelta::metric("chemistry", 50.0),
                chrono::Utc::now(),
            )
            .await
            .expect("delta");

        let suspended = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        let outcome = h
            .stepper
            .resume_choice(suspended.state, None, &ctx(), "flirt")
            .await
            .expect("resume");

        // The delta rides on the outcome; the stored record is untouched
        // until the caller flushes after its commit.
        assert_eq!(outcome.effects.len(), 1);
        let record = h
            .relationships
            .get_record(&schema, session_id, npc_id, chrono::Utc::now())
            .await
            .expect("record");
        assert_eq!(record.metric("affinity"), 0.0);

        h.stepper.flush_effects(&outcome).await.expect("flush");
        let record = h
            .relationships
            .get_record(&schema, session_id, npc_id, chrono::Utc::now())
            .await
            .expect("record");
        assert_eq!(record.metric("affinity"), 5.0);
    }

    #[tokio::test]
    async fn test_gated_choice_id_is_stale_not_unknown() {
        let h = harness();
        let program = publish(&h, choice_program()).await;
        let state = start_state(&program, WorldId::new());

        let suspended = h.stepper.advance(state, None, &ctx()).await.expect("advance");

        // "flirt" exists on the node but its condition fails
        let stale = h
            .stepper
            .resume_choice(suspended.state.clone(), None, &ctx(), "flirt")
            .await;
        assert!(matches!(stale, Err(RuntimeError::StaleChoice { .. })));

        // "ghost" never existed
        let unknown = h
            .stepper
            .resume_choice(suspended.state, None, &ctx(), "ghost")
            .await;
        assert!(matches!(unknown, Err(RuntimeError::Validation(_))));
    }

    #[tokio::test]
    async fn test_all_choices_gated_without_default_aborts_as_dead_end() {
        let h = harness();
        let program = publish(
            &h,
            serde_json::json!({
                "id": "locked", "version": "1", "kind": "dialogue", "entry_node_id": "pick",
                "nodes": [
                    {
                        "id": "pick", "type": "choice", "prompt": "?",
                        "choices": [
                            {"id": "only", "text": "Secret.", "target_node_id": "end",
                             "condition": "flags.secret_known"}
                        ]
                    },
                    {"id": "end", "type": "dialogue", "mode": "static", "text": ".", "terminal": true}
                ]
            }),
        )
        .await;
        let state = start_state(&program, WorldId::new());

        let outcome = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        assert_eq!(outcome.state.status, ExecutionStatus::Aborted);
        let fallback = outcome.dead_end_fallback.expect("fallback line");
        assert!(!fallback.is_empty());
    }

    #[tokio::test]
    async fn test_dialogue_with_all_edges_gated_aborts_as_dead_end() {
        let h = harness();
        let program = publish(
            &h,
            serde_json::json!({
                "id": "strand", "version": "1", "kind": "dialogue", "entry_node_id": "a",
                "nodes": [
                    {"id": "a", "type": "dialogue", "mode": "static", "text": "Hm."},
                    {"id": "b", "type": "dialogue", "mode": "static", "text": "Never.", "terminal": true}
                ],
                "edges": [{"id": "e1", "from": "a", "to": "b", "condition": "affinity >= 100"}]
            }),
        )
        .await;
        let state = start_state(&program, WorldId::new());

        // Routing nowhere is an authoring error, not a quiet completion
        let outcome = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        assert_eq!(outcome.state.status, ExecutionStatus::Aborted);
        assert!(outcome.dead_end_fallback.is_some());
        assert_eq!(outcome.lines[0].text, "Hm.");
    }

    #[tokio::test]
    async fn test_branch_routes_on_relationship_state() {
        let h = harness();
        let program = publish(
            &h,
            serde_json::json!({
                "id": "fork", "version": "1", "kind": "scene", "entry_node_id": "route",
                "nodes": [
                    {
                        "id": "route", "type": "branch",
                        "branches": [
                            {"id": "warm", "condition": "affinity >= 30", "target_node_id": "friendly"}
                        ],
                        "default_target_node_id": "cold"
                    },
                    {"id": "friendly", "type": "dialogue", "mode": "static", "text": "Friend!", "terminal": true},
                    {"id": "cold", "type": "dialogue", "mode": "static", "text": "Hm.", "terminal": true}
                ]
            }),
        )
        .await;

        let world_id = WorldId::new();
        let state = start_state(&program, world_id);
        let outcome = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        assert_eq!(outcome.lines[0].text, "Hm.");
    }

    #[tokio::test]
    async fn test_action_block_suspends_then_resumes_past_it() {
        let h = harness();
        let program = publish(
            &h,
            serde_json::json!({
                "id": "scene", "version": "1", "kind": "scene", "entry_node_id": "act",
                "nodes": [
                    {"id": "act", "type": "action_block", "mode": "query",
                     "query": {"include": ["combat"]}},
                    {"id": "after", "type": "dialogue", "mode": "static", "text": "That was close.", "terminal": true}
                ],
                "edges": [{"id": "e1", "from": "act", "to": "after"}]
            }),
        )
        .await;
        let state = start_state(&program, WorldId::new());

        let suspended = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        assert_eq!(suspended.state.status, ExecutionStatus::AwaitingGeneration);
        let request = suspended.generation_request.expect("request");
        assert_eq!(request.kind, GenerationKind::ActionBlock);
        assert_eq!(request.callback_context.node_id, "act");

        let outcome = h
            .stepper
            .resume_generation(
                suspended.state,
                None,
                &ctx(),
                GenerationResultData {
                    text: Some("The blades clash.".to_string()),
                    selected_block_id: Some("duel".to_string()),
                    meta: Default::default(),
                },
            )
            .await
            .expect("resume");
        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        let texts: Vec<&str> = outcome.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["The blades clash.", "That was close."]);
    }

    #[tokio::test]
    async fn test_nested_call_returns_to_caller() {
        let h = harness();
        publish(
            &h,
            serde_json::json!({
                "id": "aside", "version": "1", "kind": "dialogue", "entry_node_id": "line",
                "nodes": [{"id": "line", "type": "dialogue", "mode": "static", "text": "(aside)", "terminal": true}]
            }),
        )
        .await;
        let program = publish(
            &h,
            serde_json::json!({
                "id": "main", "version": "1", "kind": "dialogue", "entry_node_id": "call",
                "nodes": [
                    {"id": "call", "type": "dialogue", "mode": "generated", "program_ref": "aside"},
                    {"id": "end", "type": "dialogue", "mode": "static", "text": "Back.", "terminal": true}
                ],
                "edges": [{"id": "e1", "from": "call", "to": "end"}]
            }),
        )
        .await;
        let state = start_state(&program, WorldId::new());

        let outcome = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        let texts: Vec<&str> = outcome.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["(aside)", "Back."]);
        assert!(outcome.state.call_stack.is_empty());
    }

    #[tokio::test]
    async fn test_self_calling_program_overflows_the_call_stack() {
        let h = harness();
        let program = publish(
            &h,
            serde_json::json!({
                "id": "ouroboros", "version": "1", "kind": "dialogue", "entry_node_id": "again",
                "nodes": [{"id": "again", "type": "dialogue", "mode": "generated",
                           "program_ref": "ouroboros", "terminal": true}]
            }),
        )
        .await;
        let state = start_state(&program, WorldId::new());

        let result = h.stepper.advance(state, None, &ctx()).await;
        assert!(matches!(
            result.map(|o| o.state.status),
            Err(RuntimeError::CallStackOverflow { depth: 8 })
        ));
    }

    #[tokio::test]
    async fn test_generated_dialogue_uses_the_provider() {
        let h = harness();
        let program = publish(
            &h,
            serde_json::json!({
                "id": "gen", "version": "1", "kind": "dialogue", "entry_node_id": "g",
                "nodes": [{"id": "g", "type": "dialogue", "mode": "generated",
                           "prompt_ref": "greet", "terminal": true}]
            }),
        )
        .await;
        let state = start_state(&program, WorldId::new());

        let outcome = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        assert_eq!(outcome.lines[0].text, "Well met.");
        assert!(outcome.lines[0].generated);
    }

    #[tokio::test]
    async fn test_dialogue_effects_are_visible_to_later_conditions() {
        let h = harness();
        let program = publish(
            &h,
            serde_json::json!({
                "id": "warmup", "version": "1", "kind": "hybrid", "entry_node_id": "gift",
                "nodes": [
                    {"id": "gift", "type": "dialogue", "mode": "static", "text": "For you.",
                     "effects": {"metrics": {"affinity": 35.0}}},
                    {
                        "id": "route", "type": "branch",
                        "branches": [
                            {"id": "warmed", "condition": "affinity >= 30", "target_node_id": "smile"}
                        ],
                        "default_target_node_id": "shrug"
                    },
                    {"id": "smile", "type": "dialogue", "mode": "static", "text": "Thank you!", "terminal": true},
                    {"id": "shrug", "type": "dialogue", "mode": "static", "text": "Hm.", "terminal": true}
                ],
                "edges": [{"id": "e1", "from": "gift", "to": "route"}]
            }),
        )
        .await;
        let state = start_state(&program, WorldId::new());

        let outcome = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        let texts: Vec<&str> = outcome.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["For you.", "Thank you!"]);
        // Pending until the caller commits and flushes
        assert_eq!(outcome.effects.len(), 1);
    }

    #[tokio::test]
    async fn test_state_round_trips_through_json_with_identical_behavior() {
        let h = harness();
        let program = publish(&h, choice_program()).await;
        let state = start_state(&program, WorldId::new());

        let suspended = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        let json = serde_json::to_string(&suspended.state).expect("serialize");
        let reloaded: ExecutionState = serde_json::from_str(&json).expect("deserialize");

        let from_original = h
            .stepper
            .resume_choice(suspended.state, None, &ctx(), "chat")
            .await
            .expect("resume original");
        let from_reloaded = h
            .stepper
            .resume_choice(reloaded, None, &ctx(), "chat")
            .await
            .expect("resume reloaded");

        assert_eq!(from_original.state.status, from_reloaded.state.status);
        assert_eq!(
            from_original.state.current_node_id,
            from_reloaded.state.current_node_id
        );
        let original_texts: Vec<&str> =
            from_original.lines.iter().map(|l| l.text.as_str()).collect();
        let reloaded_texts: Vec<&str> =
            from_reloaded.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(original_texts, reloaded_texts);
    }

    #[tokio::test]
    async fn test_history_records_visited_nodes_in_order() {
        let h = harness();
        let program = publish(&h, linear_program()).await;
        let state = start_state(&program, WorldId::new());

        let outcome = h.stepper.advance(state, None, &ctx()).await.expect("advance");
        let visited: Vec<&str> = outcome.state.history.iter().map(|n| n.as_str()).collect();
        assert_eq!(visited, vec!["a", "b"]);
    }
}
