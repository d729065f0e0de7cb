//! Application composition root.
//!
//! Wires repositories, stores, and use cases into one `App` handed to the
//! HTTP layer. `App::in_memory` is the default wiring for the bundled binary
//! and for tests; a deployment with external storage or a real generation
//! provider builds the same struct with its own ports.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::infrastructure::blocks::MemoryBlockIndex;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::generation::TemplateDialogueGen;
use crate::infrastructure::persistence::memory::{
    MemoryExecutionRepo, MemoryProgramRepo, MemoryRelationshipRepo,
};
use crate::infrastructure::ports::{
    ActionSelectPort, ClockPort, DialogueGenPort, ExecutionRepo, ProgramRepo, RelationshipRepo,
};
use crate::stores::{
    ExecutionStateStore, MigrationStats, ProgramStore, RelationshipStore, WorldSchemaStore,
};
use crate::use_cases::legacy::{LegacyActionSelect, LegacyDialogue};
use crate::use_cases::programs::{PublishProgram, ValidateProgram};
use crate::use_cases::runtime::{
    AbortNarrative, GetMigrationStatus, ResumeNarrative, StartNarrative, Stepper,
};

pub struct App {
    pub config: EngineConfig,

    pub schemas: Arc<WorldSchemaStore>,
    pub relationships: Arc<RelationshipStore>,
    pub executions: Arc<ExecutionStateStore>,

    pub start_narrative: StartNarrative,
    pub resume_narrative: ResumeNarrative,
    pub abort_narrative: AbortNarrative,
    pub migration_status: GetMigrationStatus,
    pub publish_program: PublishProgram,
    pub validate_program: ValidateProgram,
    pub legacy_dialogue: LegacyDialogue,
    pub legacy_action_select: LegacyActionSelect,
}

/// External dependencies the app is built from.
pub struct Ports {
    pub programs: Arc<dyn ProgramRepo>,
    pub relationships: Arc<dyn RelationshipRepo>,
    pub executions: Arc<dyn ExecutionRepo>,
    pub dialogue_gen: Arc<dyn DialogueGenPort>,
    pub action_select: Arc<dyn ActionSelectPort>,
    pub clock: Arc<dyn ClockPort>,
}

impl App {
    pub fn new(config: EngineConfig, ports: Ports) -> Self {
        let programs = Arc::new(ProgramStore::new(ports.programs));
        let relationships = Arc::new(RelationshipStore::new(ports.relationships));
        let executions = Arc::new(ExecutionStateStore::new(ports.executions));
        let schemas = Arc::new(WorldSchemaStore::new());
        let stats = Arc::new(MigrationStats::new());

        let stepper = Arc::new(Stepper::new(
            programs.clone(),
            relationships.clone(),
            schemas.clone(),
            ports.dialogue_gen,
            ports.clock.clone(),
            config.max_call_depth,
            config.step_budget,
        ));

        Self {
            start_narrative: StartNarrative::new(
                stepper.clone(),
                programs.clone(),
                executions.clone(),
                stats.clone(),
                ports.clock.clone(),
                config.history_cap,
            ),
            resume_narrative: ResumeNarrative::new(
                stepper.clone(),
                executions.clone(),
                ports.clock.clone(),
            ),
            abort_narrative: AbortNarrative::new(executions.clone(), ports.clock.clone()),
            migration_status: GetMigrationStatus::new(stats.clone()),
            publish_program: PublishProgram::new(programs.clone()),
            validate_program: ValidateProgram::new(programs.clone()),
            legacy_dialogue: LegacyDialogue::new(stepper.clone(), stats.clone(), ports.clock.clone()),
            legacy_action_select: LegacyActionSelect::new(
                stepper,
                ports.action_select,
                stats,
                ports.clock,
            ),
            schemas,
            relationships,
            executions,
            config,
        }
    }

    /// Default wiring: everything in memory, template-based generation.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(
            config,
            Ports {
                programs: Arc::new(MemoryProgramRepo::new()),
                relationships: Arc::new(MemoryRelationshipRepo::new()),
                executions: Arc::new(MemoryExecutionRepo::new()),
                dialogue_gen: Arc::new(TemplateDialogueGen::new()),
                action_select: Arc::new(MemoryBlockIndex::new()),
                clock: Arc::new(SystemClock),
            },
        )
    }
}
