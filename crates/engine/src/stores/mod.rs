pub mod execution;
pub mod migration;
pub mod program;
pub mod relationship;
pub mod world_schema;

pub use execution::{ExecutionStateStore, StateGuard};
pub use migration::MigrationStats;
pub use program::ProgramStore;
pub use relationship::RelationshipStore;
pub use world_schema::WorldSchemaStore;
