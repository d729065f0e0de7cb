extern crate self as reverie_domain;

pub mod error;
pub mod execution;
pub mod expression;
pub mod game_time;
pub mod ids;
pub mod program;
pub mod relationship;
pub mod tiers;

pub use error::DomainError;

pub use execution::{CallFrame, ExecutionState, ExecutionStatus};

pub use expression::{CmpOp, EvalContext, Expr, Expression, Operand};

pub use game_time::TimeOfDay;

// Re-export ID types
pub use ids::{
    ChoiceId, EdgeId, ExecutionId, NodeId, NpcId, ProgramId, SessionId, WorldId,
};

pub use program::{
    ActionBlockMode, Branch, Choice, DialogueMode, Edge, NarrativeProgram, Node, NodeKind,
    ProgramKind, TagQuery, ValidationResult,
};

pub use relationship::{FlagChanges, FlagValue, RelationshipDelta, RelationshipRecord};

pub use tiers::{IntimacyLevel, MetricBounds, TierRange, WorldSchema};
