pub mod abort;
pub mod migration_status;
pub mod resume;
pub mod start;
pub mod stepper;

pub use abort::AbortNarrative;
pub use migration_status::GetMigrationStatus;
pub use resume::ResumeNarrative;
pub use start::StartNarrative;
pub use stepper::{CallContext, StepOutcome, Stepper};
