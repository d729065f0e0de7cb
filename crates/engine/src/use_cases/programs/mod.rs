pub mod publish;

pub use publish::{PublishProgram, ValidateProgram};
