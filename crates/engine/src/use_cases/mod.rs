pub mod legacy;
pub mod programs;
pub mod runtime;
