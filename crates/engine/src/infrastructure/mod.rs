pub mod blocks;
pub mod clock;
pub mod generation;
pub mod persistence;
pub mod ports;
