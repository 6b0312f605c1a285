//! Dockerfile parsing and build stage splitting.

pub mod parser;
pub mod stages;

pub use parser::{Dockerfile, Instruction, InstructionKind};
pub use stages::{split_stages, StagePlan, StageSplit};
