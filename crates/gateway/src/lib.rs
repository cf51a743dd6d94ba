//! codemill gateway: the generation pipeline and the `codemill` CLI.

pub mod cli;
pub mod runtime;
pub mod state;
