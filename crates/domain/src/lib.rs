//! Shared types for the codemill workspace: errors, configuration, model
//! stream events, output modes and structured trace events.

pub mod config;
pub mod error;
pub mod mode;
pub mod stream;
pub mod task;
pub mod trace;

pub use error::{Error, Result};
pub use mode::OutputMode;
pub use task::check_task_id;
