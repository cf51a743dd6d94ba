//! Workspace-side effects of a generation run.
//!
//! - `file_ops`: persist generated files inside a task workspace
//! - `process`: run a command with captured output and a hard timeout
//! - `build`: the install + build pipeline for tool-protocol projects
//! - `tool`: model-invocable tools (`writeFile`, `exit`) and their rendering
//! - `validate`: project structure and lint checks the model can call

pub mod build;
pub mod file_ops;
pub mod process;
pub mod tool;
pub mod validate;

pub use build::{BuildPipeline, BuildResult, BuildStatus};
pub use file_ops::{persist_file, PersistStatus, Persisted};
pub use tool::{Tool, ToolContext, ToolRegistry};
pub use validate::{CodeValidationTool, ProjectStructureTool};
