//! Durable chat history for codemill tasks.
//!
//! Every task gets an append-only `<task_id>.jsonl` transcript. The
//! generation pipeline talks to it through the [`ChatHistory`] trait so the
//! storage can be swapped out.

pub mod history;

pub use history::{ChatHistory, HistoryLine, HistoryStore, MemoryHistory, Role};
