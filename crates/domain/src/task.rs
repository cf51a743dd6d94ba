//! Task identifiers.
//!
//! A task id names the task's workspace directory and its history file, so
//! it must be a single safe path component.

use crate::error::{Error, Result};

/// Accept ASCII letters, digits, `-`, `_` and `.`, except `.` and `..`.
pub fn check_task_id(task_id: &str) -> Result<()> {
    let ok = !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && task_id != "."
        && task_id != "..";
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid task id '{task_id}'")))
    }
}
