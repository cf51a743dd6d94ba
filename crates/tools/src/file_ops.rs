//! File persister: writes generated files into a task workspace.
//!
//! Every path is relative to the workspace root. Absolute paths and `..`
//! components are rejected, and the resolved path must stay inside the
//! canonical root. Writes are atomic (temp sibling + rename) and skipped
//! when the file already holds byte-identical content.
//!
//! Functions return `Result<_, String>` so callers can surface the failure
//! text to the model or the client verbatim.

use std::path::{Component, Path, PathBuf};

use cm_domain::trace::TraceEvent;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistStatus {
    Written,
    /// The file already existed with identical content; nothing was touched.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Persisted {
    /// Always the relative path as requested, never the absolute one.
    pub path: String,
    pub status: PersistStatus,
    pub bytes: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate and resolve a requested path within a workspace root.
///
/// The root must exist. Targets that do not exist yet are resolved through
/// their nearest existing ancestor before the containment check.
pub fn validate_path(workspace_root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(format!(
            "absolute paths are not allowed; use a path relative to the workspace root (got '{requested}')"
        ));
    }
    if requested_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err("path must not contain '..' components".to_owned());
    }

    let canonical_root = workspace_root.canonicalize().map_err(|e| {
        format!(
            "cannot resolve workspace root '{}': {e}",
            workspace_root.display()
        )
    })?;
    let candidate = canonical_root.join(requested_path);

    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()))?
    } else {
        resolve_through_ancestor(&candidate)?
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(format!(
            "path '{requested}' resolves outside workspace root '{}'",
            canonical_root.display()
        ));
    }

    Ok(resolved)
}

/// Canonicalize the longest existing prefix of `candidate` and re-append
/// the missing tail.
fn resolve_through_ancestor(candidate: &Path) -> Result<PathBuf, String> {
    let mut existing = candidate;
    let mut tail = Vec::new();
    while !existing.exists() {
        let Some(parent) = existing.parent() else {
            break;
        };
        if let Some(name) = existing.file_name() {
            tail.push(name);
        }
        existing = parent;
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persist
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Write `content` to `workspace_root/relative_path`, creating the root and
/// any parent directories.
pub async fn persist_file(
    workspace_root: &Path,
    relative_path: &str,
    content: &str,
) -> Result<Persisted, String> {
    if relative_path.trim().is_empty() {
        return Err("relative path must not be empty".to_owned());
    }

    fs::create_dir_all(workspace_root).await.map_err(|e| {
        format!(
            "failed to create workspace '{}': {e}",
            workspace_root.display()
        )
    })?;
    let path = validate_path(workspace_root, relative_path)?;

    if let Ok(existing) = fs::read(&path).await {
        if existing == content.as_bytes() {
            tracing::debug!(path = %relative_path, "content unchanged, skipping write");
            TraceEvent::FilePersisted {
                path: relative_path.to_owned(),
                bytes: content.len(),
                changed: false,
            }
            .emit();
            return Ok(Persisted {
                path: relative_path.to_owned(),
                status: PersistStatus::Unchanged,
                bytes: content.len(),
            });
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create parent directory: {e}"))?;
    }
    write_atomic(&path, content.as_bytes()).await?;

    TraceEvent::FilePersisted {
        path: relative_path.to_owned(),
        bytes: content.len(),
        changed: true,
    }
    .emit();

    Ok(Persisted {
        path: relative_path.to_owned(),
        status: PersistStatus::Written,
        bytes: content.len(),
    })
}

/// Write to a uniquely-named `.tmp` sibling, sync, then rename over the target.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    );
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp_path)
        .await
        .map_err(|e| format!("failed to create temp file '{}': {e}", tmp_path.display()))?;
    file.write_all(bytes)
        .await
        .map_err(|e| format!("failed to write temp file: {e}"))?;
    file.flush()
        .await
        .map_err(|e| format!("failed to flush temp file: {e}"))?;
    file.sync_data()
        .await
        .map_err(|e| format!("failed to sync temp file: {e}"))?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(format!(
            "failed to move '{}' into place: {e}",
            path.display()
        ));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
