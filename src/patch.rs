//! Multi-file patch format and oracle output cleanup.
//!
//! A patch is a sequence of blocks:
//!
//! ```text
//! --- FILE: app/page.tsx ---
//! export default function Page() { ... }
//! --- FILE: lib/api.ts ---
//! ...
//! ```
//!
//! Each block's content runs to the next `--- FILE:` marker or the end of the
//! text. Paths and contents are trimmed.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const FILE_MARKER: &str = "--- FILE:";

static FILE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--- FILE: (.*?) ---\r?\n").expect("static regex"));

static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[a-zA-Z]*\r?\n").expect("static regex"));

static PREAMBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*Here is the .*? code:?").expect("static regex"));

/// Result type for patch application
pub type PatchResult<T> = Result<T, PatchError>;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Refusing to write outside the project: {0}")]
    UnsafePath(String),

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One file replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpdate {
    /// Path relative to the project root
    pub path: String,
    /// Full new content
    pub content: String,
}

/// Parse patch text into file updates.
///
/// Returns `None` for non-empty text without any block, so callers can tell a
/// malformed reply from an empty one.
pub fn parse_patch(text: &str) -> Option<Vec<FileUpdate>> {
    let mut updates = Vec::new();
    let mut cursor = 0;

    while let Some(caps) = FILE_HEADER.captures_at(text, cursor) {
        let (Some(header), Some(path)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let body_start = header.end();
        let body_end = text[body_start..]
            .find(FILE_MARKER)
            .map(|i| body_start + i)
            .unwrap_or(text.len());

        updates.push(FileUpdate {
            path: path.as_str().trim().to_string(),
            content: text[body_start..body_end].trim().to_string(),
        });
        cursor = body_end;
    }

    if updates.is_empty() && !text.trim().is_empty() {
        None
    } else {
        Some(updates)
    }
}

/// Resolve `relative` under `root`, rejecting absolute and escaping paths
pub fn resolve_in_root(root: &Path, relative: &str) -> PatchResult<PathBuf> {
    let candidate = Path::new(relative);
    let mut depth: usize = 0;
    for component in candidate.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| PatchError::UnsafePath(relative.to_string()))?;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PatchError::UnsafePath(relative.to_string()));
            }
        }
    }
    if depth == 0 {
        return Err(PatchError::UnsafePath(relative.to_string()));
    }
    Ok(root.join(candidate))
}

/// Write every update under `root`, creating parent directories.
///
/// Unsafe paths are skipped with a warning. Returns the paths written.
pub fn apply_patch(root: &Path, updates: &[FileUpdate]) -> PatchResult<Vec<PathBuf>> {
    info!("Applying {} file updates", updates.len());
    let mut written = Vec::with_capacity(updates.len());

    for update in updates {
        let target = match resolve_in_root(root, &update.path) {
            Ok(target) => target,
            Err(e) => {
                warn!("Skipping update: {}", e);
                continue;
            }
        };
        let io_err = |source| PatchError::Io {
            path: update.path.clone(),
            source,
        };
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(&target, &update.content).map_err(io_err)?;
        info!("  updated {}", update.path);
        written.push(target);
    }

    Ok(written)
}

/// Remove markdown fences and a leading "Here is the ... code:" line
pub fn strip_code_fences(text: &str) -> String {
    let without_open = FENCE_OPEN.replace_all(text, "");
    let without_fences = without_open.replace("```", "");
    PREAMBLE.replace(&without_fences, "").trim().to_string()
}
