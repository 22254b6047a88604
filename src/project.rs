//! Project context for the oracle: a rendered file tree and concatenated sources.

use std::path::Path;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Names never walked into or listed
pub const IGNORE_LIST: [&str; 13] = [
    "node_modules",
    ".git",
    ".next",
    ".vscode",
    "dist",
    "build",
    "coverage",
    "public",
    "package-lock.json",
    "yarn.lock",
    "bun.lockb",
    "vibe-snapshot.png",
    "vibe.yaml",
];

/// Directory levels below the root shown in the tree
const TREE_DEPTH: usize = 5;

/// Larger files are listed but not inlined
pub const MAX_FILE_BYTES: u64 = 100 * 1024;

/// Cap on the whole source context
pub const MAX_CONTEXT_CHARS: usize = 400_000;

const TREE_EXTENSIONS: [&str; 6] = ["ts", "tsx", "js", "jsx", "css", "json"];
const SOURCE_EXTENSIONS: [&str; 5] = ["tsx", "ts", "jsx", "js", "css"];

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| IGNORE_LIST.contains(&name))
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| allowed.contains(&ext))
}

fn walk(root: &Path, max_depth: usize) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
        .filter_map(|e| e.ok())
}

/// Render the project as an indented tree of directories and code files:
///
/// ```text
/// ├── app/
///   ├── layout.tsx
///   └── page.tsx
/// └── package.json
/// ```
pub fn file_tree(root: &Path) -> String {
    let entries: Vec<(usize, String)> = walk(root, TREE_DEPTH)
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            if e.file_type().is_dir() {
                Some((e.depth() - 1, format!("{}/", name)))
            } else if has_extension(e.path(), &TREE_EXTENSIONS) {
                Some((e.depth() - 1, name))
            } else {
                None
            }
        })
        .collect();

    let mut tree = String::new();
    for (i, (depth, name)) in entries.iter().enumerate() {
        let is_last = entries[i + 1..]
            .iter()
            .find(|(d, _)| d <= depth)
            .is_none_or(|(d, _)| d < depth);
        let branch = if is_last { "└── " } else { "├── " };
        tree.push_str(&"  ".repeat(*depth));
        tree.push_str(branch);
        tree.push_str(name);
        tree.push('\n');
    }
    tree
}

/// Concatenate code files as `--- FILE: <relative path> ---` blocks.
///
/// Files over [`MAX_FILE_BYTES`] are named but skipped, and the result is
/// truncated at [`MAX_CONTEXT_CHARS`].
pub fn source_context(root: &Path) -> String {
    let mut context = String::new();

    for entry in walk(root, usize::MAX) {
        if !entry.file_type().is_file() || !has_extension(entry.path(), &SOURCE_EXTENSIONS) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > MAX_FILE_BYTES {
            context.push_str(&format!("\n--- FILE: {} (Skipped: Too Large) ---\n", relative));
            continue;
        }
        match std::fs::read_to_string(entry.path()) {
            Ok(content) => context.push_str(&format!("\n--- FILE: {} ---\n{}\n", relative, content)),
            Err(e) => warn!("Skipping {}: {}", relative, e),
        }
    }

    truncate_context(context)
}

fn truncate_context(mut context: String) -> String {
    if context.chars().count() <= MAX_CONTEXT_CHARS {
        return context;
    }
    warn!("Source context too large, truncating to {} characters", MAX_CONTEXT_CHARS);
    let cut = context
        .char_indices()
        .nth(MAX_CONTEXT_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(context.len());
    context.truncate(cut);
    context.push_str("\n...[TRUNCATED]");
    context
}

/// Read a text file, or an empty string (with a warning) if it is unreadable
pub fn read_or_empty(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| {
        warn!("Could not read {}: {}", path.display(), e);
        String::new()
    })
}
