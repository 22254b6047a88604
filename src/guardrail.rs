//! Change-safety checks for regenerated plan files.
//!
//! Nothing here rejects a plan outright. Violations are reported so the caller
//! can log them, and the only rewrite is restoring the original `meta:` block.

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Legacy keys a regenerated plan should not reintroduce
pub const DENYLISTED_KEYS: [&str; 4] = ["actions", "assert_visible", "assert_text", "selector"];

/// Allowed change percentage without a user instruction
pub const DEFAULT_CHANGE_LIMIT: f64 = 30.0;

/// Allowed change percentage when the user asked for a change
pub const PROMPTED_CHANGE_LIMIT: f64 = 75.0;

/// Below this percentage a diff counts as minimal
const MINIMAL_CHANGE_PERCENT: f64 = 50.0;

static LINE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:-\s+)?([A-Za-z_][\w-]*)\s*:").expect("static regex"));

static TOP_LEVEL_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+:").expect("static regex"));

/// Shape check of a plan document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureReport {
    /// No denylisted key appears
    pub is_valid: bool,
    /// Denylisted keys found, in first-seen order
    pub invalid_keys: Vec<String>,
    /// Both `meta:` and `scenarios:` are present
    pub has_required_sections: bool,
    /// Number of lines in the document
    pub line_count: usize,
}

/// Check a plan document for legacy keys and required sections
pub fn validate_yaml_structure(text: &str) -> StructureReport {
    let mut invalid_keys: Vec<String> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = LINE_KEY.captures(line) {
            let key = &caps[1];
            if DENYLISTED_KEYS.contains(&key) && !invalid_keys.iter().any(|k| k == key) {
                invalid_keys.push(key.to_string());
            }
        }
    }

    let has_section = |name: &str| text.lines().any(|l| l.trim_start().starts_with(&format!("{}:", name)));

    StructureReport {
        is_valid: invalid_keys.is_empty(),
        invalid_keys,
        has_required_sections: has_section("meta") && has_section("scenarios"),
        line_count: text.lines().count(),
    }
}

/// Path of a timestamped backup next to `path`
pub fn backup_path(path: &Path) -> PathBuf {
    let timestamp = Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "plan".to_string());
    path.with_file_name(format!("{}.backup.{}.yaml", stem, timestamp))
}

/// Write `content` to a timestamped backup beside `path`
pub fn create_backup(path: &Path, content: &str) -> std::io::Result<PathBuf> {
    let backup = backup_path(path);
    std::fs::write(&backup, content)?;
    Ok(backup)
}

/// Line counts behind a [`YamlDiff`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffStats {
    pub total: usize,
    pub unchanged: usize,
    pub added: usize,
    pub removed: usize,
}

/// Line-set difference between two plan documents
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlDiff {
    /// `+ line` and `- line` entries
    pub changes: Vec<String>,
    /// Less than half of the document changed
    pub is_minimal: bool,
    pub change_percentage: f64,
    pub stats: DiffStats,
}

/// Compare non-blank lines of two documents, order-insensitively
pub fn calculate_yaml_diff(original: &str, updated: &str) -> YamlDiff {
    if original.trim().is_empty() {
        return YamlDiff {
            changes: if updated.is_empty() {
                Vec::new()
            } else {
                vec!["Full file created".to_string()]
            },
            is_minimal: false,
            change_percentage: 100.0,
            stats: DiffStats::default(),
        };
    }

    let original_lines: Vec<&str> = original.lines().filter(|l| !l.trim().is_empty()).collect();
    let updated_lines: Vec<&str> = updated.lines().filter(|l| !l.trim().is_empty()).collect();
    let original_set: HashSet<&str> = original_lines.iter().copied().collect();
    let updated_set: HashSet<&str> = updated_lines.iter().copied().collect();

    let added: Vec<&str> = updated_lines.iter().copied().filter(|l| !original_set.contains(l)).collect();
    let removed: Vec<&str> = original_lines.iter().copied().filter(|l| !updated_set.contains(l)).collect();
    let unchanged = updated_lines.len() - added.len();

    let total = original_lines.len().max(updated_lines.len());
    let change_percentage = if total > 0 {
        (added.len() + removed.len()) as f64 * 100.0 / total as f64
    } else {
        0.0
    };

    YamlDiff {
        changes: added
            .iter()
            .map(|l| format!("+ {}", l))
            .chain(removed.iter().map(|l| format!("- {}", l)))
            .collect(),
        is_minimal: change_percentage < MINIMAL_CHANGE_PERCENT,
        change_percentage,
        stats: DiffStats {
            total,
            unchanged,
            added: added.len(),
            removed: removed.len(),
        },
    }
}

/// Verdict on how much a regenerated plan changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeReport {
    pub is_valid: bool,
    pub limit: f64,
    pub diff: YamlDiff,
    pub recommendation: String,
}

/// Check the change size against the limit for this kind of edit
pub fn validate_minimal_changes(original: &str, updated: &str, prompt: Option<&str>) -> ChangeReport {
    let diff = calculate_yaml_diff(original, updated);
    let prompted = prompt.is_some_and(|p| !p.trim().is_empty());
    let limit = if prompted { PROMPTED_CHANGE_LIMIT } else { DEFAULT_CHANGE_LIMIT };
    let pct = diff.change_percentage;

    let recommendation = if pct > limit {
        format!("Large change detected: {:.1}% modified. Consider more targeted edits.", pct)
    } else {
        format!("Minimal changes: {:.1}% modified.", pct)
    };

    ChangeReport {
        is_valid: pct <= limit,
        limit,
        diff,
        recommendation,
    }
}

/// Byte range of the top-level `meta:` block, up to the next top-level key
fn meta_block(text: &str) -> Option<std::ops::Range<usize>> {
    let mut offset = 0;
    let mut start = None;
    for line in text.split_inclusive('\n') {
        match start {
            None if line.starts_with("meta:") => start = Some(offset),
            Some(s) if TOP_LEVEL_KEY.is_match(line) => return Some(s..offset),
            _ => {}
        }
        offset += line.len();
    }
    start.map(|s| s..text.len())
}

/// Carry the original `meta:` block into `updated` unless it sets its own `baseUrl:`
pub fn preserve_meta(original: &str, updated: &str) -> String {
    if updated.contains("baseUrl:") {
        return updated.to_string();
    }
    let Some(original_range) = meta_block(original) else {
        return updated.to_string();
    };
    let mut meta = original[original_range].to_string();
    if !meta.ends_with('\n') {
        meta.push('\n');
    }

    match meta_block(updated) {
        Some(range) => format!("{}{}{}", &updated[..range.start], meta, &updated[range.end..]),
        None => format!("{}{}", meta, updated),
    }
}

/// Everything the guard observed about a regenerated plan
#[derive(Debug, Clone)]
pub struct GuardOutcome {
    /// Text to persist
    pub content: String,
    /// Where the previous plan was saved, if there was one
    pub backup: Option<PathBuf>,
    pub structure: StructureReport,
    pub changes: ChangeReport,
}

/// Back up the current plan, check the regenerated one, and decide what to write.
///
/// The returned content is `updated`, with the original `meta:` block restored
/// when the structure check fails.
pub fn guard_regenerated_plan(
    path: &Path,
    original: &str,
    updated: &str,
    prompt: Option<&str>,
) -> std::io::Result<GuardOutcome> {
    let backup = if original.trim().is_empty() {
        None
    } else {
        let backup = create_backup(path, original)?;
        info!("Backed up plan to {}", backup.display());
        Some(backup)
    };

    let structure = validate_yaml_structure(updated);
    let content = if structure.is_valid && structure.has_required_sections {
        updated.to_string()
    } else {
        warn!(
            "Regenerated plan has structural issues (invalid keys: {:?}, required sections: {})",
            structure.invalid_keys, structure.has_required_sections
        );
        preserve_meta(original, updated)
    };

    let changes = validate_minimal_changes(original, &content, prompt);
    if changes.is_valid {
        info!("{}", changes.recommendation);
    } else {
        warn!("{}", changes.recommendation);
    }

    Ok(GuardOutcome {
        content,
        backup,
        structure,
        changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn denylisted_keys_are_found_once() {
        let text = "meta:\n  baseUrl: x\nscenarios:\n  - name: A\n    tests:\n      - selector: '#a'\n      - selector: '#b'\n      - type: assert_visible\n";
        let report = validate_yaml_structure(text);
        assert!(!report.is_valid);
        assert_eq!(report.invalid_keys, vec!["selector".to_string()]);
        assert!(report.has_required_sections);
        assert_eq!(report.line_count, 8);
    }

    #[test]
    fn values_do_not_count_as_keys() {
        let report = validate_yaml_structure("meta: {}\nscenarios:\n  - name: actions\n    tests:\n      - see: selector\n");
        assert!(report.is_valid);
    }

    #[test]
    fn both_sections_required() {
        assert!(!validate_yaml_structure("scenarios: []\n").has_required_sections);
        assert!(!validate_yaml_structure("meta:\n  baseUrl: x\n").has_required_sections);
    }

    #[test]
    fn backup_name_has_timestamp() {
        let path = backup_path(Path::new("/proj/vibe.yaml"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("vibe.backup."));
        assert!(name.ends_with("Z.yaml"));
        assert!(!name.contains(':'));
        assert_eq!(path.parent(), Some(Path::new("/proj")));
    }

    #[test]
    fn empty_original_is_a_full_rewrite() {
        let diff = calculate_yaml_diff("  \n", "a: 1\n");
        assert_eq!(diff.change_percentage, 100.0);
        assert!(!diff.is_minimal);
        assert_eq!(diff.changes, vec!["Full file created".to_string()]);
    }

    #[test]
    fn diff_counts_lines() {
        let diff = calculate_yaml_diff("a\nb\nc\nd\n", "a\nb\nc\ne\n");
        assert_eq!(diff.stats, DiffStats { total: 4, unchanged: 3, added: 1, removed: 1 });
        assert_eq!(diff.change_percentage, 50.0);
        assert!(!diff.is_minimal);
    }

    #[test]
    fn forty_percent_depends_on_prompt() {
        let original = "a\nb\nc\nd\ne\nf\ng\nh\ni\nj\n";
        let updated = "a\nb\nc\nd\ne\nf\ng\nh\nx\ny\n";
        let report = validate_minimal_changes(original, updated, None);
        assert_eq!(report.diff.change_percentage, 40.0);
        assert!(!report.is_valid);
        assert!(validate_minimal_changes(original, updated, Some("add a login test")).is_valid);
        assert!(!validate_minimal_changes(original, updated, Some("   ")).is_valid);
    }

    #[test]
    fn meta_is_restored_without_base_url() {
        let original = "meta:\n  baseUrl: http://localhost:4000\nscenarios: []\n";
        let updated = "meta:\n  title: x\nscenarios:\n  - name: A\n";
        assert_eq!(
            preserve_meta(original, updated),
            "meta:\n  baseUrl: http://localhost:4000\nscenarios:\n  - name: A\n"
        );
    }

    #[test]
    fn meta_is_inserted_when_missing() {
        let original = "meta:\n  baseUrl: http://localhost:4000\nscenarios: []\n";
        assert_eq!(
            preserve_meta(original, "scenarios: []\n"),
            "meta:\n  baseUrl: http://localhost:4000\nscenarios: []\n"
        );
    }

    #[test]
    fn updated_base_url_wins() {
        let original = "meta:\n  baseUrl: http://a\nscenarios: []\n";
        let updated = "meta:\n  baseUrl: http://b\nscenarios: []\n";
        assert_eq!(preserve_meta(original, updated), updated);
    }
}
