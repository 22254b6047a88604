//! Session management for repair-loop artifacts.
//!
//! Provides centralized management of loop sessions with:
//! - Unique session directories under a global base location
//! - One JSON report per iteration
//! - Automatic cleanup unless explicitly preserved
//! - Session metadata tracking

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config;
use crate::engine::ExecutionResult;

/// What happened in one repair iteration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    /// 1-based iteration number
    pub iteration: u32,
    /// Build passed in this iteration
    pub build_passed: bool,
    /// File the build log pointed at, if the build failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_file: Option<String>,
    /// Test result, if tests ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    /// Files written by the oracle's fix
    #[serde(default)]
    pub patched: Vec<String>,
    /// Non-fatal problem in this iteration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A loop session with organized file management
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    /// Root directory for this session
    pub dir: PathBuf,
    /// Whether to keep files after session ends
    pub keep: bool,
    /// Project the session is about
    pub project_dir: Option<PathBuf>,
}

impl Session {
    /// Create a new session with a unique ID under the configured base directory
    pub fn new() -> Self {
        Self::in_base(config::session_base_dir(), &generate_session_id())
    }

    /// Create a session with a specific name/prefix
    pub fn with_name(name: &str) -> Self {
        let id = format!("{}_{}", sanitize_name(name), generate_timestamp_suffix());
        Self::in_base(config::session_base_dir(), &id)
    }

    /// Create a session named `id` under `base`
    pub fn in_base(base: impl AsRef<Path>, id: &str) -> Self {
        Self {
            id: id.to_string(),
            dir: base.as_ref().join(id),
            keep: false,
            project_dir: None,
        }
    }

    /// Create a session in a specific directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(generate_session_id);

        Self {
            id,
            dir,
            keep: true, // User-specified directories are kept by default
            project_dir: None,
        }
    }

    /// Set whether to keep files after session ends
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Record which project this session belongs to
    pub fn with_project(mut self, project_dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(project_dir.into());
        self
    }

    /// Initialize the session directory
    pub fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
            "host": host,
            "project": self.project_dir,
        });

        let metadata_path = self.dir.join(".session.json");
        fs::write(metadata_path, serde_json::to_string_pretty(&metadata)?)?;

        Ok(())
    }

    /// Path of the report for an iteration
    pub fn iteration_path(&self, iteration: u32) -> PathBuf {
        self.dir.join(format!("iteration_{}.json", iteration))
    }

    /// Write the report for one iteration
    pub fn record_iteration(&self, record: &IterationRecord) -> std::io::Result<PathBuf> {
        let path = self.iteration_path(record.iteration);
        fs::write(&path, serde_json::to_string_pretty(record)?)?;
        Ok(path)
    }

    /// Read back every iteration report, in iteration order
    pub fn list_iterations(&self) -> std::io::Result<Vec<IterationRecord>> {
        let mut records = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                let is_report = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("iteration_") && n.ends_with(".json"));
                if is_report {
                    let record: IterationRecord = serde_json::from_str(&fs::read_to_string(&path)?)?;
                    records.push(record);
                }
            }
        }
        records.sort_by_key(|r| r.iteration);
        Ok(records)
    }

    /// Clean up the session directory
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.dir.exists() && !self.keep {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

/// Generate a unique session ID
fn generate_session_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let pid = std::process::id();
    format!("session_{}_{}", timestamp, pid)
}

/// Generate a timestamp suffix
fn generate_timestamp_suffix() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Sanitize a name for use in filenames
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Clean up sessions under `base` older than `max_age`
pub fn cleanup_old_sessions(base: &Path, max_age: std::time::Duration) -> std::io::Result<usize> {
    if !base.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(base)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > max_age) && fs::remove_dir_all(&path).is_ok() {
            cleaned += 1;
        }
    }

    Ok(cleaned)
}

/// List all existing sessions under `base`
pub fn list_sessions(base: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for entry in fs::read_dir(base)? {
        let path = entry?.path();
        if path.is_dir() {
            sessions.push(path);
        }
    }
    sessions.sort();
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_session_in_base() {
        let session = Session::in_base("/tmp/base", "loop_1");
        assert_eq!(session.dir, PathBuf::from("/tmp/base/loop_1"));
        assert!(!session.keep);
    }

    #[test]
    fn test_session_with_name() {
        let session = Session::with_name("my loop").keep(true);
        assert!(session.id.starts_with("my_loop_"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("hello world"), "hello_world");
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
    }

    #[test]
    fn test_iteration_reports_round_trip() {
        let base = TempDir::new().unwrap();
        let session = Session::in_base(base.path(), "s").with_project("/proj");
        session.init().unwrap();
        assert!(session.dir.join(".session.json").exists());

        for iteration in [2, 1] {
            session
                .record_iteration(&IterationRecord {
                    iteration,
                    build_passed: iteration == 2,
                    ..Default::default()
                })
                .unwrap();
        }
        let records = session.list_iterations().unwrap();
        assert_eq!(records.iter().map(|r| r.iteration).collect::<Vec<_>>(), vec![1, 2]);
        assert!(session.iteration_path(1).ends_with("iteration_1.json"));
    }

    #[tokio::test]
    async fn test_reports_with_unrecognized_steps_read_back() {
        use crate::engine::{self, EngineOptions, ServerOptions};
        use crate::page::{MockElement, MockPage};
        use crate::plan::TestPlan;

        let plan = TestPlan::from_yaml("scenarios:\n  - name: A\n    tests:\n      - see: Hi\n      - hover: Menu\n").unwrap();
        let mut page = MockPage::new().with_element(MockElement::text("Hi"));
        let options = EngineOptions::default().server(ServerOptions::new(".").command(None));
        let result = engine::run(&mut page, &plan, &options).await;
        assert_eq!(result.failures.len(), 1);

        let base = TempDir::new().unwrap();
        let session = Session::in_base(base.path(), "unknown");
        session.init().unwrap();
        session
            .record_iteration(&IterationRecord {
                iteration: 1,
                build_passed: true,
                result: Some(result.clone()),
                ..Default::default()
            })
            .unwrap();

        let records = session.list_iterations().unwrap();
        assert_eq!(records[0].result.as_ref(), Some(&result));
    }

    #[test]
    fn test_drop_removes_unless_kept() {
        let base = TempDir::new().unwrap();
        let dir = {
            let session = Session::in_base(base.path(), "gone");
            session.init().unwrap();
            session.dir.clone()
        };
        assert!(!dir.exists());

        let kept = {
            let session = Session::in_base(base.path(), "kept").keep(true);
            session.init().unwrap();
            session.dir.clone()
        };
        assert!(kept.exists());
        assert_eq!(list_sessions(base.path()).unwrap(), vec![kept]);
    }
}
