//! Build step contract and broken-file extraction from build logs.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// ANSI escape sequences (colors, cursor movement) emitted by build tools
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x1b\x{9b}][\[()#;?]*(?:[0-9]{1,4}(?:;[0-9]{0,4})*)?[0-9A-ORZcf-nqry=><]")
        .expect("static regex")
});

static ERROR_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\./(?:app|src|components|pages|lib)/[a-zA-Z0-9_\-/]+\.(tsx|ts|jsx|js))")
        .expect("static regex")
});

/// Outcome of one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Success,
    Failed { stdout: String, stderr: String },
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Success)
    }

    /// Combined log text (`stdout + "\n" + stderr`); empty on success
    pub fn logs(&self) -> String {
        match self {
            BuildOutcome::Success => String::new(),
            BuildOutcome::Failed { stdout, stderr } => format!("{}\n{}", stdout, stderr),
        }
    }
}

/// Something that can build the project
#[async_trait]
pub trait BuildRunner: Send + Sync {
    /// Run one build. `Err` means the build tool could not be started at all.
    async fn build(&self) -> std::io::Result<BuildOutcome>;
}

/// Runs a shell command (e.g. `npm run build`) in the project directory
#[derive(Debug, Clone)]
pub struct CommandBuild {
    command: String,
    working_dir: PathBuf,
}

impl CommandBuild {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl BuildRunner for CommandBuild {
    async fn build(&self) -> std::io::Result<BuildOutcome> {
        info!("Running `{}`", self.command);
        let output = Command::from(shell(&self.command))
            .current_dir(&self.working_dir)
            .output()
            .await?;
        debug!("build exited with {}", output.status);

        if output.status.success() {
            Ok(BuildOutcome::Success)
        } else {
            Ok(BuildOutcome::Failed {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// `sh -c <command>` (or `cmd /C` on Windows), shared by the build and the dev server
#[cfg(unix)]
pub(crate) fn shell(command: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
pub(crate) fn shell(command: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Remove ANSI escape sequences
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// First project source path mentioned in build logs, e.g. `./app/page.tsx`
pub fn extract_error_file(logs: &str) -> Option<String> {
    let clean = strip_ansi(logs);
    ERROR_FILE
        .captures(&clean)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
