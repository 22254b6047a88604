//! Bounded build-test-repair loop.
//!
//! Each iteration builds the project. A failing build gets a single-file fix
//! for the file its log points at; a passing build runs the plan, and failing
//! tests get a multi-file patch. The loop ends when the plan passes, when the
//! iteration bound is exceeded, or on a fatal error.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::build::{BuildOutcome, BuildRunner, extract_error_file};
use crate::config::Config;
use crate::engine::{self, EngineOptions, ExecutionResult};
use crate::guardrail::{GuardOutcome, guard_regenerated_plan};
use crate::oracle::{BuildRepairContext, Oracle, OracleError, PlanContext, TestRepairContext};
use crate::page::Page;
use crate::patch::{self, PatchError};
use crate::project;
use crate::session::{IterationRecord, Session};

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("The file {0} does not exist")]
    BrokenFileMissing(String),

    #[error("Could not run the build: {0}")]
    BuildSpawn(#[source] std::io::Error),

    #[error("Oracle request failed: {0}")]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Iteration counter. Only [`RepairState::advance`] changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairState {
    iteration: u32,
    max_iterations: u32,
}

impl RepairState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            iteration: 1,
            max_iterations,
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn exhausted(&self) -> bool {
        self.iteration > self.max_iterations
    }

    pub fn advance(&mut self) {
        self.iteration += 1;
    }
}

/// How a loop run ended
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// The plan passed in this iteration
    Passed { iteration: u32, result: ExecutionResult },
    /// The bound was reached without a passing run
    Exhausted {
        max_iterations: u32,
        last: Option<ExecutionResult>,
    },
    /// A fatal error stopped the loop
    Aborted { iteration: u32, reason: String },
}

impl LoopOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoopOutcome::Passed { .. })
    }
}

impl fmt::Display for LoopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopOutcome::Passed { iteration, result } => write!(
                f,
                "All tests passed in iteration {} ({}/{})",
                iteration, result.passed_tests, result.total_tests
            ),
            LoopOutcome::Exhausted { max_iterations, .. } => {
                write!(f, "Max iterations ({}) reached without a passing run", max_iterations)
            }
            LoopOutcome::Aborted { iteration, reason } => {
                write!(f, "Aborted in iteration {}: {}", iteration, reason)
            }
        }
    }
}

/// Project layout and limits for a loop run
#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub project_dir: PathBuf,
    /// Plan file, relative to the project
    pub plan_file: PathBuf,
    /// Patched when the build log names no file
    pub entry_file: String,
    /// Dependency manifest, relative to the project
    pub manifest_file: String,
    pub max_iterations: u32,
    /// User instruction; triggers plan regeneration in the first iteration
    pub instruction: Option<String>,
    pub engine: EngineOptions,
}

impl RepairOptions {
    pub fn from_config(config: &Config, project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        Self {
            engine: EngineOptions::from_config(config, project_dir.clone()),
            plan_file: PathBuf::from(&config.project.plan_file),
            entry_file: config.project.entry_file.clone(),
            manifest_file: config.project.manifest_file.clone(),
            max_iterations: config.project.max_iterations,
            instruction: None,
            project_dir,
        }
    }

    pub fn instruction(mut self, instruction: Option<String>) -> Self {
        self.instruction = instruction.filter(|i| !i.trim().is_empty());
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn engine(mut self, engine: EngineOptions) -> Self {
        self.engine = engine;
        self
    }

    pub fn plan_path(&self) -> PathBuf {
        self.project_dir.join(&self.plan_file)
    }

    fn manifest(&self) -> String {
        project::read_or_empty(&self.project_dir.join(&self.manifest_file))
    }
}

/// Ask the oracle for a new plan, guard it, and write it to the plan path
pub async fn generate_plan(
    options: &RepairOptions,
    oracle: &dyn Oracle,
    instruction: Option<&str>,
) -> Result<GuardOutcome, LoopError> {
    let plan_path = options.plan_path();
    let current = if plan_path.exists() {
        std::fs::read_to_string(&plan_path)?
    } else {
        String::new()
    };

    info!("Generating test plan");
    let context = PlanContext {
        file_tree: project::file_tree(&options.project_dir),
        source_context: project::source_context(&options.project_dir),
        current_plan: current.clone(),
        instruction: instruction.map(String::from),
    };
    let generated = patch::strip_code_fences(&oracle.generate_plan(&context).await?);

    let outcome = guard_regenerated_plan(&plan_path, &current, &generated, instruction)?;
    std::fs::write(&plan_path, &outcome.content)?;
    info!("Wrote {}", plan_path.display());
    Ok(outcome)
}

/// Single-file fix for a failed build. Returns the project-relative file written.
pub async fn repair_build(options: &RepairOptions, oracle: &dyn Oracle, logs: &str) -> Result<String, LoopError> {
    let file = match extract_error_file(logs) {
        Some(file) => {
            info!("Targeted broken file: {}", file);
            file
        }
        None => {
            warn!("Could not find a file in the build log, defaulting to {}", options.entry_file);
            options.entry_file.clone()
        }
    };

    let file = file.strip_prefix("./").map(String::from).unwrap_or(file);
    let path = patch::resolve_in_root(&options.project_dir, &file)?;
    if !path.exists() {
        return Err(LoopError::BrokenFileMissing(file));
    }

    let context = BuildRepairContext {
        logs: logs.to_string(),
        source: std::fs::read_to_string(&path)?,
        manifest: options.manifest(),
    };
    let code = patch::strip_code_fences(&oracle.repair_file(&context).await?);
    if !code.contains("import") && !code.contains("export") {
        warn!("The fixed {} looks suspicious (no imports or exports)", file);
    }
    std::fs::write(&path, code)?;
    info!("Applied fix to {}", file);
    Ok(file)
}

/// Multi-file fix after failing tests. Returns the files written.
pub async fn repair_tests(
    options: &RepairOptions,
    oracle: &dyn Oracle,
    result: &ExecutionResult,
) -> Result<Vec<PathBuf>, LoopError> {
    let context = TestRepairContext {
        failures: result.failure_summary(),
        plan: project::read_or_empty(&options.plan_path()),
        source_context: project::source_context(&options.project_dir),
        file_tree: project::file_tree(&options.project_dir),
        manifest: options.manifest(),
        instruction: options.instruction.clone(),
    };
    let reply = oracle.repair_files(&context).await?;

    match patch::parse_patch(&reply) {
        Some(updates) if !updates.is_empty() => Ok(patch::apply_patch(&options.project_dir, &updates)?),
        _ => {
            warn!("Oracle reply contained no file blocks; continuing unpatched");
            Ok(Vec::new())
        }
    }
}

/// The loop controller
pub struct RepairLoop {
    options: RepairOptions,
    session: Option<Session>,
}

impl RepairLoop {
    pub fn new(options: RepairOptions) -> Self {
        Self {
            options,
            session: None,
        }
    }

    /// Write one report per iteration into `session`
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn options(&self) -> &RepairOptions {
        &self.options
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub async fn run(&mut self, page: &mut dyn Page, oracle: &dyn Oracle, builder: &dyn BuildRunner) -> LoopOutcome {
        let mut state = RepairState::new(self.options.max_iterations);
        let mut last: Option<ExecutionResult> = None;
        let plan_path = self.options.plan_path();

        loop {
            if state.exhausted() {
                warn!("Max iterations ({}) reached", state.max_iterations());
                return LoopOutcome::Exhausted {
                    max_iterations: state.max_iterations(),
                    last,
                };
            }
            let iteration = state.iteration();
            info!("Iteration {}/{}", iteration, state.max_iterations());
            let mut record = IterationRecord {
                iteration,
                ..Default::default()
            };

            if iteration == 1 {
                if let Some(instruction) = self.options.instruction.clone() {
                    match generate_plan(&self.options, oracle, Some(&instruction)).await {
                        Ok(_) => {}
                        Err(LoopError::Oracle(e)) => {
                            warn!("Plan generation failed: {}", e);
                            record.note = Some(format!("Plan generation failed: {}", e));
                        }
                        Err(e) => return self.abort(iteration, e, record),
                    }
                }
            }

            let outcome = match builder.build().await {
                Ok(outcome) => outcome,
                Err(e) => return self.abort(iteration, LoopError::BuildSpawn(e), record),
            };

            if let BuildOutcome::Failed { .. } = &outcome {
                warn!("Build failed");
                let logs = outcome.logs();
                record.broken_file = extract_error_file(&logs);
                match repair_build(&self.options, oracle, &logs).await {
                    Ok(file) => record.patched.push(file),
                    Err(LoopError::Oracle(e)) => {
                        warn!("Build fix failed: {}", e);
                        record.note = Some(e.to_string());
                    }
                    Err(e) => return self.abort(iteration, e, record),
                }
                self.record(&record);
                state.advance();
                continue;
            }
            record.build_passed = true;
            info!("Build passed");

            let result = engine::run_plan_file(page, &plan_path, &self.options.engine).await;
            record.result = Some(result.clone());
            if result.success {
                self.record(&record);
                return LoopOutcome::Passed { iteration, result };
            }

            match repair_tests(&self.options, oracle, &result).await {
                Ok(written) => {
                    record.patched = written
                        .iter()
                        .map(|p| relative_display(&self.options.project_dir, p))
                        .collect();
                    if written.is_empty() {
                        record.note = Some("No file updates in oracle reply".to_string());
                    }
                }
                Err(LoopError::Oracle(e)) => {
                    warn!("Test fix failed: {}", e);
                    record.note = Some(e.to_string());
                }
                Err(e) => return self.abort(iteration, e, record),
            }

            self.record(&record);
            last = Some(result);
            state.advance();
        }
    }

    fn abort(&self, iteration: u32, error: LoopError, mut record: IterationRecord) -> LoopOutcome {
        warn!("{}", error);
        record.note = Some(error.to_string());
        self.record(&record);
        LoopOutcome::Aborted {
            iteration,
            reason: error.to_string(),
        }
    }

    fn record(&self, record: &IterationRecord) {
        if let Some(session) = &self.session {
            if let Err(e) = session.record_iteration(record) {
                warn!("Could not write iteration report: {}", e);
            }
        }
    }
}

/// Project-relative display of a path under `root`
pub fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}
