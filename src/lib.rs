//! BotIntern - declarative browser UI verification with a bounded AI repair loop.
//!
//! This crate provides:
//! - A YAML test plan DSL normalized into a closed set of actions
//! - An execution engine that drives a [`Page`] and reports pass/fail per step
//! - Dev server autostart and network expectations joined with their triggers
//! - A bounded build/test/repair loop driven by an [`Oracle`]
//! - Guardrails for oracle-regenerated plans and path-safe multi-file patches
//! - Session management for per-iteration reports
//!
//! # Example
//!
//! ```rust,no_run
//! use botintern::engine::{self, EngineOptions};
//! use botintern::page::{PlaywrightConfig, PlaywrightPage};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut page = PlaywrightPage::launch(PlaywrightConfig::new(".")).await?;
//! let options = EngineOptions::from_config(botintern::config::get(), ".");
//! let result = engine::run_plan_file(&mut page, "vibe.yaml".as_ref(), &options).await;
//! println!("{}/{} passed", result.passed_tests, result.total_tests);
//! # Ok(())
//! # }
//! ```

pub mod build;
pub mod config;
pub mod engine;
pub mod guardrail;
pub mod oracle;
pub mod page;
pub mod patch;
pub mod plan;
pub mod project;
pub mod repair;
pub mod session;

// Re-export plan types
pub use plan::{CanonicalAction, RawStep, Scenario, TestPlan, normalize};

// Re-export engine types
pub use engine::{EngineOptions, ExecutionResult, FailedStep, FailureRecord};

// Re-export page seam
pub use page::{MockPage, Page, PageError, PlaywrightConfig, PlaywrightPage};

// Re-export repair loop
pub use build::{BuildOutcome, BuildRunner, CommandBuild};
pub use oracle::{HttpOracle, Oracle, OracleConfig, OracleError};
pub use repair::{LoopOutcome, RepairLoop, RepairOptions, RepairState};

// Re-export session management
pub use session::{IterationRecord, Session, cleanup_old_sessions, list_sessions};
