use clap::{Parser, Subcommand};
use crossterm::style::Stylize;
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use botintern::build::{BuildOutcome, BuildRunner, CommandBuild, extract_error_file};
use botintern::config;
use botintern::engine::{self, ExecutionResult};
use botintern::guardrail::validate_yaml_structure;
use botintern::oracle::{HttpOracle, OracleConfig, check_health};
use botintern::page::{Page, PlaywrightConfig, PlaywrightPage};
use botintern::plan::{CanonicalAction, TestPlan, normalize};
use botintern::repair::{self, LoopOutcome, RepairLoop, RepairOptions};
use botintern::session::Session;

/// BotIntern - declarative UI checks with an AI repair loop
#[derive(Parser, Debug)]
#[command(
    name = "botintern",
    about = "Run YAML-declared UI checks against a web project and repair it with an AI model",
    after_help = "ENVIRONMENT VARIABLES:\n\
        BOTINTERN_ORACLE_ENDPOINT  Chat completions endpoint URL\n\
        BOTINTERN_ORACLE_MODEL     Model name\n\
        BOTINTERN_API_KEY          Bearer token for the endpoint\n\
        BOTINTERN_PLAN_FILE        Plan file name (default vibe.yaml)\n\
        BOTINTERN_BUILD_COMMAND    Build command (default npm run build)\n\
        BOTINTERN_DEV_COMMAND      Dev server command (default npm run dev)\n\
        BOTINTERN_SESSION_DIR      Base directory for loop sessions\n\
        RUST_LOG                   Log filter (default botintern=info)"
)]
struct Args {
    /// Project directory
    #[arg(short, long, global = true, default_value = ".")]
    dir: PathBuf,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Show the browser window
    #[arg(long, global = true)]
    headed: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the test plan once
    Test,

    /// Build, test and repair until the plan passes or the bound is reached
    Loop {
        /// Instruction for the first plan regeneration
        prompt: Option<String>,

        /// Maximum repair iterations
        #[arg(short, long, env = "BOTINTERN_MAX_ITERATIONS")]
        max_iterations: Option<u32>,

        /// Keep per-iteration reports after completion
        #[arg(long, short = 'k')]
        keep: bool,
    },

    /// Generate or update the test plan from the project sources
    GeneratePlan {
        /// What the plan should cover or change
        prompt: Option<String>,
    },

    /// Build once and apply a single-file fix if the build fails
    Fix,

    /// Build once and report the broken file, if any
    Scan,

    /// Parse the plan and print its normalized steps
    CheckPlan,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("botintern=info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = config::get();
    let project_dir = args.dir.clone();

    match args.command {
        Some(Commands::Test) => {
            let options = engine::EngineOptions::from_config(cfg, &project_dir);
            let plan_path = project_dir.join(&cfg.project.plan_file);

            let mut page = PlaywrightPage::launch(playwright_config(&project_dir, args.headed)).await?;
            let result = engine::run_plan_file(&mut page, &plan_path, &options).await;
            if let Err(e) = page.close().await {
                tracing::warn!("Browser did not close cleanly: {}", e);
            }

            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            if !result.success {
                std::process::exit(1);
            }
        }

        Some(Commands::Loop {
            prompt,
            max_iterations,
            keep,
        }) => {
            warn_if_oracle_down();

            let mut options = RepairOptions::from_config(cfg, &project_dir).instruction(prompt);
            if let Some(max) = max_iterations {
                options = options.max_iterations(max);
            }

            let session = Session::with_name("loop").keep(keep).with_project(&project_dir);
            session.init()?;

            let oracle = HttpOracle::new(OracleConfig::default());
            let builder = CommandBuild::new(&cfg.project.build_command, &project_dir);
            let mut page = PlaywrightPage::launch(playwright_config(&project_dir, args.headed)).await?;

            let mut repair_loop = RepairLoop::new(options).with_session(session);
            let outcome = repair_loop.run(&mut page, &oracle, &builder).await;
            if let Err(e) = page.close().await {
                tracing::warn!("Browser did not close cleanly: {}", e);
            }

            if args.json {
                let iterations = match repair_loop.session() {
                    Some(session) => session.list_iterations()?,
                    None => Vec::new(),
                };
                println!("{}", serde_json::to_string_pretty(&iterations)?);
            } else {
                print_outcome(&outcome);
                if keep {
                    if let Some(session) = repair_loop.session() {
                        println!("\nSession: {}", session.dir.display());
                    }
                }
            }
            // exit() skips destructors, so release the session first
            drop(repair_loop);
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }

        Some(Commands::GeneratePlan { prompt }) => {
            warn_if_oracle_down();
            let options = RepairOptions::from_config(cfg, &project_dir);
            let oracle = HttpOracle::new(OracleConfig::default());

            let outcome = repair::generate_plan(&options, &oracle, prompt.as_deref()).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome.changes)?);
            } else {
                println!("{} {}", "Wrote".green(), options.plan_path().display());
                if let Some(backup) = &outcome.backup {
                    println!("  Backup: {}", backup.display());
                }
                println!(
                    "  Changes: +{} -{} ({:.1}% of lines, limit {}%)",
                    outcome.changes.diff.stats.added,
                    outcome.changes.diff.stats.removed,
                    outcome.changes.diff.change_percentage,
                    outcome.changes.limit
                );
                if !outcome.changes.is_valid {
                    println!("  {}", outcome.changes.recommendation.as_str().yellow());
                }
            }
        }

        Some(Commands::Fix) => {
            let builder = CommandBuild::new(&cfg.project.build_command, &project_dir);
            match builder.build().await? {
                BuildOutcome::Success => println!("{}", "Build passed, nothing to fix".green()),
                failed => {
                    warn_if_oracle_down();
                    let options = RepairOptions::from_config(cfg, &project_dir);
                    let oracle = HttpOracle::new(OracleConfig::default());
                    let file = repair::repair_build(&options, &oracle, &failed.logs()).await?;
                    println!("{} {}", "Fixed".green(), file);
                }
            }
        }

        Some(Commands::Scan) => {
            let builder = CommandBuild::new(&cfg.project.build_command, &project_dir);
            let outcome = builder.build().await?;
            let broken = extract_error_file(&outcome.logs());
            if args.json {
                let report = serde_json::json!({
                    "buildPassed": outcome.is_success(),
                    "brokenFile": broken,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if outcome.is_success() {
                println!("{}", "Build passed".green());
            } else {
                println!("{}", "Build failed".red().bold());
                match broken {
                    Some(file) => println!("  Broken file: {}", file),
                    None => println!("  No source file named in the build log"),
                }
            }
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }

        Some(Commands::CheckPlan) => {
            let plan_path = project_dir.join(&cfg.project.plan_file);
            let text = std::fs::read_to_string(&plan_path)
                .map_err(|e| format!("Could not read {}: {}", plan_path.display(), e))?;
            let structure = validate_yaml_structure(&text);
            let plan = TestPlan::from_yaml(&text)?;
            let steps: Vec<(String, Vec<CanonicalAction>)> = plan
                .scenarios
                .iter()
                .map(|s| (s.name.clone(), s.tests.iter().map(normalize).collect()))
                .collect();

            if args.json {
                let mut scenarios = Vec::with_capacity(steps.len());
                for (name, actions) in &steps {
                    scenarios.push(serde_json::json!({
                        "name": name,
                        "steps": serde_json::to_value(actions)?,
                    }));
                }
                let report = serde_json::json!({
                    "baseUrl": plan.base_url(),
                    "structure": serde_json::to_value(&structure)?,
                    "scenarios": scenarios,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Plan: {} ({} lines)", plan_path.display(), structure.line_count);
                println!("Base URL: {}", plan.base_url());
                if !structure.invalid_keys.is_empty() {
                    println!("  {} {}", "Legacy keys:".yellow(), structure.invalid_keys.join(", "));
                }
                for (name, actions) in &steps {
                    println!("\n{}", name.as_str().bold());
                    for action in actions {
                        let line = format!("  {}", action.describe());
                        match action {
                            CanonicalAction::Unknown { .. } => println!("{}", line.red()),
                            _ => println!("{}", line),
                        }
                    }
                }
            }
        }

        None => {
            println!("BotIntern - declarative UI checks with an AI repair loop");
            println!();
            println!("Usage: botintern [--dir <DIR>] <COMMAND>");
            println!();
            println!("Commands:");
            println!("  test           Run the test plan once");
            println!("  loop           Build, test and repair until the plan passes");
            println!("  generate-plan  Generate or update the test plan");
            println!("  fix            Apply a single-file fix for a failing build");
            println!("  scan           Build once and report the broken file");
            println!("  check-plan     Print the plan's normalized steps");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

fn playwright_config(project_dir: &Path, headed: bool) -> PlaywrightConfig {
    PlaywrightConfig::new(project_dir).headless(!headed)
}

fn warn_if_oracle_down() {
    let cfg = config::get();
    match check_health(&cfg.oracle.endpoint, cfg.oracle.connect_timeout) {
        Ok(true) => {}
        Ok(false) | Err(_) => {
            eprintln!(
                "{} oracle endpoint not responding at {}",
                "Warning:".yellow(),
                cfg.oracle.endpoint
            );
        }
    }
}

fn print_result(result: &ExecutionResult) {
    if result.success {
        println!(
            "{} {}/{} checks passed",
            "PASS".green().bold(),
            result.passed_tests,
            result.total_tests
        );
        return;
    }

    println!(
        "{} {}/{} checks passed",
        "FAIL".red().bold(),
        result.passed_tests,
        result.total_tests
    );
    if let Some(error) = &result.error {
        println!("  {}", error.as_str().red());
    }
    for failure in &result.failures {
        println!(
            "  [{}] {}: {}",
            failure.scenario,
            failure.action.describe(),
            failure.error
        );
    }
}

fn print_outcome(outcome: &LoopOutcome) {
    match outcome {
        LoopOutcome::Passed { result, .. } => {
            println!("{}", outcome.to_string().green().bold());
            print_result(result);
        }
        LoopOutcome::Exhausted { last, .. } => {
            println!("{}", outcome.to_string().red().bold());
            if let Some(result) = last {
                print_result(result);
            }
        }
        LoopOutcome::Aborted { .. } => println!("{}", outcome.to_string().red().bold()),
    }
}
