//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for botintern, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults for a Next.js-style project layout
//! - Builder-style overrides from the CLI
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `BOTINTERN_ORACLE_ENDPOINT` | Chat-completions endpoint URL | Gemini OpenAI-compatible endpoint |
//! | `BOTINTERN_ORACLE_MODEL` | Model name | `gemini-3-flash-preview` |
//! | `BOTINTERN_API_KEY` | Bearer token for the endpoint | none |
//! | `BOTINTERN_ORACLE_MAX_TOKENS` | Maximum tokens in a response | `8192` |
//! | `BOTINTERN_ORACLE_TIMEOUT` | Oracle activity timeout in seconds | `120` |
//! | `BOTINTERN_ORACLE_CONNECT_TIMEOUT` | Oracle connection timeout in seconds | `10` |
//! | `BOTINTERN_PLAN_FILE` | Test plan file name | `vibe.yaml` |
//! | `BOTINTERN_MAX_ITERATIONS` | Repair loop bound | `5` |
//! | `BOTINTERN_BUILD_COMMAND` | Build command | `npm run build` |
//! | `BOTINTERN_DEV_COMMAND` | Dev server command | `npm run dev` |
//! | `BOTINTERN_STEP_TIMEOUT_MS` | Per-step timeout (ms) | `5000` |
//! | `BOTINTERN_SERVER_TIMEOUT` | Dev server startup timeout (s) | `30` |
//! | `BOTINTERN_SESSION_DIR` | Base directory for loop sessions | `/tmp/botintern` |
//!
//! # Example
//!
//! ```bash
//! # Point the oracle at a local model server
//! export BOTINTERN_ORACLE_ENDPOINT="http://localhost:11434/v1/chat/completions"
//! export BOTINTERN_ORACLE_MODEL="qwen2.5-coder"
//!
//! # Give the repair loop more room
//! export BOTINTERN_MAX_ITERATIONS=8
//! ```

use std::env;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default oracle API endpoint
pub const DEFAULT_ORACLE_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";

/// Default oracle model name
pub const DEFAULT_ORACLE_MODEL: &str = "gemini-3-flash-preview";

/// Default max tokens for oracle responses
pub const DEFAULT_ORACLE_MAX_TOKENS: u32 = 8192;

/// Default oracle connection timeout (seconds)
pub const DEFAULT_ORACLE_CONNECT_TIMEOUT: u64 = 10;

/// Default oracle activity timeout (seconds)
pub const DEFAULT_ORACLE_ACTIVITY_TIMEOUT: u64 = 120;

/// Default test plan file name, resolved against the project directory
pub const DEFAULT_PLAN_FILE: &str = "vibe.yaml";

/// Default base URL when a plan has no `meta.baseUrl`
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Default repair loop bound
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Default build command
pub const DEFAULT_BUILD_COMMAND: &str = "npm run build";

/// Default dev server command
pub const DEFAULT_DEV_COMMAND: &str = "npm run dev";

/// Default dev server port when the base URL names none
pub const DEFAULT_DEV_PORT: u16 = 3000;

/// Default file patched when a build log names no file
pub const DEFAULT_ENTRY_FILE: &str = "app/page.tsx";

/// Default dependency manifest handed to the oracle
pub const DEFAULT_MANIFEST_FILE: &str = "package.json";

/// Default per-step timeout (milliseconds)
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 5000;

/// Default reachability timeout for the first navigation (milliseconds)
pub const DEFAULT_REACH_TIMEOUT_MS: u64 = 3000;

/// Default timeout for a pending network expectation (milliseconds)
pub const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 30_000;

/// Default dev server startup timeout (seconds)
pub const DEFAULT_SERVER_TIMEOUT: u64 = 30;

/// Default session base directory
pub const DEFAULT_SESSION_DIR: &str = "/tmp/botintern";

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the oracle endpoint
pub const ENV_ORACLE_ENDPOINT: &str = "BOTINTERN_ORACLE_ENDPOINT";

/// Environment variable for the oracle model
pub const ENV_ORACLE_MODEL: &str = "BOTINTERN_ORACLE_MODEL";

/// Environment variable for the oracle API key
pub const ENV_API_KEY: &str = "BOTINTERN_API_KEY";

/// Environment variable for oracle max tokens
pub const ENV_ORACLE_MAX_TOKENS: &str = "BOTINTERN_ORACLE_MAX_TOKENS";

/// Environment variable for the oracle connection timeout
pub const ENV_ORACLE_CONNECT_TIMEOUT: &str = "BOTINTERN_ORACLE_CONNECT_TIMEOUT";

/// Environment variable for the oracle activity timeout
pub const ENV_ORACLE_ACTIVITY_TIMEOUT: &str = "BOTINTERN_ORACLE_TIMEOUT";

/// Environment variable for the plan file name
pub const ENV_PLAN_FILE: &str = "BOTINTERN_PLAN_FILE";

/// Environment variable for the repair loop bound
pub const ENV_MAX_ITERATIONS: &str = "BOTINTERN_MAX_ITERATIONS";

/// Environment variable for the build command
pub const ENV_BUILD_COMMAND: &str = "BOTINTERN_BUILD_COMMAND";

/// Environment variable for the dev server command
pub const ENV_DEV_COMMAND: &str = "BOTINTERN_DEV_COMMAND";

/// Environment variable for the per-step timeout
pub const ENV_STEP_TIMEOUT_MS: &str = "BOTINTERN_STEP_TIMEOUT_MS";

/// Environment variable for the server startup timeout
pub const ENV_SERVER_TIMEOUT: &str = "BOTINTERN_SERVER_TIMEOUT";

/// Environment variable for the session directory
pub const ENV_SESSION_DIR: &str = "BOTINTERN_SESSION_DIR";

// ============================================================================
// Legacy Environment Variable Support
// ============================================================================

/// Older name for the API key variable, consulted when `BOTINTERN_API_KEY` is unset or blank
pub const ENV_API_KEY_LEGACY: &str = "API_KEY";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for botintern
#[derive(Debug, Clone)]
pub struct Config {
    /// Oracle configuration
    pub oracle: OracleSettings,
    /// Project layout and command configuration
    pub project: ProjectSettings,
    /// Execution engine timing
    pub engine: EngineSettings,
    /// Session configuration
    pub session: SessionSettings,
}

/// Oracle-related settings
#[derive(Debug, Clone)]
pub struct OracleSettings {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Bearer token, if the endpoint needs one
    pub api_key: Option<String>,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Activity timeout during streaming (seconds)
    pub activity_timeout: u64,
}

/// Project layout and external commands
#[derive(Debug, Clone)]
pub struct ProjectSettings {
    /// Plan file name inside the project directory
    pub plan_file: String,
    /// Maximum repair iterations
    pub max_iterations: u32,
    /// Build command run through the shell
    pub build_command: String,
    /// Dev server command run through the shell
    pub dev_command: String,
    /// File patched when the build log names none
    pub entry_file: String,
    /// Dependency manifest passed to the oracle
    pub manifest_file: String,
}

/// Engine timing settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Per-step timeout (milliseconds)
    pub step_timeout_ms: u64,
    /// First navigation reachability timeout (milliseconds)
    pub reach_timeout_ms: u64,
    /// Network expectation timeout (milliseconds)
    pub network_timeout_ms: u64,
    /// Dev server startup timeout (seconds)
    pub server_timeout: u64,
}

/// Session-related settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Base directory for session storage
    pub base_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            oracle: OracleSettings::from_env(),
            project: ProjectSettings::from_env(),
            engine: EngineSettings::from_env(),
            session: SessionSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            oracle: OracleSettings::defaults(),
            project: ProjectSettings::defaults(),
            engine: EngineSettings::defaults(),
            session: SessionSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl OracleSettings {
    /// Create oracle settings from environment variables
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_ORACLE_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_ORACLE_ENDPOINT.to_string()),
            model: env::var(ENV_ORACLE_MODEL).unwrap_or_else(|_| DEFAULT_ORACLE_MODEL.to_string()),
            api_key: first_api_key(env::var(ENV_API_KEY).ok(), env::var(ENV_API_KEY_LEGACY).ok()),
            max_tokens: parse_env(ENV_ORACLE_MAX_TOKENS).unwrap_or(DEFAULT_ORACLE_MAX_TOKENS),
            connect_timeout: parse_env(ENV_ORACLE_CONNECT_TIMEOUT)
                .unwrap_or(DEFAULT_ORACLE_CONNECT_TIMEOUT),
            activity_timeout: parse_env(ENV_ORACLE_ACTIVITY_TIMEOUT)
                .unwrap_or(DEFAULT_ORACLE_ACTIVITY_TIMEOUT),
        }
    }

    /// Create oracle settings with defaults
    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_ORACLE_ENDPOINT.to_string(),
            model: DEFAULT_ORACLE_MODEL.to_string(),
            api_key: None,
            max_tokens: DEFAULT_ORACLE_MAX_TOKENS,
            connect_timeout: DEFAULT_ORACLE_CONNECT_TIMEOUT,
            activity_timeout: DEFAULT_ORACLE_ACTIVITY_TIMEOUT,
        }
    }
}

impl ProjectSettings {
    /// Create project settings from environment variables
    pub fn from_env() -> Self {
        Self {
            plan_file: env::var(ENV_PLAN_FILE).unwrap_or_else(|_| DEFAULT_PLAN_FILE.to_string()),
            max_iterations: parse_env(ENV_MAX_ITERATIONS).unwrap_or(DEFAULT_MAX_ITERATIONS),
            build_command: env::var(ENV_BUILD_COMMAND)
                .unwrap_or_else(|_| DEFAULT_BUILD_COMMAND.to_string()),
            dev_command: env::var(ENV_DEV_COMMAND)
                .unwrap_or_else(|_| DEFAULT_DEV_COMMAND.to_string()),
            entry_file: DEFAULT_ENTRY_FILE.to_string(),
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
        }
    }

    /// Create project settings with defaults
    pub fn defaults() -> Self {
        Self {
            plan_file: DEFAULT_PLAN_FILE.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            build_command: DEFAULT_BUILD_COMMAND.to_string(),
            dev_command: DEFAULT_DEV_COMMAND.to_string(),
            entry_file: DEFAULT_ENTRY_FILE.to_string(),
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
        }
    }
}

impl EngineSettings {
    /// Create engine settings from environment variables
    pub fn from_env() -> Self {
        Self {
            step_timeout_ms: parse_env(ENV_STEP_TIMEOUT_MS).unwrap_or(DEFAULT_STEP_TIMEOUT_MS),
            reach_timeout_ms: DEFAULT_REACH_TIMEOUT_MS,
            network_timeout_ms: DEFAULT_NETWORK_TIMEOUT_MS,
            server_timeout: parse_env(ENV_SERVER_TIMEOUT).unwrap_or(DEFAULT_SERVER_TIMEOUT),
        }
    }

    /// Create engine settings with defaults
    pub fn defaults() -> Self {
        Self {
            step_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            reach_timeout_ms: DEFAULT_REACH_TIMEOUT_MS,
            network_timeout_ms: DEFAULT_NETWORK_TIMEOUT_MS,
            server_timeout: DEFAULT_SERVER_TIMEOUT,
        }
    }
}

impl SessionSettings {
    /// Create session settings from environment variables
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_SESSION_DIR).unwrap_or_else(|_| DEFAULT_SESSION_DIR.to_string()),
        }
    }

    /// Create session settings with defaults
    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_SESSION_DIR.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Read and parse a numeric environment variable, ignoring malformed values
fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| parse_number(&s))
}

fn parse_number<T: std::str::FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}

/// Get the oracle endpoint (convenience function)
pub fn oracle_endpoint() -> String {
    get().oracle.endpoint.clone()
}

/// Get the session base directory (convenience function)
pub fn session_base_dir() -> String {
    get().session.base_dir.clone()
}

/// Get the plan file name (convenience function)
pub fn plan_file() -> String {
    get().project.plan_file.clone()
}

fn first_api_key(primary: Option<String>, legacy: Option<String>) -> Option<String> {
    primary.into_iter().chain(legacy).find(|key| !key.trim().is_empty())
}
