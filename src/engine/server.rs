//! Dev server autostart: spawn detached, then poll TCP until it accepts.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::build::shell;
use crate::config;

const DEFAULT_HOST: &str = "localhost";
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Result type for server startup
pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("No dev server command configured")]
    NoCommand,

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server at {address} not reachable after {seconds}s")]
    Timeout { address: String, seconds: u64 },
}

/// How to bring up the application when the first reachability check fails
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Shell command that starts the dev server; `None` disables autostart
    pub command: Option<String>,
    /// Directory the command runs in
    pub working_dir: PathBuf,
    /// Give up after this long
    pub startup_timeout: Duration,
    /// Delay between connection attempts
    pub poll_interval: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            command: Some(config::DEFAULT_DEV_COMMAND.to_string()),
            working_dir: PathBuf::from("."),
            startup_timeout: Duration::from_secs(config::DEFAULT_SERVER_TIMEOUT),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl ServerOptions {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            ..Default::default()
        }
    }

    pub fn command(mut self, command: Option<String>) -> Self {
        self.command = command;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Host and port the base URL points at (port defaults to the dev port)
pub fn server_address(base_url: &str) -> (String, u16) {
    let rest = base_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(base_url);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let authority = authority.rsplit_once('@').map(|(_, a)| a).unwrap_or(authority);

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()),
        None => (authority, None),
    };
    let host = if host.is_empty() { DEFAULT_HOST } else { host };
    (host.to_string(), port.unwrap_or(config::DEFAULT_DEV_PORT))
}

/// Start the dev server in its own session and return its pid.
///
/// The child is never waited on; it outlives this process.
pub fn spawn_detached(options: &ServerOptions) -> ServerResult<u32> {
    let command = options.command.as_deref().ok_or(ServerError::NoCommand)?;

    let mut cmd = shell(command);
    cmd.current_dir(&options.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid is async-signal-safe and touches no parent state.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                Ok(())
            });
        }
    }

    let child = cmd.spawn().map_err(|source| ServerError::Spawn {
        command: command.to_string(),
        source,
    })?;
    Ok(child.id())
}

/// Poll until `host:port` accepts a TCP connection or the deadline passes
pub async fn wait_for_port(host: &str, port: u16, deadline: Duration, interval: Duration) -> bool {
    let start = Instant::now();
    let address = format!("{}:{}", host, port);
    loop {
        match timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect(&address)).await {
            Ok(Ok(_)) => return true,
            Ok(Err(e)) => debug!("{} not ready: {}", address, e),
            Err(_) => debug!("{} connect attempt timed out", address),
        }
        if start.elapsed() >= deadline {
            return false;
        }
        sleep(interval).await;
    }
}

/// Spawn the dev server and wait until the base URL's port is reachable
pub async fn start_and_wait(options: &ServerOptions, base_url: &str) -> ServerResult<()> {
    let pid = spawn_detached(options)?;
    let (host, port) = server_address(base_url);
    info!("Started dev server (pid {}), waiting for {}:{}", pid, host, port);

    if wait_for_port(&host, port, options.startup_timeout, options.poll_interval).await {
        info!("Server is up");
        Ok(())
    } else {
        Err(ServerError::Timeout {
            address: format!("{}:{}", host, port),
            seconds: options.startup_timeout.as_secs(),
        })
    }
}
