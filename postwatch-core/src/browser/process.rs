use std::ffi::OsString;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::BrowserSection;

use super::error::{BrowserError, BrowserResult};

pub const CHROME_PATH_ENV: &str = "CHROME_PATH";

/// Starts the browser binary with a remote debugging port and a persistent
/// profile directory.
#[derive(Debug, Clone)]
pub struct ProcessManager {
    config: Arc<BrowserSection>,
    user_data_dir: PathBuf,
}

impl ProcessManager {
    pub fn new(config: BrowserSection, user_data_dir: PathBuf) -> Self {
        Self {
            config: Arc::new(config),
            user_data_dir,
        }
    }

    pub fn user_data_dir(&self) -> &Path {
        &self.user_data_dir
    }

    pub fn locate_executable(&self) -> BrowserResult<PathBuf> {
        locate_executable_in(
            std::env::var(CHROME_PATH_ENV).ok(),
            self.config.executable_path.as_deref(),
            &self.config.search_paths,
            std::env::var_os("PATH"),
        )
    }

    pub async fn launch(&self) -> BrowserResult<ChromeProcess> {
        let executable = self.locate_executable()?;
        self.launch_executable(&executable).await
    }

    pub(crate) async fn launch_executable(&self, executable: &Path) -> BrowserResult<ChromeProcess> {
        let port = free_port()?;
        let mut process = self.spawn(executable, port)?;
        info!(
            executable = %executable.display(),
            port,
            profile = %self.user_data_dir.display(),
            "launching browser"
        );

        match process.wait_until_listening(&self.config).await {
            Ok(()) => {
                info!(port, "browser debug endpoint is listening");
                Ok(process)
            }
            Err(err) => {
                process.kill().await;
                Err(err)
            }
        }
    }

    pub(crate) fn spawn(&self, executable: &Path, port: u16) -> BrowserResult<ChromeProcess> {
        std::fs::create_dir_all(&self.user_data_dir).map_err(|err| {
            BrowserError::LaunchFailed(format!(
                "failed to create user data dir {}: {err}",
                self.user_data_dir.display()
            ))
        })?;

        let mut command = Command::new(executable);
        command
            .arg(format!("--remote-debugging-port={port}"))
            .arg(format!("--user-data-dir={}", self.user_data_dir.display()))
            .args(&self.config.launch_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| {
            BrowserError::LaunchFailed(format!("failed to spawn {}: {err}", executable.display()))
        })?;

        Ok(ChromeProcess {
            pid: child.id(),
            child: Some(child),
            port,
            grace: self.config.shutdown_grace(),
        })
    }
}

/// A running browser process. Dropping it kills the process.
#[derive(Debug)]
pub struct ChromeProcess {
    child: Option<Child>,
    pid: Option<u32>,
    port: u16,
    grace: Duration,
}

impl ChromeProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn wait_until_listening(&mut self, config: &BrowserSection) -> BrowserResult<()> {
        let deadline = Instant::now() + config.startup_timeout();
        let poll = config.startup_poll();
        loop {
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(BrowserError::LaunchFailed(format!(
                        "browser exited before opening port {}: {status}",
                        self.port
                    )));
                }
            }

            let Some(window) = connect_window(config.probe_timeout(), deadline) else {
                return Err(self.not_listening(config));
            };
            let connected = timeout(window, TcpStream::connect(("127.0.0.1", self.port))).await;
            if let Ok(Ok(_)) = connected {
                return Ok(());
            }

            if Instant::now() + poll > deadline {
                return Err(self.not_listening(config));
            }
            sleep(poll).await;
        }
    }

    fn not_listening(&self, config: &BrowserSection) -> BrowserError {
        BrowserError::LaunchFailed(format!(
            "browser did not open debug port {} within {}ms",
            self.port, config.startup_timeout_ms
        ))
    }

    /// Graceful termination, then a forced kill after the grace period.
    /// Safe to call more than once.
    pub async fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = ?self.pid, %status, "browser already exited");
                return;
            }
            Ok(None) => {}
            Err(err) => warn!(pid = ?self.pid, error = %err, "failed to poll browser status"),
        }

        if let Err(err) = terminate(&child).await {
            warn!(pid = ?self.pid, error = %err, "failed to signal browser termination");
        }

        match timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = ?self.pid, %status, "browser exited");
                return;
            }
            Ok(Err(err)) => warn!(pid = ?self.pid, error = %err, "failed waiting for browser exit"),
            Err(_) => warn!(
                pid = ?self.pid,
                grace_ms = self.grace.as_millis() as u64,
                "browser ignored termination, killing"
            ),
        }

        if let Err(err) = child.kill().await {
            warn!(pid = ?self.pid, error = %err, "failed to kill browser");
        }
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill().await {
                warn!(pid = ?self.pid, error = %err, "failed to kill browser");
            }
        }
    }
}

impl Drop for ChromeProcess {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                warn!(pid = ?self.pid, "ChromeProcess dropped without explicit shutdown");
                let _ = child.start_kill();
            }
        }
    }
}

/// Connect attempts never run past the startup deadline.
fn connect_window(per_attempt: Duration, deadline: Instant) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        None
    } else {
        Some(per_attempt.min(remaining))
    }
}

#[cfg(unix)]
async fn terminate(child: &Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let status = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("kill -TERM {pid} exited with {status}"),
        ))
    }
}

#[cfg(not(unix))]
async fn terminate(_child: &Child) -> std::io::Result<()> {
    // No graceful signal; the forced kill after the grace period applies.
    Ok(())
}

pub fn free_port() -> BrowserResult<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

pub(crate) fn locate_executable_in(
    env_override: Option<String>,
    configured: Option<&str>,
    search_paths: &[String],
    path_var: Option<OsString>,
) -> BrowserResult<PathBuf> {
    if let Some(explicit) = env_override.filter(|value| !value.trim().is_empty()) {
        let path = PathBuf::from(explicit.trim());
        if path.is_file() {
            return Ok(path);
        }
        warn!(path = %path.display(), "{CHROME_PATH_ENV} does not point to a file, ignoring");
    }

    let candidates = configured
        .into_iter()
        .map(str::to_string)
        .chain(search_paths.iter().cloned())
        .collect::<Vec<_>>();

    for candidate in &candidates {
        let path = Path::new(candidate);
        if path.components().count() > 1 {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            continue;
        }
        if let Some(dirs) = path_var.as_ref() {
            if let Some(found) = std::env::split_paths(dirs)
                .map(|dir| dir.join(candidate))
                .find(|full| full.is_file())
            {
                return Ok(found);
            }
        }
    }

    Err(BrowserError::BinaryNotFound {
        searched: candidates.join(", "),
    })
}
