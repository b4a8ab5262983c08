use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct MonitorConfig {
    pub browser: BrowserSection,
    pub auth: AuthSection,
    pub crawl: CrawlSection,
    pub state: StateSection,
}

impl MonitorConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.state.base_dir).join(path)
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.resolve_path(&self.state.path)
    }

    pub fn user_data_dir(&self) -> PathBuf {
        self.resolve_path(&self.browser.user_data_dir)
    }

    /// Rejects values that would make a bounded wait unbounded or empty.
    pub fn validate(&self) -> Result<()> {
        if self.auth.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "auth.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.browser.startup_poll_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "browser.startup_poll_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.auth.manual_poll_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "auth.manual_poll_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.state.path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "state.path",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    /// Used when `CHROME_PATH` is unset.
    pub executable_path: Option<String>,
    pub search_paths: Vec<String>,
    pub user_data_dir: String,
    pub launch_args: Vec<String>,
    pub init_scripts: Vec<String>,
    pub startup_timeout_ms: u64,
    pub startup_poll_ms: u64,
    pub probe_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub navigation_timeout_ms: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            search_paths: vec![
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome".into(),
                "google-chrome".into(),
                "google-chrome-stable".into(),
                "chromium".into(),
                "chromium-browser".into(),
            ],
            user_data_dir: "chrome_data".into(),
            launch_args: vec![
                "--disable-blink-features=AutomationControlled".into(),
                "--window-size=1280,720".into(),
                "--no-first-run".into(),
            ],
            init_scripts: vec![
                "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });".into(),
            ],
            startup_timeout_ms: 15_000,
            startup_poll_ms: 500,
            probe_timeout_ms: 1_000,
            shutdown_grace_ms: 5_000,
            navigation_timeout_ms: 60_000,
        }
    }
}

impl BrowserSection {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn startup_poll(&self) -> Duration {
        Duration::from_millis(self.startup_poll_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub login_url: String,
    pub logged_in_selector: String,
    pub login_form_selector: String,
    pub max_attempts: usize,
    pub indicator_wait_ms: u64,
    pub form_wait_ms: u64,
    pub retry_delay_ms: (u64, u64),
    pub navigation_retry_delay_ms: (u64, u64),
    pub manual_poll_ms: u64,
    pub manual_timeout_ms: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            login_url: "https://x.com/i/flow/login".into(),
            logged_in_selector: r#"[data-testid="SideNav_AccountSwitcher_Button"]"#.into(),
            login_form_selector: r#"input[autocomplete="username"]"#.into(),
            max_attempts: 5,
            indicator_wait_ms: 8_000,
            form_wait_ms: 8_000,
            retry_delay_ms: (1_000, 2_000),
            navigation_retry_delay_ms: (2_000, 4_000),
            manual_poll_ms: 3_000,
            manual_timeout_ms: 180_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlSection {
    pub item_limit: usize,
    pub marker_timeout_ms: u64,
    pub settle_delay_ms: (u64, u64),
    pub item_delay_ms: (u64, u64),
    pub pacing_ms: (u64, u64),
    pub site_origin: String,
    pub pinned_label: String,
    pub targets: Vec<String>,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            item_limit: 5,
            marker_timeout_ms: 15_000,
            settle_delay_ms: (1_000, 2_500),
            item_delay_ms: (500, 1_500),
            pacing_ms: (2_000, 5_000),
            site_origin: "https://x.com".into(),
            pinned_label: "Pinned".into(),
            targets: Vec::new(),
        }
    }
}

impl CrawlSection {
    pub fn marker_timeout(&self) -> Duration {
        Duration::from_millis(self.marker_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateSection {
    pub base_dir: String,
    pub path: String,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            base_dir: ".".into(),
            path: "watermarks.json".into(),
        }
    }
}

pub fn load_monitor_config<P: AsRef<Path>>(path: P) -> Result<MonitorConfig> {
    let config: MonitorConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
