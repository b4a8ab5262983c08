use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::AuthSection;
use crate::pacing::human_delay;

use super::error::{BrowserError, BrowserResult};
use super::metrics::MonitorMetrics;
use super::session::{BrowserSession, SessionPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    Checking,
    AwaitingManual,
    Authenticated,
    Failed,
}

impl AuthState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Failed)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Checking => "checking",
            AuthState::AwaitingManual => "awaiting_manual",
            AuthState::Authenticated => "authenticated",
            AuthState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthOutcome {
    pub state: AuthState,
    pub attempts: usize,
    /// Whether a person had to finish the login in the browser window.
    pub manual: bool,
}

/// Bounded login flow: reuse a saved session when the logged-in indicator is
/// already present, otherwise wait a fixed time for a manual login.
#[derive(Debug)]
pub struct Authenticator {
    config: AuthSection,
    state: AuthState,
    history: Vec<AuthState>,
    metrics: Option<Arc<Mutex<MonitorMetrics>>>,
}

impl Authenticator {
    pub fn new(config: AuthSection) -> Self {
        Self {
            config,
            state: AuthState::Unauthenticated,
            history: vec![AuthState::Unauthenticated],
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Mutex<MonitorMetrics>>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Every state visited so far, in order.
    pub fn history(&self) -> &[AuthState] {
        &self.history
    }

    pub async fn authenticate(&mut self, session: &dyn BrowserSession) -> BrowserResult<AuthOutcome> {
        let mut page = match session.open_page().await {
            Ok(page) => page,
            Err(err) => {
                self.transition(AuthState::Failed);
                return Err(BrowserError::AuthenticationFailed(format!(
                    "could not open login page: {err}"
                )));
            }
        };
        let result = self.drive(page.as_mut()).await;
        if let Err(err) = page.close().await {
            debug!(error = %err, "failed to close login page");
        }
        result
    }

    pub async fn drive(&mut self, page: &mut dyn SessionPage) -> BrowserResult<AuthOutcome> {
        if self.state.is_terminal() {
            return Err(BrowserError::Unexpected(format!(
                "authenticator already finished in state {}",
                self.state
            )));
        }
        self.transition(AuthState::Checking);
        info!(url = %self.config.login_url, "checking authentication state");

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0usize;
        let mut form_ready = false;
        for attempt in 1..=max_attempts {
            attempts = attempt;
            self.record_attempt();
            let last = attempt == max_attempts;

            if let Err(err) = page.goto(&self.config.login_url).await {
                warn!(attempt, max_attempts, error = %err, "login navigation failed");
                if !last {
                    human_delay(self.config.navigation_retry_delay_ms).await;
                }
                continue;
            }

            if self
                .check_selector(page, &self.config.logged_in_selector, self.indicator_wait())
                .await
            {
                info!(attempts, "already authenticated");
                self.transition(AuthState::Authenticated);
                return Ok(self.outcome(attempts, false));
            }

            if self
                .check_selector(page, &self.config.login_form_selector, self.form_wait())
                .await
            {
                form_ready = true;
                break;
            }

            warn!(attempt, max_attempts, "login form did not render, retrying");
            if !last {
                human_delay(self.config.retry_delay_ms).await;
            }
        }

        if !form_ready {
            self.transition(AuthState::Failed);
            return Err(BrowserError::AuthenticationFailed(format!(
                "login form did not render after {attempts} attempts"
            )));
        }

        self.transition(AuthState::AwaitingManual);
        let limit = Duration::from_millis(self.config.manual_timeout_ms);
        info!(
            timeout_secs = limit.as_secs(),
            "not logged in, complete the login in the browser window"
        );

        let poll = Duration::from_millis(self.config.manual_poll_ms.max(1));
        let deadline = Instant::now() + limit;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(poll.min(deadline - now)).await;
            if self
                .check_selector(page, &self.config.logged_in_selector, Duration::ZERO)
                .await
            {
                info!("manual login completed");
                self.transition(AuthState::Authenticated);
                return Ok(self.outcome(attempts, true));
            }
        }

        self.transition(AuthState::Failed);
        Err(BrowserError::AuthenticationFailed(format!(
            "manual login not completed within {}s",
            limit.as_secs()
        )))
    }

    async fn check_selector(
        &self,
        page: &mut dyn SessionPage,
        selector: &str,
        wait: Duration,
    ) -> bool {
        match page.wait_for_selector(selector, wait).await {
            Ok(found) => found,
            Err(err) => {
                debug!(selector, error = %err, "selector check failed");
                false
            }
        }
    }

    fn transition(&mut self, next: AuthState) {
        debug!(from = %self.state, to = %next, "auth state transition");
        self.state = next;
        self.history.push(next);
    }

    fn record_attempt(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.lock().unwrap().record_auth_attempt();
        }
    }

    fn outcome(&self, attempts: usize, manual: bool) -> AuthOutcome {
        AuthOutcome {
            state: self.state,
            attempts,
            manual,
        }
    }

    fn indicator_wait(&self) -> Duration {
        Duration::from_millis(self.config.indicator_wait_ms)
    }

    fn form_wait(&self) -> Duration {
        Duration::from_millis(self.config.form_wait_ms)
    }
}
