#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use postwatch_core::browser::{
    BrowserError, BrowserResult, BrowserSession, ExtractedItem, PageExtractor, SessionLauncher,
    SessionPage,
};
use postwatch_core::config::{AuthSection, MonitorConfig};
use postwatch_core::state::{StateError, StateResult, WatermarkStore, Watermarks};

/// How the login page behaves.
#[derive(Debug, Clone)]
pub struct LoginScript {
    /// Indicator checks that come back negative before it shows up.
    /// `None` means the user never logs in.
    pub indicator_after: Option<usize>,
    pub form_renders: bool,
    /// Leading login navigations that fail.
    pub navigation_failures: usize,
}

impl LoginScript {
    pub fn logged_in() -> Self {
        Self {
            indicator_after: Some(0),
            form_renders: true,
            navigation_failures: 0,
        }
    }

    pub fn manual_after(checks: usize) -> Self {
        Self {
            indicator_after: Some(checks),
            form_renders: true,
            navigation_failures: 0,
        }
    }

    pub fn never_logs_in() -> Self {
        Self {
            indicator_after: None,
            form_renders: true,
            navigation_failures: 0,
        }
    }

    pub fn blank_page() -> Self {
        Self {
            indicator_after: None,
            form_renders: false,
            navigation_failures: 0,
        }
    }
}

/// Scripted stand-in for a launched, scriptable browser. Clones share state.
#[derive(Clone)]
pub struct FakeBrowser {
    shared: Arc<Shared>,
}

impl Deref for FakeBrowser {
    type Target = Shared;

    fn deref(&self) -> &Shared {
        &self.shared
    }
}

pub struct Shared {
    auth: AuthSection,
    login: Mutex<LoginScript>,
    indicator_checks: AtomicUsize,
    login_navigations: AtomicUsize,
    timelines: Mutex<HashMap<String, Vec<ExtractedItem>>>,
    unreachable: Mutex<HashSet<String>>,
    visits: Mutex<Vec<String>>,
    alive: AtomicBool,
    shutdowns: AtomicUsize,
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
    page_delay: Mutex<Duration>,
}

impl FakeBrowser {
    pub fn new(auth: AuthSection, login: LoginScript) -> Self {
        let shared = Arc::new(Shared {
            auth,
            login: Mutex::new(login),
            indicator_checks: AtomicUsize::new(0),
            login_navigations: AtomicUsize::new(0),
            timelines: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            visits: Mutex::new(Vec::new()),
            alive: AtomicBool::new(true),
            shutdowns: AtomicUsize::new(0),
            pages_opened: AtomicUsize::new(0),
            pages_closed: AtomicUsize::new(0),
            page_delay: Mutex::new(Duration::ZERO),
        });
        Self { shared }
    }

    pub fn set_timeline(&self, target: &str, items: Vec<ExtractedItem>) {
        self.timelines
            .lock()
            .unwrap()
            .insert(target.to_string(), items);
    }

    pub fn make_unreachable(&self, target: &str) {
        self.unreachable.lock().unwrap().insert(target.to_string());
    }

    /// Every navigation takes this long.
    pub fn set_page_delay(&self, delay: Duration) {
        *self.page_delay.lock().unwrap() = delay;
    }

    /// Target pages visited, login navigations excluded.
    pub fn visits(&self) -> Vec<String> {
        self.visits
            .lock()
            .unwrap()
            .iter()
            .filter(|url| **url != self.auth.login_url)
            .cloned()
            .collect()
    }

    pub fn login_navigations(&self) -> usize {
        self.login_navigations.load(Ordering::SeqCst)
    }

    pub fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> usize {
        self.pages_opened.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> usize {
        self.pages_closed.load(Ordering::SeqCst)
    }

    /// The browser dies on its own; no shutdown is recorded.
    pub fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn login_check(&self, selector: &str) -> bool {
        let script = self.login.lock().unwrap().clone();
        if selector == self.auth.logged_in_selector {
            let seen = self.indicator_checks.fetch_add(1, Ordering::SeqCst);
            return matches!(script.indicator_after, Some(after) if seen >= after);
        }
        if selector == self.auth.login_form_selector {
            return script.form_renders;
        }
        false
    }
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn open_page(&self) -> BrowserResult<Box<dyn SessionPage>> {
        if !self.alive() {
            return Err(BrowserError::Unexpected("browser is shut down".into()));
        }
        self.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            browser: self.clone(),
            url: None,
            snapshot: Vec::new(),
        }))
    }

    async fn shutdown(&self) -> BrowserResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.alive()
    }
}

pub struct FakePage {
    browser: FakeBrowser,
    url: Option<String>,
    snapshot: Vec<ExtractedItem>,
}

#[async_trait]
impl SessionPage for FakePage {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        let delay = *self.browser.page_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let browser = &self.browser;
        browser.visits.lock().unwrap().push(url.to_string());
        if url == browser.auth.login_url {
            let seen = browser.login_navigations.fetch_add(1, Ordering::SeqCst);
            if seen < browser.login.lock().unwrap().navigation_failures {
                return Err(BrowserError::NavigationFailed {
                    url: url.to_string(),
                    reason: "net::ERR_CONNECTION_RESET".into(),
                });
            }
        } else if browser.unreachable.lock().unwrap().contains(url) {
            return Err(BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".into(),
            });
        }
        self.url = Some(url.to_string());
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        _timeout: Duration,
    ) -> BrowserResult<bool> {
        let browser = &self.browser;
        let Some(url) = self.url.as_deref() else {
            return Ok(false);
        };
        if url == browser.auth.login_url {
            return Ok(browser.login_check(selector));
        }
        Ok(browser
            .timelines
            .lock()
            .unwrap()
            .get(url)
            .map(|items| !items.is_empty())
            .unwrap_or(false))
    }

    async fn snapshot_items(&mut self, _selector: &str) -> BrowserResult<usize> {
        let browser = &self.browser;
        self.snapshot = self
            .url
            .as_ref()
            .and_then(|url| browser.timelines.lock().unwrap().get(url).cloned())
            .unwrap_or_default();
        Ok(self.snapshot.len())
    }

    async fn read_item(
        &mut self,
        index: usize,
        _extractor: &dyn PageExtractor,
    ) -> BrowserResult<Option<ExtractedItem>> {
        Ok(self.snapshot.get(index).cloned())
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        self.browser.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeLauncher {
    browser: FakeBrowser,
    launches: AtomicUsize,
}

impl FakeLauncher {
    pub fn new(browser: FakeBrowser) -> Arc<Self> {
        Arc::new(Self {
            browser,
            launches: AtomicUsize::new(0),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(&self) -> BrowserResult<Arc<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.browser.alive.store(true, Ordering::SeqCst);
        let session: Arc<dyn BrowserSession> = Arc::new(self.browser.clone());
        Ok(session)
    }
}

/// Loads fine, refuses every write.
pub struct FailingStore {
    initial: Watermarks,
    attempts: AtomicUsize,
}

impl FailingStore {
    pub fn new(initial: Watermarks) -> Arc<Self> {
        Arc::new(Self {
            initial,
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl WatermarkStore for FailingStore {
    fn try_load(&self) -> StateResult<Watermarks> {
        Ok(self.initial.clone())
    }

    fn save(&self, _watermarks: &Watermarks) -> StateResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StateError::Io {
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
            path: PathBuf::from("/state/watermarks.json"),
        })
    }
}

/// Configuration with every human-pacing delay collapsed to zero.
pub fn quick_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.auth.retry_delay_ms = (0, 0);
    config.auth.navigation_retry_delay_ms = (0, 0);
    config.crawl.settle_delay_ms = (0, 0);
    config.crawl.item_delay_ms = (0, 0);
    config.crawl.pacing_ms = (0, 0);
    config
}

pub fn tweet(id: &str) -> ExtractedItem {
    ExtractedItem::new(
        id,
        json!({ "text": format!("post {id}"), "url": format!("https://x.com/someone/status/{id}") }),
    )
}

/// Topmost first, like the page renders them.
pub fn timeline(ids: &[&str]) -> Vec<ExtractedItem> {
    ids.iter().map(|id| tweet(id)).collect()
}
