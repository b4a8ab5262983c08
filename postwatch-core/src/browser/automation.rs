use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;

use super::error::{BrowserError, BrowserResult};
use super::extractor::{ExtractedItem, PageExtractor};
use super::metrics::MonitorMetrics;
use super::process::{ChromeProcess, ProcessManager};
use super::session::{BrowserSession, SessionLauncher, SessionPage};

const SELECTOR_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Launches a real browser process and attaches to it over the debugging
/// protocol.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    processes: ProcessManager,
    init_scripts: Arc<Vec<String>>,
    navigation_timeout: Duration,
    shutdown_grace: Duration,
    metrics: Arc<Mutex<MonitorMetrics>>,
}

impl BrowserLauncher {
    pub fn new(config: &MonitorConfig, metrics: Arc<Mutex<MonitorMetrics>>) -> Self {
        let processes = ProcessManager::new(config.browser.clone(), config.user_data_dir());
        Self {
            processes,
            init_scripts: Arc::new(config.browser.init_scripts.clone()),
            navigation_timeout: config.browser.navigation_timeout(),
            shutdown_grace: config.browser.shutdown_grace(),
            metrics,
        }
    }

    pub async fn launch_automation(&self) -> BrowserResult<BrowserAutomation> {
        let mut process = self.processes.launch().await?;
        match attach(&process).await {
            Ok((browser, handler_task)) => {
                info!(port = process.port(), "attached to browser");
                Ok(BrowserAutomation {
                    live: AsyncMutex::new(Some(LiveBrowser {
                        browser,
                        handler_task,
                        process,
                    })),
                    init_scripts: Arc::clone(&self.init_scripts),
                    navigation_timeout: self.navigation_timeout,
                    shutdown_grace: self.shutdown_grace,
                    metrics: Arc::clone(&self.metrics),
                })
            }
            Err(err) => {
                warn!(error = %err, "failed to attach to browser, shutting it down");
                process.shutdown().await;
                Err(BrowserError::LaunchFailed(format!(
                    "could not attach to debug endpoint: {err}"
                )))
            }
        }
    }
}

#[async_trait]
impl SessionLauncher for BrowserLauncher {
    async fn launch(&self) -> BrowserResult<Arc<dyn BrowserSession>> {
        let automation = self.launch_automation().await?;
        Ok(Arc::new(automation))
    }
}

async fn attach(process: &ChromeProcess) -> BrowserResult<(Browser, JoinHandle<()>)> {
    let version_url = format!("{}/json/version", process.endpoint());
    let version: VersionInfo = reqwest::get(&version_url)
        .await?
        .error_for_status()?
        .json()
        .await?;
    debug!(ws = %version.web_socket_debugger_url, "resolved debugger websocket");

    let (browser, mut handler) = Browser::connect(version.web_socket_debugger_url)
        .await
        .map_err(|err| BrowserError::LaunchFailed(err.to_string()))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(err) = event {
                debug!(error = %err, "browser handler reported error");
            }
        }
    });
    Ok((browser, handler_task))
}

#[derive(Debug)]
struct LiveBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
    process: ChromeProcess,
}

#[derive(Debug)]
pub struct BrowserAutomation {
    live: AsyncMutex<Option<LiveBrowser>>,
    init_scripts: Arc<Vec<String>>,
    navigation_timeout: Duration,
    shutdown_grace: Duration,
    metrics: Arc<Mutex<MonitorMetrics>>,
}

impl BrowserAutomation {
    pub fn metrics(&self) -> MonitorMetrics {
        self.metrics.lock().unwrap().clone()
    }

    async fn configure_page(&self, page: &Page) -> BrowserResult<()> {
        for script in self.init_scripts.iter() {
            page.evaluate_on_new_document(
                AddScriptToEvaluateOnNewDocumentParams::builder()
                    .source(script.clone())
                    .build()
                    .map_err(BrowserError::Configuration)?,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for BrowserAutomation {
    async fn open_page(&self) -> BrowserResult<Box<dyn SessionPage>> {
        let guard = self.live.lock().await;
        let live = guard
            .as_ref()
            .ok_or_else(|| BrowserError::Unexpected("browser session is shut down".into()))?;
        let page = live
            .browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;
        drop(guard);

        if let Err(err) = self.configure_page(&page).await {
            if let Err(close_err) = page.close().await {
                debug!(error = %close_err, "failed to close unconfigured page");
            }
            return Err(err);
        }
        {
            let mut metrics = self.metrics.lock().unwrap();
            metrics.record_page_open();
        }
        Ok(Box::new(BrowserPage {
            page: Some(page),
            items: Vec::new(),
            navigation_timeout: self.navigation_timeout,
        }))
    }

    async fn shutdown(&self) -> BrowserResult<()> {
        let Some(mut live) = self.live.lock().await.take() else {
            return Ok(());
        };
        info!(port = live.process.port(), "shutting down browser session");

        match timeout(self.shutdown_grace, live.browser.close()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(error = %err, "failed to close browser gracefully"),
            Err(_) => warn!("browser close command timed out"),
        }

        match timeout(self.shutdown_grace, &mut live.handler_task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "browser handler join error"),
            Err(_) => {
                warn!("browser handler did not finish, aborting");
                live.handler_task.abort();
            }
        }

        live.process.shutdown().await;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        match self.live.lock().await.as_mut() {
            Some(live) => live.process.is_running(),
            None => false,
        }
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if let Ok(guard) = self.live.try_lock() {
            if guard.is_some() {
                warn!("BrowserAutomation dropped without explicit shutdown");
            }
        }
    }
}

#[derive(Debug)]
pub struct BrowserPage {
    page: Option<Page>,
    items: Vec<Element>,
    navigation_timeout: Duration,
}

impl BrowserPage {
    fn page(&self) -> BrowserResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::Unexpected("page already closed".into()))
    }
}

#[async_trait]
impl SessionPage for BrowserPage {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        self.items.clear();
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        let page = self.page()?;
        let navigation = async {
            page.goto(params).await?;
            page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match timeout(self.navigation_timeout, navigation).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: err.to_string(),
            }),
            Err(_) => Err(BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: format!("timed out after {}ms", self.navigation_timeout.as_millis()),
            }),
        }
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        wait: Duration,
    ) -> BrowserResult<bool> {
        let page = self.page()?;
        let deadline = Instant::now() + wait;
        loop {
            if page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep(SELECTOR_POLL.min(deadline - now)).await;
        }
    }

    async fn snapshot_items(&mut self, selector: &str) -> BrowserResult<usize> {
        let elements = self.page()?.find_elements(selector).await?;
        self.items = elements;
        Ok(self.items.len())
    }

    async fn read_item(
        &mut self,
        index: usize,
        extractor: &dyn PageExtractor,
    ) -> BrowserResult<Option<ExtractedItem>> {
        match self.items.get(index) {
            Some(element) => extractor.extract(element).await,
            None => Ok(None),
        }
    }

    async fn close(mut self: Box<Self>) -> BrowserResult<()> {
        self.items.clear();
        if let Some(page) = self.page.take() {
            page.close().await?;
        }
        Ok(())
    }
}
