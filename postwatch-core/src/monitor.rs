use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::browser::{
    AuthOutcome, Authenticator, BrowserError, BrowserLauncher, BrowserResult, BrowserSession,
    MonitorMetrics, PageExtractor, SessionLauncher, TargetCrawler, TweetExtractor,
};
use crate::config::MonitorConfig;
use crate::pacing::RateLimiter;
use crate::queue::{CrawlQueue, CrawlRequest, QueueReceiver};
use crate::sink::{ItemSink, LogSink};
use crate::state::{JsonFileStore, Target, WatermarkLedger, WatermarkStore, Watermarks};

pub struct MonitorServiceBuilder {
    config: MonitorConfig,
    launcher: Option<Arc<dyn SessionLauncher>>,
    store: Option<Arc<dyn WatermarkStore>>,
    extractor: Option<Arc<dyn PageExtractor>>,
    sink: Option<Arc<dyn ItemSink>>,
}

impl MonitorServiceBuilder {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            launcher: None,
            store: None,
            extractor: None,
            sink: None,
        }
    }

    pub fn launcher(mut self, launcher: Arc<dyn SessionLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn store(mut self, store: Arc<dyn WatermarkStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn PageExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ItemSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Anything not supplied falls back to the real browser, the JSON state
    /// file from the config and log output.
    pub fn build(self) -> BrowserResult<MonitorService> {
        let metrics = Arc::new(Mutex::new(MonitorMetrics::default()));
        let launcher = match self.launcher {
            Some(launcher) => launcher,
            None => Arc::new(BrowserLauncher::new(&self.config, Arc::clone(&metrics))),
        };
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(JsonFileStore::new(self.config.state_path())),
        };
        let extractor = match self.extractor {
            Some(extractor) => extractor,
            None => Arc::new(TweetExtractor::from_config(&self.config.crawl)?),
        };
        let sink = self.sink.unwrap_or_else(|| Arc::new(LogSink));

        let crawler = Arc::new(TargetCrawler::new(
            extractor,
            self.config.crawl.clone(),
            Arc::clone(&metrics),
        ));
        let ledger = Arc::new(Mutex::new(WatermarkLedger::load(Arc::clone(&store))));
        let (queue, receiver) = CrawlQueue::new();

        Ok(MonitorService {
            config: self.config,
            launcher,
            store,
            sink,
            crawler,
            metrics,
            ledger,
            queue,
            receiver: Mutex::new(Some(receiver)),
            running: AsyncMutex::new(None),
        })
    }
}

struct Running {
    session: Arc<dyn BrowserSession>,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<QueueReceiver>,
}

/// Long-lived monitor: one authenticated browser, one FIFO of crawl
/// requests and a single worker draining it.
pub struct MonitorService {
    config: MonitorConfig,
    launcher: Arc<dyn SessionLauncher>,
    store: Arc<dyn WatermarkStore>,
    sink: Arc<dyn ItemSink>,
    crawler: Arc<TargetCrawler>,
    metrics: Arc<Mutex<MonitorMetrics>>,
    ledger: Arc<Mutex<WatermarkLedger>>,
    queue: CrawlQueue,
    receiver: Mutex<Option<QueueReceiver>>,
    running: AsyncMutex<Option<Running>>,
}

impl MonitorService {
    pub fn builder(config: MonitorConfig) -> MonitorServiceBuilder {
        MonitorServiceBuilder::new(config)
    }

    /// Real browser, JSON state file and log sink.
    pub fn from_config(config: MonitorConfig) -> BrowserResult<Self> {
        MonitorServiceBuilder::new(config).build()
    }

    /// Launches the browser, authenticates and starts consuming the queue.
    /// Requests enqueued before this call are processed once it succeeds.
    pub async fn start(&self) -> BrowserResult<AuthOutcome> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(BrowserError::Unexpected(
                "monitor is already running".to_string(),
            ));
        }

        info!("starting monitor");
        let session = self.launcher.launch().await?;
        let mut authenticator =
            Authenticator::new(self.config.auth.clone()).with_metrics(Arc::clone(&self.metrics));
        let outcome = match authenticator.authenticate(session.as_ref()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "authentication failed, shutting the browser down");
                if let Err(shutdown_err) = session.shutdown().await {
                    warn!(error = %shutdown_err, "browser shutdown after failed login reported an error");
                }
                return Err(match err {
                    BrowserError::AuthenticationFailed(_) => err,
                    other => BrowserError::AuthenticationFailed(other.to_string()),
                });
            }
        };

        *self.ledger.lock().unwrap() = WatermarkLedger::load(Arc::clone(&self.store));

        let receiver = self.receiver.lock().unwrap().take();
        let Some(receiver) = receiver else {
            if let Err(err) = session.shutdown().await {
                warn!(error = %err, "browser shutdown reported an error");
            }
            return Err(BrowserError::Unexpected(
                "crawl queue consumer is unavailable".to_string(),
            ));
        };

        let (shutdown, signal) = watch::channel(false);
        let worker = Worker {
            session: Arc::clone(&session),
            crawler: Arc::clone(&self.crawler),
            ledger: Arc::clone(&self.ledger),
            sink: Arc::clone(&self.sink),
            metrics: Arc::clone(&self.metrics),
            pacer: RateLimiter::new(self.config.crawl.pacing_ms),
        };
        let worker = tokio::spawn(worker.run(receiver, signal));

        *running = Some(Running {
            session,
            shutdown,
            worker,
        });
        info!(
            attempts = outcome.attempts,
            manual = outcome.manual,
            pending = self.queue.pending(),
            "monitor started"
        );
        Ok(outcome)
    }

    /// Stops the worker after its current crawl, closes the browser and
    /// flushes watermarks. Unprocessed requests stay queued. Idempotent.
    pub async fn stop(&self) -> BrowserResult<()> {
        let Some(running) = self.running.lock().await.take() else {
            debug!("monitor not running, nothing to stop");
            return Ok(());
        };
        info!("stopping monitor");

        let _ = running.shutdown.send(true);
        match running.worker.await {
            Ok(receiver) => *self.receiver.lock().unwrap() = Some(receiver),
            Err(err) => error!(error = %err, "crawl worker ended abnormally"),
        }

        if let Err(err) = running.session.shutdown().await {
            warn!(error = %err, "browser shutdown reported an error");
        }

        let flushed = self.ledger.lock().unwrap().flush();
        if let Err(err) = flushed {
            warn!(error = %err, "failed to flush watermarks");
            self.metrics.lock().unwrap().record_state_error();
        }

        info!(pending = self.queue.pending(), "monitor stopped");
        Ok(())
    }

    /// Never blocks and never fails; callable before `start`.
    pub fn enqueue(&self, target: impl Into<Target>) {
        self.queue.push(CrawlRequest::new(target));
    }

    pub fn enqueue_with_limit(&self, target: impl Into<Target>, limit: usize) {
        self.queue.push(CrawlRequest::new(target).with_limit(limit));
    }

    /// Producer handle for other tasks.
    pub fn queue(&self) -> CrawlQueue {
        self.queue.clone()
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// Resolves once every enqueued request has been processed.
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn metrics(&self) -> MonitorMetrics {
        self.metrics.lock().unwrap().clone()
    }

    pub fn watermark(&self, target: &Target) -> Option<String> {
        self.ledger.lock().unwrap().get(target).map(str::to_string)
    }

    pub fn watermarks(&self) -> Watermarks {
        self.ledger.lock().unwrap().snapshot()
    }
}

impl Drop for MonitorService {
    fn drop(&mut self) {
        if self.running.get_mut().is_some() {
            warn!("monitor dropped while running; call stop() for a clean shutdown");
        }
    }
}

struct Worker {
    session: Arc<dyn BrowserSession>,
    crawler: Arc<TargetCrawler>,
    ledger: Arc<Mutex<WatermarkLedger>>,
    sink: Arc<dyn ItemSink>,
    metrics: Arc<Mutex<MonitorMetrics>>,
    pacer: RateLimiter,
}

impl Worker {
    /// Hands the receiver back so a later `start` resumes the same queue.
    async fn run(
        self,
        mut receiver: QueueReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> QueueReceiver {
        debug!("crawl worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let request = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = receiver.next() => match next {
                    Some(request) => request,
                    None => break,
                },
            };

            self.process(&request).await;
            receiver.complete();

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                waited = self.pacer.wait() => debug!(delay_ms = waited, "paced before next crawl"),
            }
        }
        debug!("crawl worker stopped");
        receiver
    }

    async fn process(&self, request: &CrawlRequest) {
        if !self.session.is_alive().await {
            error!(target = %request.target, "browser is no longer running, crawl skipped");
            self.metrics.lock().unwrap().record_crawl(false);
            return;
        }
        let limit = request
            .limit
            .unwrap_or_else(|| self.crawler.default_limit());
        let result = self
            .crawler
            .crawl(self.session.as_ref(), &request.target, limit, &self.ledger)
            .await;
        match result {
            Ok(report) => self.sink.deliver(&report),
            Err(err) if err.is_local() => warn!(
                target = %request.target,
                error = %err,
                "crawl failed, watermark unchanged"
            ),
            Err(err) => error!(
                target = %request.target,
                error = %err,
                "crawl failed, browser may be unusable"
            ),
        }
    }
}
