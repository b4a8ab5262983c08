use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::warn;

use crate::state::Target;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    pub target: Target,
    /// Overrides the configured item limit for this request.
    pub limit: Option<usize>,
}

impl CrawlRequest {
    pub fn new(target: impl Into<Target>) -> Self {
        Self {
            target: target.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Default)]
struct Progress {
    pending: AtomicUsize,
    idle: Notify,
}

impl Progress {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Producer side of the unbounded FIFO. Cheap to clone; pushing never blocks.
#[derive(Debug, Clone)]
pub struct CrawlQueue {
    tx: mpsc::UnboundedSender<CrawlRequest>,
    progress: Arc<Progress>,
}

/// Consumer side, owned by the single worker.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<CrawlRequest>,
    progress: Arc<Progress>,
}

impl CrawlQueue {
    pub fn new() -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let progress = Arc::new(Progress::default());
        (
            Self {
                tx,
                progress: Arc::clone(&progress),
            },
            QueueReceiver { rx, progress },
        )
    }

    pub fn push(&self, request: CrawlRequest) {
        self.progress.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = self.tx.send(request) {
            warn!(target = %err.0.target, "crawl queue is closed, dropping request");
            self.progress.finish_one();
        }
    }

    /// Requests enqueued but not yet fully processed.
    pub fn pending(&self) -> usize {
        self.progress.pending.load(Ordering::Acquire)
    }

    /// Resolves once every pushed request has been processed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.progress.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl QueueReceiver {
    pub async fn next(&mut self) -> Option<CrawlRequest> {
        self.rx.recv().await
    }

    /// Marks the most recently received request as processed.
    pub fn complete(&self) {
        self.progress.finish_one();
    }
}
