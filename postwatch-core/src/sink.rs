use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::browser::CrawlReport;

/// Receives the outcome of every successful crawl, including ones with no
/// new items.
pub trait ItemSink: Send + Sync {
    fn deliver(&self, report: &CrawlReport);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ItemSink for LogSink {
    fn deliver(&self, report: &CrawlReport) {
        if report.items.is_empty() {
            debug!(target = %report.target, "no new items");
            return;
        }
        // Oldest first reads naturally in a log.
        for item in report.items.iter().rev() {
            info!(
                target = %report.target,
                id = %item.id,
                payload = %item.payload,
                "new item"
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CrawlReport>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CrawlReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ItemSink for ChannelSink {
    fn deliver(&self, report: &CrawlReport) {
        if self.tx.send(report.clone()).is_err() {
            debug!(target = %report.target, "report receiver dropped");
        }
    }
}
