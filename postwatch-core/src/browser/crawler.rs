use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CrawlSection;
use crate::pacing::human_delay;
use crate::state::{Target, WatermarkLedger};

use super::error::{BrowserError, BrowserResult};
use super::extractor::PageExtractor;
use super::metrics::MonitorMetrics;
use super::session::{BrowserSession, SessionPage};

/// A newly discovered item handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub target: Target,
    /// Most recent first.
    pub items: Vec<Item>,
    pub previous_watermark: Option<String>,
    pub watermark: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl CrawlReport {
    pub fn item_ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.id.as_str()).collect()
    }
}

#[derive(Debug, Default)]
struct Scan {
    fresh: Vec<Item>,
    top: Option<String>,
}

pub struct TargetCrawler {
    extractor: Arc<dyn PageExtractor>,
    config: CrawlSection,
    metrics: Arc<Mutex<MonitorMetrics>>,
}

impl TargetCrawler {
    pub fn new(
        extractor: Arc<dyn PageExtractor>,
        config: CrawlSection,
        metrics: Arc<Mutex<MonitorMetrics>>,
    ) -> Self {
        Self {
            extractor,
            config,
            metrics,
        }
    }

    pub fn default_limit(&self) -> usize {
        self.config.item_limit
    }

    /// Reports items newer than the stored watermark and advances it to the
    /// topmost non-pinned item.
    pub async fn crawl(
        &self,
        session: &dyn BrowserSession,
        target: &Target,
        limit: usize,
        ledger: &Mutex<WatermarkLedger>,
    ) -> BrowserResult<CrawlReport> {
        let previous = ledger.lock().unwrap().get(target).map(str::to_string);
        if limit == 0 {
            return Ok(CrawlReport {
                target: target.clone(),
                items: Vec::new(),
                watermark: previous.clone(),
                previous_watermark: previous,
                checked_at: Utc::now(),
            });
        }

        info!(target = %target, limit, watermark = ?previous, "crawling target");
        let result = self.crawl_page(session, target, limit, previous.as_deref()).await;
        let scan = match result {
            Ok(scan) => scan,
            Err(err) => {
                self.metrics.lock().unwrap().record_crawl(false);
                return Err(err);
            }
        };

        let watermark = match &scan.top {
            Some(top) => {
                let mut ledger = ledger.lock().unwrap();
                match ledger.advance(target, top) {
                    Ok(true) => self.metrics.lock().unwrap().record_watermark_write(),
                    Ok(false) => {}
                    Err(err) => {
                        warn!(target = %target, error = %err, "failed to persist watermark");
                        self.metrics.lock().unwrap().record_state_error();
                    }
                }
                Some(top.clone())
            }
            None => previous.clone(),
        };

        {
            let mut metrics = self.metrics.lock().unwrap();
            metrics.record_crawl(true);
            metrics.record_items(scan.fresh.len() as u64);
        }
        info!(
            target = %target,
            new_items = scan.fresh.len(),
            watermark = ?watermark,
            "crawl finished"
        );

        Ok(CrawlReport {
            target: target.clone(),
            items: scan.fresh,
            previous_watermark: previous,
            watermark,
            checked_at: Utc::now(),
        })
    }

    async fn crawl_page(
        &self,
        session: &dyn BrowserSession,
        target: &Target,
        limit: usize,
        previous: Option<&str>,
    ) -> BrowserResult<Scan> {
        let mut page = session.open_page().await?;
        let result = self.scan(page.as_mut(), target, limit, previous).await;
        if let Err(err) = page.close().await {
            debug!(target = %target, error = %err, "failed to close crawl page");
        }
        result
    }

    async fn scan(
        &self,
        page: &mut dyn SessionPage,
        target: &Target,
        limit: usize,
        previous: Option<&str>,
    ) -> BrowserResult<Scan> {
        page.goto(target.as_str()).await?;
        human_delay(self.config.settle_delay_ms).await;

        let selector = self.extractor.item_selector();
        let wait = self.config.marker_timeout();
        if !page.wait_for_selector(selector, wait).await? {
            return Err(BrowserError::ExtractionTimeout {
                url: target.to_string(),
                waited_ms: wait.as_millis() as u64,
            });
        }

        let available = page.snapshot_items(selector).await?;
        let mut scan = Scan::default();
        for index in 0..available.min(limit) {
            if index > 0 {
                human_delay(self.config.item_delay_ms).await;
            }
            let Some(item) = page.read_item(index, self.extractor.as_ref()).await? else {
                debug!(target = %target, index, "item without identifier, skipping");
                continue;
            };
            if item.pinned {
                debug!(target = %target, index, id = %item.id, "pinned item, skipping");
                continue;
            }
            if previous == Some(item.id.as_str()) {
                debug!(target = %target, index, id = %item.id, "reached watermark");
                break;
            }
            if scan.top.is_none() {
                scan.top = Some(item.id.clone());
            }
            scan.fresh.push(Item {
                id: item.id,
                payload: item.payload,
            });
        }
        Ok(scan)
    }
}
