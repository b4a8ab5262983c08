use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorMetrics {
    pub pages_opened: u64,
    pub auth_attempts: u64,
    pub crawls_succeeded: u64,
    pub crawls_failed: u64,
    pub items_reported: u64,
    pub watermark_writes: u64,
    pub state_errors: u64,
}

impl MonitorMetrics {
    pub fn record_page_open(&mut self) {
        self.pages_opened = self.pages_opened.saturating_add(1);
    }

    pub fn record_auth_attempt(&mut self) {
        self.auth_attempts = self.auth_attempts.saturating_add(1);
    }

    pub fn record_crawl(&mut self, success: bool) {
        if success {
            self.crawls_succeeded = self.crawls_succeeded.saturating_add(1);
        } else {
            self.crawls_failed = self.crawls_failed.saturating_add(1);
        }
    }

    pub fn record_items(&mut self, count: u64) {
        self.items_reported = self.items_reported.saturating_add(count);
    }

    pub fn record_watermark_write(&mut self) {
        self.watermark_writes = self.watermark_writes.saturating_add(1);
    }

    pub fn record_state_error(&mut self) {
        self.state_errors = self.state_errors.saturating_add(1);
    }

    pub fn crawl_success_rate(&self) -> f64 {
        let total = self.crawls_succeeded + self.crawls_failed;
        if total == 0 {
            0.0
        } else {
            (self.crawls_succeeded as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_counts_both_outcomes() {
        let mut metrics = MonitorMetrics::default();
        assert_eq!(metrics.crawl_success_rate(), 0.0);
        metrics.record_crawl(true);
        metrics.record_crawl(true);
        metrics.record_crawl(true);
        metrics.record_crawl(false);
        assert_eq!(metrics.crawl_success_rate(), 75.0);
    }
}
