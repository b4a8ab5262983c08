pub mod browser;
pub mod config;
pub mod error;
pub mod monitor;
pub mod pacing;
pub mod queue;
pub mod sink;
pub mod state;

pub use browser::{
    AuthOutcome, AuthState, BrowserError, BrowserResult, CrawlReport, Item, MonitorMetrics,
};
pub use config::{load_monitor_config, MonitorConfig};
pub use error::{ConfigError, Result};
pub use monitor::{MonitorService, MonitorServiceBuilder};
pub use queue::{CrawlQueue, CrawlRequest};
pub use sink::{ChannelSink, ItemSink, LogSink};
pub use state::{JsonFileStore, MemoryStore, Target, WatermarkLedger, WatermarkStore, Watermarks};
