mod auth;
mod automation;
mod crawler;
mod error;
mod extractor;
mod metrics;
mod process;
mod session;

pub use auth::{AuthOutcome, AuthState, Authenticator};
pub use automation::{BrowserAutomation, BrowserLauncher, BrowserPage};
pub use crawler::{CrawlReport, Item, TargetCrawler};
pub use error::{BrowserError, BrowserResult};
pub use extractor::{ExtractedItem, PageExtractor, TweetExtractor};
pub use metrics::MonitorMetrics;
pub use process::{free_port, ChromeProcess, ProcessManager, CHROME_PATH_ENV};
pub use session::{BrowserSession, SessionLauncher, SessionPage};
