use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::error::BrowserResult;
use super::extractor::{ExtractedItem, PageExtractor};

/// The one authenticated browser context a monitor drives.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn open_page(&self) -> BrowserResult<Box<dyn SessionPage>>;

    /// Releases the scripting connection and the browser process. Idempotent.
    async fn shutdown(&self) -> BrowserResult<()>;

    async fn is_alive(&self) -> bool;
}

/// A single tab. Callers must `close` it on every exit path.
#[async_trait]
pub trait SessionPage: Send {
    async fn goto(&mut self, url: &str) -> BrowserResult<()>;

    /// Checks at least once, even with a zero timeout.
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration)
        -> BrowserResult<bool>;

    /// Captures the current item elements and returns how many there are.
    async fn snapshot_items(&mut self, selector: &str) -> BrowserResult<usize>;

    async fn read_item(
        &mut self,
        index: usize,
        extractor: &dyn PageExtractor,
    ) -> BrowserResult<Option<ExtractedItem>>;

    async fn close(self: Box<Self>) -> BrowserResult<()>;
}

#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> BrowserResult<Arc<dyn BrowserSession>>;
}
