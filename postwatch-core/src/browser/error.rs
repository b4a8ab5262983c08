use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("no browser binary found (searched: {searched})")]
    BinaryNotFound { searched: String },
    #[error("browser launch failed: {0}")]
    LaunchFailed(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },
    #[error("no items appeared on {url} within {waited_ms}ms")]
    ExtractionTimeout { url: String, waited_ms: u64 },
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("debug endpoint error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BrowserError {
    /// Crawl failures that only affect one target.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            BrowserError::NavigationFailed { .. }
                | BrowserError::ExtractionTimeout { .. }
                | BrowserError::Cdp(_)
                | BrowserError::Unexpected(_)
        )
    }
}
