use thiserror::Error;

/// Everything that can go wrong while fetching, rendering or archiving a
/// single link. `NoReturn` and `RobotsDisallowed` are control signals, not
/// faults: the per-link pipeline matches on them to drop or skip the URL.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("proxy error: {0}")]
    Proxy(String),

    /// No proxy registered for this link's kind.
    #[error("unsupported link: {0}")]
    UnsupportedLink(String),

    /// The host OS cannot run the proxy daemon (or the browser binary).
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("unsupported proxy: {0}")]
    UnsupportedProxy(String),

    #[error("robots disallowed: {0}")]
    RobotsDisallowed(String),

    /// A site hook handled the link out-of-band; do not continue the
    /// default pipeline. `drop` also removes the link from its queue.
    #[error("no return for {url}")]
    NoReturn { url: String, drop: bool },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// Transient failures get the URL re-enqueued with its score unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, CrawlError::Network(_) | CrawlError::Timeout(_))
    }
}

impl From<std::io::Error> for CrawlError {
    fn from(err: std::io::Error) -> Self {
        CrawlError::Storage(err.to_string())
    }
}

/// Result of a registered round hook.
#[derive(Error, Debug)]
pub enum HookError {
    /// Finish the current round, then exit the worker loop.
    #[error("worker break requested")]
    Break,

    /// The hook itself failed; logged and ignored, other hooks still run.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}
