use thiserror::Error;

/// How the pagination loop should react to a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection trouble or timeouts. Skip the rest of this source.
    Transient,
    /// A bot-defence interstitial. Cool down and retry once.
    Blocked,
    /// Anything the source will keep answering the same way.
    Terminal,
    Cancelled,
}

/// Errors raised while fetching a page from a source.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Blocked by bot protection at {url}: {signature}")]
    Blocked { url: String, signature: String },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Cancelled")]
    Cancelled,
}

impl ScrapeError {
    pub fn blocked(url: impl Into<String>, signature: impl Into<String>) -> Self {
        ScrapeError::Blocked {
            url: url.into(),
            signature: signature.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ScrapeError::Network(_) => FailureKind::Transient,
            ScrapeError::Blocked { .. } => FailureKind::Blocked,
            ScrapeError::Http { .. } => FailureKind::Terminal,
            ScrapeError::Browser(_) => FailureKind::Transient,
            ScrapeError::InvalidResponse(_) => FailureKind::Terminal,
            ScrapeError::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl From<anyhow::Error> for ScrapeError {
    fn from(err: anyhow::Error) -> Self {
        ScrapeError::Browser(format!("{:#}", err))
    }
}
