use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Timed out fetching {0}")]
    Timeout(String),

    #[error("Too many redirects while fetching {0}")]
    TooManyRedirects(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid post reference: {0}")]
    InvalidPostRef(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid feed: {0}")]
    InvalidFeed(String),

    #[error("Sync already in progress for {0}")]
    SyncInProgress(String),

    #[error("Feed not found: {0}")]
    FeedNotFound(String),

    #[error("Post not found: {0}")]
    PostNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// True for failures that only defer a feed to the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::Http(_)
                | RelayError::HttpStatus { .. }
                | RelayError::Timeout(_)
                | RelayError::TooManyRedirects(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
