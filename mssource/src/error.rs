/// Error types for music source operations
#[derive(Debug, thiserror::Error)]
pub enum MusicSourceError {
    #[error("Source not available: {0}")]
    SourceUnavailable(String),

    #[error("Search not supported")]
    SearchNotSupported,

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Track has no stream opener")]
    NotPopulated,

    #[error("Unsupported stream: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Lyrics not found")]
    LyricsNotFound,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for music source operations
pub type Result<T> = std::result::Result<T, MusicSourceError>;
