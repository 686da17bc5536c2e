//! Error types for the radio source

/// Result type alias for radio operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Websocket transport failed
    #[error("Gateway error: {0}")]
    Gateway(#[from] tokio_tungstenite::tungstenite::Error),

    /// The gateway sent something we do not understand
    #[error("Unexpected gateway payload: {0}")]
    Protocol(String),
}

impl From<Error> for mssource::MusicSourceError {
    fn from(err: Error) -> Self {
        match err {
            Error::Http(e) => mssource::MusicSourceError::Http(e),
            other => mssource::MusicSourceError::SourceUnavailable(other.to_string()),
        }
    }
}
