use std::io;

/// Errors produced by the decoder chain and the broadcast encoders.
#[derive(thiserror::Error, Debug, Clone)]
pub enum AudioError {
    #[error("I/O error ({kind:?}): {message}")]
    Io {
        kind: io::ErrorKind,
        message: String,
    },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("internal channel closed unexpectedly")]
    ChannelClosed,
    #[error("{role} task failed: {details}")]
    TaskJoin { role: &'static str, details: String },
}

impl AudioError {
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}

impl From<io::Error> for AudioError {
    fn from(err: io::Error) -> Self {
        AudioError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<String> for AudioError {
    fn from(value: String) -> Self {
        AudioError::Decode(value)
    }
}

impl From<&str> for AudioError {
    fn from(value: &str) -> Self {
        AudioError::Decode(value.to_owned())
    }
}

impl From<AudioError> for io::Error {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::Io { kind, message } => io::Error::new(kind, message),
            other => io::Error::other(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AudioError>;
