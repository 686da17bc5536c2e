use std::time::Duration;

use msaudio::AudioError;
use mssource::MusicSourceError;
use thiserror::Error;

/// Errors of the broadcast core.
///
/// The first group is reported back to clients verbatim as the `reason` of a
/// failed control response.
#[derive(Debug, Error)]
pub enum StationError {
    #[error("Invalid Query!")]
    InvalidQuery,

    #[error("Bad Request")]
    BadRequest,

    #[error("Search Failed!")]
    SearchFailed(#[source] MusicSourceError),

    #[error("No Result!")]
    NoResult,

    #[error("Unknown source")]
    UnknownSource,

    #[error("Track not found")]
    TrackNotFound,

    #[error("Please wait until first {guard_secs} seconds has passed.")]
    SkipTooEarly { guard_secs: u64 },

    #[error("Nothing is playing.")]
    NothingPlaying,

    #[error("You can't skip a radio stream.")]
    SkipRadio,

    #[error("source error: {0}")]
    Source(#[from] MusicSourceError),

    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("encoder failure: {0}")]
    Encoder(String),

    #[error("pacer thread is gone")]
    PacerStopped,

    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("giving up after {failures} consecutive playback failures")]
    Watchdog { failures: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StationError {
    /// True for errors caused by the request rather than by the station.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuery
                | Self::BadRequest
                | Self::SearchFailed(_)
                | Self::NoResult
                | Self::UnknownSource
                | Self::TrackNotFound
                | Self::SkipTooEarly { .. }
                | Self::NothingPlaying
                | Self::SkipRadio
        )
    }

    /// Failures counted by the playback watchdog.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self, Self::Encoder(_) | Self::PacerStopped)
    }
}

impl StationError {
    /// Skip refusal quoting the configured guard, rounded up to the second.
    pub(crate) fn skip_too_early(guard: Duration) -> Self {
        Self::SkipTooEarly {
            guard_secs: guard.as_secs_f64().ceil() as u64,
        }
    }
}

pub type Result<T> = std::result::Result<T, StationError>;
