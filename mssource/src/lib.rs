//! # mssource
//!
//! Track descriptors and the source-adapter capability consumed by the
//! MusicStream pipeline.
//!
//! A [`MusicSource`] turns a free-text query into [`Track`]s, then
//! *populates* the chosen track so that [`Track::open`] yields a byte stream
//! and its container format. Built-in adapters: [`CsnSource`],
//! [`YoutubeSource`] and [`HttpSource`] for direct URLs.
//!
//! ```rust,no_run
//! use mssource::{HttpSource, MusicSource};
//!
//! # async fn demo() -> mssource::Result<()> {
//! let source = HttpSource::new();
//! let mut tracks = source.search("https://example.com/song.mp3").await?;
//! let mut track = tracks.remove(0);
//! source.populate(&mut track).await?;
//! let stream = track.open().await?;
//! println!("{}", stream.format);
//! # Ok(())
//! # }
//! ```

mod csn;
mod error;
mod http;
pub mod lyrics;
mod track;
mod youtube;

use std::{fmt::Debug, sync::Arc};

use serde::{Deserialize, Serialize};

pub use csn::CsnSource;
pub use error::{MusicSourceError, Result};
pub use http::HttpSource;
pub use lyrics::{LyricsProvider, MusixmatchClient};
pub use msaudio::StreamFormat;
pub use track::{
    generate_id, LyricsLine, LyricsResult, LyricsTime, SourceStream, Track, TrackMetadata,
    TrackOpener,
};
pub use youtube::YoutubeSource;

/// Numeric source selector used by clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SourceKind {
    #[default]
    Radio,
    Deezer,
    Csn,
    Youtube,
    Url,
}

impl From<SourceKind> for u8 {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Radio => 0,
            SourceKind::Deezer => 1,
            SourceKind::Csn => 2,
            SourceKind::Youtube => 3,
            SourceKind::Url => 4,
        }
    }
}

impl TryFrom<u8> for SourceKind {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(SourceKind::Radio),
            1 => Ok(SourceKind::Deezer),
            2 => Ok(SourceKind::Csn),
            3 => Ok(SourceKind::Youtube),
            4 => Ok(SourceKind::Url),
            other => Err(format!("unknown source selector {other}")),
        }
    }
}

impl SourceKind {
    /// Parses the identifier adapters report through [`MusicSource::id`].
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "radio" => Some(SourceKind::Radio),
            "deezer" => Some(SourceKind::Deezer),
            "csn" => Some(SourceKind::Csn),
            "youtube" => Some(SourceKind::Youtube),
            "url" => Some(SourceKind::Url),
            _ => None,
        }
    }
}

/// Main trait for source adapters.
///
/// All implementations must be `Send + Sync` for use in the HTTP handlers.
#[async_trait::async_trait]
pub trait MusicSource: Debug + Send + Sync {
    /// Human-readable name (`"Deezer"`).
    fn name(&self) -> &str;

    /// Stable identifier (`"deezer"`).
    fn id(&self) -> &str;

    /// Selector clients use to pick this source.
    fn selector(&self) -> SourceKind;

    /// Looks tracks up. The best match comes first.
    async fn search(&self, _query: &str) -> Result<Vec<Track>> {
        Err(MusicSourceError::SearchNotSupported)
    }

    /// Resolves what is needed to stream the track.
    async fn populate(&self, _track: &mut Track) -> Result<()> {
        Ok(())
    }
}

/// Public description of a registered source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub selector: SourceKind,
    pub id: String,
    pub name: String,
}

/// Sources known to the server, indexed by selector.
#[derive(Debug, Default, Clone)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn MusicSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `source`, replacing any source with the same selector.
    pub fn register(&mut self, source: Arc<dyn MusicSource>) {
        self.sources.retain(|s| s.selector() != source.selector());
        tracing::info!(id = source.id(), "source registered");
        self.sources.push(source);
    }

    pub fn get(&self, selector: SourceKind) -> Option<Arc<dyn MusicSource>> {
        self.sources
            .iter()
            .find(|s| s.selector() == selector)
            .cloned()
    }

    pub fn list(&self) -> Vec<SourceInfo> {
        self.sources
            .iter()
            .map(|s| SourceInfo {
                selector: s.selector(),
                id: s.id().to_string(),
                name: s.name().to_string(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
