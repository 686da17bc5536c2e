//! Track descriptors and their JSON snapshot.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use msaudio::StreamFormat;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::{MusicSourceError, Result, SourceKind};

const ID_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";

/// Generates a short identifier (play-ids, session cookies).
///
/// Eight random bytes, each mapped onto an alphabet without look-alike
/// characters.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| ID_ALPHABET[*b as usize % ID_ALPHABET.len()] as char)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LyricsTime {
    pub hundredths: i32,
    pub minutes: i32,
    pub seconds: i32,
    pub total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LyricsLine {
    pub text: String,
    pub translated: String,
    pub time: LyricsTime,
    pub original: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LyricsResult {
    #[serde(rename = "txt")]
    pub raw: String,
    #[serde(rename = "lrc")]
    pub synced: Vec<LyricsLine>,
    #[serde(rename = "lang")]
    pub language: String,
}

/// Flattened track information shipped to clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackMetadata {
    pub title: String,
    pub source: SourceKind,
    pub duration: u32,
    pub artist: String,
    pub artists: String,
    pub album: String,
    pub cover: String,
    pub lyrics: LyricsResult,
    #[serde(rename = "playId")]
    pub play_id: String,
    #[serde(rename = "spotifyURI")]
    pub spotify_uri: String,
    pub id: String,
    pub href: String,
}

/// A readable audio byte stream together with its container.
pub struct SourceStream {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub format: StreamFormat,
}

impl SourceStream {
    pub fn new<R>(reader: R, format: StreamFormat) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            format,
        }
    }
}

impl fmt::Debug for SourceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceStream")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Opens a fresh byte stream for a track. Called once per playback.
#[async_trait]
pub trait TrackOpener: Send + Sync {
    async fn open(&self) -> Result<SourceStream>;
}

/// A playable track.
///
/// Cloning is cheap and clones share the lyrics slot, so lyrics fetched
/// after enqueue are visible from every copy.
#[derive(Clone)]
pub struct Track {
    pub id: String,
    pub source: SourceKind,
    pub title: String,
    pub artist: String,
    pub artists: String,
    pub album: String,
    pub cover: String,
    /// Declared duration in seconds, 0 when unknown.
    pub duration: u32,
    pub isrc: String,
    pub href: String,
    pub spotify_uri: String,
    play_id: String,
    lyrics: Arc<RwLock<Option<LyricsResult>>>,
    opener: Option<Arc<dyn TrackOpener>>,
}

impl Track {
    pub fn new(source: SourceKind, id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source,
            title: title.into(),
            artist: String::new(),
            artists: String::new(),
            album: String::new(),
            cover: String::new(),
            duration: 0,
            isrc: String::new(),
            href: String::new(),
            spotify_uri: String::new(),
            play_id: String::new(),
            lyrics: Arc::new(RwLock::new(None)),
            opener: None,
        }
    }

    /// Placeholder shown while nothing is playing.
    pub fn idle() -> Self {
        Self::new(SourceKind::Radio, "0", "Idling, nothing is in queue")
            .with_artist("Please enqueue some songs")
    }

    /// Sets the primary artist; `artists` follows when still empty.
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        if self.artists.is_empty() {
            self.artists = self.artist.clone();
        }
        self
    }

    pub fn with_artists(mut self, artists: impl Into<String>) -> Self {
        self.artists = artists.into();
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = album.into();
        self
    }

    pub fn with_cover(mut self, cover: impl Into<String>) -> Self {
        self.cover = cover.into();
        self
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration = seconds;
        self
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = href.into();
        self
    }

    pub fn with_isrc(mut self, isrc: impl Into<String>) -> Self {
        self.isrc = isrc.into();
        self
    }

    pub fn with_spotify_uri(mut self, uri: impl Into<String>) -> Self {
        self.spotify_uri = uri.into();
        self
    }

    pub fn with_opener(mut self, opener: Arc<dyn TrackOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn set_opener(&mut self, opener: Arc<dyn TrackOpener>) {
        self.opener = Some(opener);
    }

    pub fn is_populated(&self) -> bool {
        self.opener.is_some()
    }

    pub fn play_id(&self) -> &str {
        &self.play_id
    }

    /// Gives the track a fresh play-id. Done once, at enqueue time.
    pub fn assign_play_id(&mut self) -> &str {
        self.play_id = generate_id();
        &self.play_id
    }

    pub fn lyrics(&self) -> Option<LyricsResult> {
        self.lyrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_lyrics(&self, lyrics: LyricsResult) {
        *self.lyrics.write().unwrap_or_else(PoisonError::into_inner) = Some(lyrics);
    }

    pub fn metadata(&self) -> TrackMetadata {
        TrackMetadata {
            title: self.title.clone(),
            source: self.source,
            duration: self.duration,
            artist: self.artist.clone(),
            artists: self.artists.clone(),
            album: self.album.clone(),
            cover: self.cover.clone(),
            lyrics: self.lyrics().unwrap_or_default(),
            play_id: self.play_id.clone(),
            spotify_uri: self.spotify_uri.clone(),
            id: self.id.clone(),
            href: self.href.clone(),
        }
    }

    /// Opens the audio stream of the track.
    pub async fn open(&self) -> Result<SourceStream> {
        match &self.opener {
            Some(opener) => opener.open().await,
            None => Err(MusicSourceError::NotPopulated),
        }
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("title", &self.title)
            .field("artist", &self.artist)
            .field("play_id", &self.play_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_alphabet() {
        let id = generate_id();
        assert_eq!(id.len(), 8);
        assert!(id.bytes().all(|b| ID_ALPHABET.contains(&b)));
        assert_ne!(generate_id(), generate_id());
    }

    #[test]
    fn test_metadata_key_order() {
        let track = Track::new(SourceKind::Url, "42", "Song")
            .with_artist("Someone")
            .with_duration(180);
        let json = serde_json::to_string(&track.metadata()).unwrap();
        let keys = [
            "\"title\"",
            "\"source\"",
            "\"duration\"",
            "\"artist\"",
            "\"artists\"",
            "\"album\"",
            "\"cover\"",
            "\"lyrics\"",
            "\"playId\"",
            "\"spotifyURI\"",
            "\"id\"",
            "\"href\"",
        ];
        let positions: Vec<usize> = keys.iter().map(|k| json.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{json}");
        assert!(json.contains("\"source\":4"));
    }

    #[test]
    fn test_metadata_roundtrip() {
        let track = Track::idle();
        track.set_lyrics(LyricsResult {
            raw: "la la".into(),
            synced: vec![LyricsLine {
                text: "la".into(),
                time: LyricsTime {
                    total: 1.5,
                    seconds: 1,
                    hundredths: 50,
                    minutes: 0,
                },
                ..Default::default()
            }],
            language: "en".into(),
        });
        let meta = track.metadata();
        let back: TrackMetadata = serde_json::from_str(&serde_json::to_string(&meta).unwrap()).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.artists, "Please enqueue some songs");
    }

    #[test]
    fn test_clones_share_lyrics() {
        let track = Track::new(SourceKind::Deezer, "1", "x");
        let copy = track.clone();
        track.set_lyrics(LyricsResult::default());
        assert!(copy.lyrics().is_some());
    }

    #[tokio::test]
    async fn test_open_without_opener() {
        let track = Track::new(SourceKind::Url, "1", "x");
        assert!(matches!(track.open().await, Err(MusicSourceError::NotPopulated)));
    }
}
