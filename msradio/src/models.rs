//! Gateway payloads.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

pub(crate) const OP_HELLO: u8 = 0;
pub(crate) const OP_PLAYBACK: u8 = 1;

/// Heartbeat frame expected by the gateway.
pub const HEARTBEAT_FRAME: &str = r#"{"op":9}"#;

/// Title shown when the gateway is unreachable.
pub const RADIO_NAME: &str = "listen.moe";

#[derive(Debug, Deserialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Option<Value>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hello {
    heartbeat: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Song {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    albums: Vec<Named>,
    #[serde(default)]
    artists: Vec<Named>,
    #[serde(default)]
    duration: u32,
}

#[derive(Debug, Deserialize)]
struct Playback {
    song: Song,
}

/// What the radio is playing right now.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub artists: String,
    pub album: String,
    pub duration: u32,
}

impl Default for NowPlaying {
    fn default() -> Self {
        Self {
            id: 0,
            title: RADIO_NAME.to_string(),
            artist: String::new(),
            artists: String::new(),
            album: String::new(),
            duration: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Hello { heartbeat: Duration },
    TrackUpdate(NowPlaying),
}

impl GatewayMessage {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Interprets the message. Unknown or irrelevant messages yield `None`.
    pub fn event(self, previous: &NowPlaying) -> Result<Option<GatewayEvent>> {
        let Some(data) = self.d else {
            return Ok(None);
        };
        match self.op {
            OP_HELLO => {
                let hello: Hello = serde_json::from_value(data)?;
                if hello.heartbeat == 0 {
                    return Err(Error::Protocol("zero heartbeat interval".into()));
                }
                Ok(Some(GatewayEvent::Hello {
                    heartbeat: Duration::from_millis(hello.heartbeat),
                }))
            }
            OP_PLAYBACK => {
                if !matches!(
                    self.t.as_deref(),
                    Some("TRACK_UPDATE") | Some("TRACK_UPDATE_REQUEST")
                ) {
                    return Ok(None);
                }
                let playback: Playback = serde_json::from_value(data)?;
                let song = playback.song;
                let mut now = NowPlaying {
                    id: song.id,
                    title: song.title,
                    duration: song.duration,
                    // album/artists absents : on garde les précédents
                    album: previous.album.clone(),
                    artist: previous.artist.clone(),
                    artists: previous.artists.clone(),
                };
                if let Some(album) = song.albums.first() {
                    now.album = album.name.clone();
                }
                if let Some(first) = song.artists.first() {
                    now.artist = first.name.clone();
                    now.artists = song
                        .artists
                        .iter()
                        .map(|a| a.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                }
                Ok(Some(GatewayEvent::TrackUpdate(now)))
            }
            _ => Ok(None),
        }
    }
}
