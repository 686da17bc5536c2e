//! Chiasenhac (CSN) catalog.
//!
//! Search goes through the site's JSON endpoint; the track page embeds the
//! player's `sources: [...]` list, from which the best MP3 file is taken.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use serde::Deserialize;
use tracing::debug;

use crate::{
    http::{streaming_client, HttpOpener},
    MusicSource, MusicSourceError, Result, SourceKind, StreamFormat, Track,
};

const CSN_BASE_URL: &str = "https://chiasenhac.vn";
const SEARCH_PATH: &str = "/search/real";
const SEARCH_ROWS: &str = "3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(9);

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    music: MusicPage,
}

#[derive(Debug, Default, Deserialize)]
struct MusicPage {
    #[serde(default)]
    data: Vec<CsnTrack>,
}

#[derive(Debug, Deserialize)]
struct CsnTrack {
    music_id: serde_json::Value,
    music_title: String,
    #[serde(default)]
    music_artist: String,
    #[serde(default)]
    music_cover: String,
    music_link: String,
}

#[derive(Debug, Deserialize)]
struct PlayerSource {
    #[serde(default)]
    file: String,
    #[serde(default, rename = "type")]
    kind: String,
}

impl CsnTrack {
    fn into_track(self) -> Track {
        let id = match self.music_id {
            serde_json::Value::String(id) => id,
            other => other.to_string(),
        };
        let artists: Vec<&str> = self.music_artist.split("; ").collect();
        Track::new(SourceKind::Csn, id, self.music_title)
            .with_artist(artists[0])
            .with_artists(artists.join(", "))
            .with_cover(self.music_cover)
            .with_href(self.music_link)
    }
}

/// Metadata requests optionally go through `proxy_url`, the site being
/// geo-restricted. Audio downloads are direct.
#[derive(Debug, Clone)]
pub struct CsnSource {
    client: Client,
    stream_client: Client,
    base_url: String,
}

impl CsnSource {
    pub fn new(proxy_url: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = proxy_url.filter(|p| !p.is_empty()) {
            builder = builder.proxy(Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            stream_client: streaming_client(),
            base_url: CSN_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Last MP3 file of the player list; later entries are the better qualities.
fn stream_url_from_page(page: &str) -> Result<String> {
    let start = page
        .find("sources: [")
        .map(|i| i + "sources: [".len())
        .ok_or_else(|| MusicSourceError::SourceUnavailable("no player sources".into()))?;
    let end = page[start..]
        .find(']')
        .map(|i| start + i)
        .ok_or_else(|| MusicSourceError::SourceUnavailable("truncated player sources".into()))?;
    let list = format!("[{}]", page[start..end].trim_matches([',', ' ', '\n', '\r', '\t']));
    let sources: Vec<PlayerSource> = serde_json::from_str(&list)?;
    sources
        .into_iter()
        .rev()
        .find(|s| s.kind == "mp3" && s.file.ends_with(".mp3"))
        .map(|s| s.file)
        .ok_or_else(|| MusicSourceError::SourceUnavailable("no stream URL found".into()))
}

/// `<span>Album: </span><a ...>Name</a>` of the track page, when present.
fn album_from_page(page: &str) -> Option<String> {
    let after = &page[page.find("Album: ")?..];
    let link = &after[after.find("<a")?..];
    let text = &link[link.find('>')? + 1..];
    let name = text[..text.find("</a>")?].trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[async_trait]
impl MusicSource for CsnSource {
    fn name(&self) -> &str {
        "Chiasenhac"
    }

    fn id(&self) -> &str {
        "csn"
    }

    fn selector(&self) -> SourceKind {
        SourceKind::Csn
    }

    async fn search(&self, query: &str) -> Result<Vec<Track>> {
        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        let results: Vec<SearchResult> = self
            .client
            .get(&url)
            .query(&[
                ("type", "json"),
                ("rows", SEARCH_ROWS),
                ("view_all", "true"),
                ("q", query),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let tracks: Vec<Track> = results
            .into_iter()
            .next()
            .map(|result| result.music.data)
            .unwrap_or_default()
            .into_iter()
            .map(CsnTrack::into_track)
            .collect();
        debug!(query, found = tracks.len(), "csn search");
        Ok(tracks)
    }

    async fn populate(&self, track: &mut Track) -> Result<()> {
        let page = self
            .client
            .get(&track.href)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let stream_url = stream_url_from_page(&page)?;
        if let Some(album) = album_from_page(&page) {
            track.album = album;
        }
        debug!(id = %track.id, url = %stream_url, "csn track populated");

        track.set_opener(Arc::new(HttpOpener::new(
            self.stream_client.clone(),
            stream_url,
            StreamFormat::Mp3,
        )));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<script>
        player.setup({
            sources: [
                {"file": "https://data.csn/128/song.mp3", "label": "128kbps", "type": "mp3"},
                {"file": "https://data.csn/320/song.mp3", "label": "320kbps", "type": "mp3"},
                {"file": "https://data.csn/flac/song.flac", "label": "Lossless", "type": "flac"},
            ],
        });
    </script>
    <li><span>Album: </span><a href="/album/x.html">Mùa Hè</a></li>"#;

    #[test]
    fn test_best_mp3_is_picked() {
        assert_eq!(
            stream_url_from_page(PAGE).unwrap(),
            "https://data.csn/320/song.mp3"
        );
        assert!(stream_url_from_page("<html></html>").is_err());
    }

    #[test]
    fn test_album_from_page() {
        assert_eq!(album_from_page(PAGE).as_deref(), Some("Mùa Hè"));
        assert_eq!(album_from_page("<li>Album</li>"), None);
    }

    #[test]
    fn test_artists_are_split() {
        let track = CsnTrack {
            music_id: serde_json::json!(42),
            music_title: "Song".into(),
            music_artist: "A; B; C".into(),
            music_cover: String::new(),
            music_link: "https://chiasenhac.vn/song.html".into(),
        }
        .into_track();
        assert_eq!(track.id, "42");
        assert_eq!(track.artist, "A");
        assert_eq!(track.artists, "A, B, C");
    }
}
