//! YouTube catalog.
//!
//! Videos are looked up with the YouTube Data API (developer key required).
//! The audio itself is resolved through an Invidious-compatible video API,
//! which lists the adaptive formats of a video; the best WebM audio one is
//! streamed.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    http::{streaming_client, HttpOpener},
    MusicSource, MusicSourceError, Result, SourceKind, StreamFormat, Track,
};

const YOUTUBE_API_URL: &str = "https://www.googleapis.com/youtube/v3";
const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: VideoId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoId {
    video_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    #[serde(default)]
    channel_title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    #[serde(default)]
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
    #[serde(default)]
    length_seconds: u32,
    #[serde(default)]
    adaptive_formats: Vec<AdaptiveFormat>,
}

#[derive(Debug, Deserialize)]
struct AdaptiveFormat {
    url: String,
    #[serde(default, rename = "type")]
    mime: String,
    #[serde(default)]
    bitrate: Value,
}

impl AdaptiveFormat {
    fn is_webm_audio(&self) -> bool {
        self.mime.starts_with("audio/webm")
    }

    /// Invidious reports the bitrate as a string.
    fn bitrate(&self) -> u64 {
        match &self.bitrate {
            Value::Number(n) => n.as_u64().unwrap_or_default(),
            Value::String(s) => s.parse().unwrap_or_default(),
            _ => 0,
        }
    }
}

/// Undoes the entity escaping of Data API titles.
fn unescape_html(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[derive(Debug, Clone)]
pub struct YoutubeSource {
    client: Client,
    stream_client: Client,
    developer_key: String,
    api_url: String,
    stream_api_url: String,
}

impl YoutubeSource {
    pub fn new(developer_key: impl Into<String>, stream_api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            stream_client: streaming_client(),
            developer_key: developer_key.into(),
            api_url: YOUTUBE_API_URL.to_string(),
            stream_api_url: stream_api_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Points the Data API calls at another host (tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

#[async_trait]
impl MusicSource for YoutubeSource {
    fn name(&self) -> &str {
        "YouTube"
    }

    fn id(&self) -> &str {
        "youtube"
    }

    fn selector(&self) -> SourceKind {
        SourceKind::Youtube
    }

    async fn search(&self, query: &str) -> Result<Vec<Track>> {
        let response: SearchResponse = self
            .client
            .get(format!("{}/search", self.api_url))
            .query(&[
                ("key", self.developer_key.as_str()),
                ("part", "id,snippet"),
                ("maxResults", "1"),
                ("type", "video"),
                ("q", query),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(query, found = response.items.len(), "youtube search");

        Ok(response
            .items
            .into_iter()
            .map(|item| {
                let channel = unescape_html(&item.snippet.channel_title);
                let mut track = Track::new(
                    SourceKind::Youtube,
                    item.id.video_id.clone(),
                    unescape_html(&item.snippet.title),
                )
                .with_artist(channel.clone())
                .with_artists(channel)
                .with_href(format!("{WATCH_URL}{}", item.id.video_id));
                if let Some(thumbnail) = item.snippet.thumbnails.default {
                    track = track.with_cover(thumbnail.url);
                }
                track
            })
            .collect())
    }

    async fn populate(&self, track: &mut Track) -> Result<()> {
        let details: VideoDetails = self
            .client
            .get(format!("{}/api/v1/videos/{}", self.stream_api_url, track.id))
            .query(&[("fields", "lengthSeconds,adaptiveFormats")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let format = details
            .adaptive_formats
            .into_iter()
            .filter(AdaptiveFormat::is_webm_audio)
            .max_by_key(AdaptiveFormat::bitrate)
            .ok_or_else(|| {
                MusicSourceError::SourceUnavailable(format!("no audio format for {}", track.id))
            })?;
        if details.length_seconds > 0 {
            track.duration = details.length_seconds;
        }
        debug!(id = %track.id, bitrate = format.bitrate(), "youtube track populated");

        track.set_opener(Arc::new(HttpOpener::new(
            self.stream_client.clone(),
            format.url,
            StreamFormat::WebM,
        )));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_title() {
        assert_eq!(
            unescape_html("Tom &amp; Jerry &quot;Live&quot; &#39;99"),
            "Tom & Jerry \"Live\" '99"
        );
    }

    #[test]
    fn test_bitrate_accepts_strings() {
        let format: AdaptiveFormat = serde_json::from_value(serde_json::json!({
            "url": "https://x", "type": "audio/webm; codecs=\"opus\"", "bitrate": "160000"
        }))
        .unwrap();
        assert!(format.is_webm_audio());
        assert_eq!(format.bitrate(), 160_000);
    }
}
