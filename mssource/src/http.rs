//! Direct URL source: the query is the address of an audio file or stream.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::{header::CONTENT_TYPE, Client};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::{
    MusicSource, MusicSourceError, Result, SourceKind, SourceStream, StreamFormat, Track,
    TrackOpener,
};

#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for audio downloads: bounded connect and per-read stalls, no
/// overall deadline since a live stream never ends.
pub(crate) fn streaming_client() -> Client {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            warn!("cannot configure HTTP timeouts: {}", e);
            Client::new()
        })
}

impl HttpSource {
    pub fn new() -> Self {
        Self::with_client(streaming_client())
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

fn title_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let file = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    let stem = file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file);
    if stem.is_empty() {
        url.to_string()
    } else {
        stem.replace(['_', '-'], " ")
    }
}

fn host_of(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split(['/', '?', '#']).next())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl MusicSource for HttpSource {
    fn name(&self) -> &str {
        "Direct link"
    }

    fn id(&self) -> &str {
        "url"
    }

    fn selector(&self) -> SourceKind {
        SourceKind::Url
    }

    async fn search(&self, query: &str) -> Result<Vec<Track>> {
        let url = query.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(MusicSourceError::InvalidQuery(format!(
                "not an http(s) URL: {url}"
            )));
        }
        let track = Track::new(SourceKind::Url, url, title_from_url(url))
            .with_artist(host_of(url))
            .with_href(url);
        Ok(vec![track])
    }

    async fn populate(&self, track: &mut Track) -> Result<()> {
        let response = self
            .client
            .head(&track.href)
            .send()
            .await?
            .error_for_status()?;
        let from_header = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(StreamFormat::from_content_type);
        let format = from_header
            .or_else(|| StreamFormat::from_url(&track.href))
            .ok_or_else(|| MusicSourceError::UnsupportedFormat(track.href.clone()))?;
        debug!(url = %track.href, %format, "url source populated");

        track.set_opener(Arc::new(HttpOpener::new(
            self.client.clone(),
            track.href.clone(),
            format,
        )));
        Ok(())
    }
}

/// Streams the body of `url` as audio of a known container.
pub(crate) struct HttpOpener {
    client: Client,
    url: String,
    format: StreamFormat,
}

impl HttpOpener {
    pub(crate) fn new(client: Client, url: impl Into<String>, format: StreamFormat) -> Self {
        Self {
            client,
            url: url.into(),
            format,
        }
    }
}

#[async_trait]
impl TrackOpener for HttpOpener {
    async fn open(&self) -> Result<SourceStream> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(SourceStream::new(
            StreamReader::new(Box::pin(body)),
            self.format,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_and_host() {
        assert_eq!(
            title_from_url("https://cdn.example.com/music/My_Song-live.mp3?x=1"),
            "My Song live"
        );
        assert_eq!(host_of("https://cdn.example.com/music/a.mp3"), "cdn.example.com");
    }

    #[tokio::test]
    async fn test_rejects_non_url() {
        let source = HttpSource::new();
        assert!(matches!(
            source.search("never gonna give you up").await,
            Err(MusicSourceError::InvalidQuery(_))
        ));
    }
}
