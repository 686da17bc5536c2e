use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use msconfig::Config;
use mssource::{SourceKind, SourceStream, StreamFormat, Track, TrackOpener};
use reqwest::{header, Client};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::{io::StreamReader, sync::CancellationToken};
use tracing::info;

use crate::{error::Result, gateway::run_gateway, models::NowPlaying};

/// The fallback radio: an endless Ogg/Vorbis stream plus its now-playing feed.
#[derive(Debug)]
pub struct RadioStation {
    client: Client,
    stream_url: String,
    gateway_url: String,
    now_playing: watch::Sender<NowPlaying>,
}

impl RadioStation {
    pub fn new(stream_url: impl Into<String>, gateway_url: impl Into<String>) -> Self {
        let (now_playing, _) = watch::channel(NowPlaying::default());
        Self {
            client: Client::new(),
            stream_url: stream_url.into(),
            gateway_url: gateway_url.into(),
            now_playing,
        }
    }

    /// Builds the station from `radio.*` settings.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.get_radio_stream_url(), config.get_radio_gateway_url())
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    pub fn now_playing(&self) -> NowPlaying {
        self.now_playing.borrow().clone()
    }

    /// Receives every change of the now-playing information.
    pub fn subscribe(&self) -> watch::Receiver<NowPlaying> {
        self.now_playing.subscribe()
    }

    /// Starts following the gateway until `cancel` fires.
    pub fn spawn_gateway(&self, cancel: CancellationToken) -> JoinHandle<()> {
        info!(url = %self.gateway_url, "radio: following gateway");
        tokio::spawn(run_gateway(
            self.gateway_url.clone(),
            self.now_playing.clone(),
            cancel,
        ))
    }

    /// Opens the live audio stream.
    pub async fn open_stream(&self) -> Result<SourceStream> {
        let response = self
            .client
            .get(&self.stream_url)
            .header(header::ACCEPT, "*/*")
            .header(header::ACCEPT_ENCODING, "identity;q=1, *;q=0")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::RANGE, "bytes=0-")
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(SourceStream::new(
            StreamReader::new(Box::pin(body)),
            StreamFormat::Vorbis,
        ))
    }

    /// Track descriptor for the current radio state.
    pub fn track(self: &Arc<Self>) -> Track {
        Self::track_from(&self.now_playing(), self.clone())
    }

    /// Track descriptor built from a now-playing snapshot.
    pub fn track_from(now: &NowPlaying, station: Arc<Self>) -> Track {
        Track::new(SourceKind::Radio, now.id.to_string(), now.title.clone())
            .with_artist(now.artist.clone())
            .with_artists(now.artists.clone())
            .with_album(now.album.clone())
            .with_opener(station)
    }
}

#[async_trait]
impl TrackOpener for RadioStation {
    async fn open(&self) -> mssource::Result<SourceStream> {
        Ok(self.open_stream().await?)
    }
}
