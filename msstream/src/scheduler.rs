//! Playback scheduler.
//!
//! Pops tracks off the queue and plays them one at a time while holding the
//! stream lock, falls back to the radio when the queue is empty, and turns
//! pacer events into track announcements. Each playback runs under a panic
//! guard; too many consecutive failures end the scheduler with
//! [`StationError::Watchdog`].

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use msaudio::{PcmStream, decode_stream};
use msradio::{NowPlaying, RadioStation};
use mssource::Track;
use tokio::sync::{OwnedMutexGuard, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, StationError},
    pacer::PacerEvent,
    producer::{self, Feed},
    station::{SkipRequest, Station},
};

/// The producer run currently feeding the pacer.
struct Run {
    ticket: u64,
    quit: CancellationToken,
}

pub(crate) struct Scheduler {
    station: Arc<Station>,
    events: mpsc::UnboundedReceiver<PacerEvent>,
    skips: mpsc::Receiver<SkipRequest>,
    current: Option<Run>,
    failures: usize,
}

impl Scheduler {
    pub(crate) fn new(
        station: Arc<Station>,
        events: mpsc::UnboundedReceiver<PacerEvent>,
        skips: mpsc::Receiver<SkipRequest>,
    ) -> Self {
        Self {
            station,
            events,
            skips,
            current: None,
            failures: 0,
        }
    }

    /// Main loop. Returns on shutdown, or with an error once the watchdog
    /// limit is reached.
    pub(crate) async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let limit = self.station.options().watchdog_max_failures;
        while !cancel.is_cancelled() {
            let outcome = AssertUnwindSafe(self.iteration(&cancel))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => self.failures = 0,
                Ok(Err(e)) if e.is_fatal() => {
                    self.failures += 1;
                    error!(failures = self.failures, "playback failed: {}", e);
                }
                Ok(Err(e)) => warn!("playback skipped: {}", e),
                Err(panic) => {
                    self.failures += 1;
                    error!(
                        failures = self.failures,
                        "playback panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
            self.abort_current();

            if self.failures >= limit {
                error!("watchdog: {} consecutive failures, giving up", self.failures);
                return Err(StationError::Watchdog {
                    failures: self.failures,
                });
            }
        }
        info!("scheduler stopped");
        Ok(())
    }

    async fn iteration(&mut self, cancel: &CancellationToken) -> Result<()> {
        let station = self.station.clone();
        if station.queue().is_empty() {
            if let Some(radio) = station.radio().cloned() {
                return self.play_radio(radio, cancel).await;
            }
            if station.playback().started.is_some() {
                station.set_idle();
            }
        }

        let track = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            track = station.queue().pop() => track,
        };
        self.play_track(track, cancel).await
    }

    async fn lock(&self, cancel: &CancellationToken) -> Option<OwnedMutexGuard<()>> {
        let lock = self.station.stream_lock().clone();
        tokio::select! {
            _ = cancel.cancelled() => None,
            guard = lock.lock_owned() => Some(guard),
        }
    }

    /// Skips sent while nothing was playing are obsolete.
    fn drain_skips(&mut self) {
        while let Ok(request) = self.skips.try_recv() {
            debug!(?request, "dropping stale skip request");
        }
    }

    fn abort_current(&mut self) {
        if let Some(run) = self.current.take() {
            run.quit.cancel();
            self.station.pacer().discard(run.ticket);
        }
    }

    fn start_run(&mut self) -> (Feed, u64, CancellationToken) {
        let pacer = self.station.pacer();
        let ticket = pacer.next_ticket();
        let quit = CancellationToken::new();
        let feed = Feed::new(
            ticket,
            pacer.sender(),
            quit.clone(),
            self.station.options().silence_windows,
        );
        self.current = Some(Run {
            ticket,
            quit: quit.clone(),
        });
        (feed, ticket, quit)
    }

    async fn play_track(&mut self, track: Track, cancel: &CancellationToken) -> Result<()> {
        let station = self.station.clone();
        let Some(_guard) = self.lock(cancel).await else {
            return Ok(());
        };
        self.drain_skips();

        if let Some(provider) = station.lyrics().filter(|_| track.lyrics().is_none()) {
            match provider.fetch(&track.metadata()).await {
                Ok(lyrics) => track.set_lyrics(lyrics),
                Err(e) => debug!("no lyrics for {}: {}", track.title, e),
            }
        }

        let Some(pcm) = self.prepare(&track, cancel).await? else {
            return Ok(());
        };

        let (feed, ticket, quit) = self.start_run();
        let producer = producer::spawn_track(feed, track.title.clone(), pcm);
        let result = self.follow(ticket, &quit, track, None, cancel).await;
        station.end_track();
        if result.is_ok() {
            self.current = None;
        }
        producer.abort();
        result
    }

    /// Opens and decodes the track. `None` when shutdown or a skip arrives
    /// first; a stalled catalog never holds the stream lock past either.
    async fn prepare(
        &mut self,
        track: &Track,
        cancel: &CancellationToken,
    ) -> Result<Option<PcmStream>> {
        let opening = async {
            let source = track.open().await?;
            debug!(format = %source.format, "decoding {}", track.title);
            Ok::<_, StationError>(decode_stream(source.reader, source.format).await?)
        };
        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            request = self.skips.recv() => {
                info!(?request, "abandoning {} while it opens", track.title);
                Ok(None)
            }
            pcm = opening => pcm.map(Some),
        }
    }

    async fn play_radio(&mut self, radio: Arc<RadioStation>, cancel: &CancellationToken) -> Result<()> {
        let station = self.station.clone();
        let Some(_guard) = self.lock(cancel).await else {
            return Ok(());
        };
        if !station.queue().is_empty() {
            return Ok(());
        }
        self.drain_skips();
        info!("queue is empty, switching to the radio");

        let gateway_cancel = cancel.child_token();
        let gateway = radio.spawn_gateway(gateway_cancel.clone());

        let (feed, ticket, quit) = self.start_run();
        let producer = producer::spawn_radio(feed, radio.clone());
        let result = self
            .follow(ticket, &quit, radio.track(), Some(radio), cancel)
            .await;
        station.end_track();
        if result.is_ok() {
            self.current = None;
        }

        gateway_cancel.cancel();
        let _ = gateway.await;
        producer.abort();
        info!("Resuming track streaming");
        result
    }

    /// Follows one producer run until the pacer reports its end.
    async fn follow(
        &mut self,
        ticket: u64,
        quit: &CancellationToken,
        track: Track,
        radio: Option<Arc<RadioStation>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let station = self.station.clone();
        let Self { events, skips, .. } = self;
        let mut pending = Some(track);
        let mut updates = radio.as_ref().map(|radio| radio.subscribe());
        let mut stopping = false;

        let stop = |reason: &str| {
            info!(ticket, "stopping playback: {}", reason);
            quit.cancel();
            station.pacer().discard(ticket);
        };

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    None => return Err(StationError::PacerStopped),
                    Some(PacerEvent::TrackStarted { ticket: t, positions }) if t == ticket => {
                        if let Some(track) = pending.take() {
                            // La radio a pu changer de morceau pendant le silence
                            let track = match &radio {
                                Some(radio) => radio.track(),
                                None => track,
                            };
                            station.start_track(track, radio.is_some(), positions);
                        }
                    }
                    Some(PacerEvent::TrackEnded { ticket: t }) if t == ticket => return Ok(()),
                    Some(PacerEvent::Failed { ticket: t, reason }) if t == ticket => {
                        quit.cancel();
                        station.pacer().discard(ticket);
                        return Err(StationError::Encoder(reason));
                    }
                    Some(stale) => debug!(?stale, "ignoring event of a previous run"),
                },
                request = skips.recv(), if !stopping => match request {
                    Some(SkipRequest::User) if radio.is_some() => {
                        debug!("user skip ignored while the radio plays");
                    }
                    Some(request) => {
                        stopping = true;
                        stop(if request == SkipRequest::Standby { "standby" } else { "skip" });
                    }
                    None => {}
                },
                _ = station.queue().wait_non_empty(), if radio.is_some() && !stopping => {
                    stopping = true;
                    stop("track enqueued");
                }
                now = next_update(&mut updates), if pending.is_none() && !stopping => {
                    if let Some(radio) = &radio {
                        debug!("radio now playing {} - {}", now.artist, now.title);
                        station.update_radio_track(RadioStation::track_from(&now, radio.clone()));
                    }
                }
                _ = cancel.cancelled(), if !stopping => {
                    stopping = true;
                    stop("shutdown");
                }
            }
        }
    }
}

/// Next now-playing change; never resolves once the feed is gone.
async fn next_update(updates: &mut Option<watch::Receiver<NowPlaying>>) -> NowPlaying {
    let changed = match updates.as_mut() {
        Some(rx) => rx
            .changed()
            .await
            .map(|_| rx.borrow_and_update().clone()),
        None => return std::future::pending().await,
    };
    match changed {
        Ok(now) => now,
        Err(_) => {
            *updates = None;
            std::future::pending().await
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 42)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 42");
        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }

    #[tokio::test]
    async fn test_next_update_tracks_changes() {
        let (tx, rx) = watch::channel(NowPlaying::default());
        let mut updates = Some(rx);
        tx.send_modify(|now| now.title = "Song".to_string());
        assert_eq!(next_update(&mut updates).await.title, "Song");

        drop(tx);
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            next_update(&mut updates),
        )
        .await;
        assert!(pending.is_err());
        assert!(updates.is_none());
    }
}
