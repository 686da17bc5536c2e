//! Station: every piece of broadcast state, shared by the scheduler, the
//! listener sessions and the control surface.

use std::{
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use msqueue::{Queue, QueueObserver};
use msradio::RadioStation;
use mssource::{LyricsProvider, MusicSource, SourceKind, SourceRegistry, Track, TrackMetadata};
use tokio::{
    sync::{Notify, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    control::{ClientMessage, ControlHub, Response, op},
    error::{Result, StationError},
    fanout::Fanout,
    options::StationOptions,
    pacer::{PacerEvent, PacerHandle},
    pinger, standby,
    scheduler::Scheduler,
};

/// The two broadcast outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Ogg/Vorbis on `/audio`.
    Vorbis,
    /// MPEG layer III on `/fallback`.
    Mpeg,
}

impl StreamKind {
    pub fn index(self) -> usize {
        match self {
            Self::Vorbis => 0,
            Self::Mpeg => 1,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Self::Vorbis => "/audio",
            Self::Mpeg => "/fallback",
        }
    }
}

/// Why the current playback must stop early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SkipRequest {
    User,
    Standby,
}

/// What is on air.
#[derive(Debug, Clone)]
pub(crate) struct Playback {
    pub track: Track,
    pub radio: bool,
    pub started: Option<Instant>,
    /// A run is audible; false between tracks and during pre-track silence.
    pub live: bool,
    /// Vorbis and MPEG encoder positions the client aligns lyrics on.
    pub positions: [u64; 2],
}

impl Default for Playback {
    fn default() -> Self {
        Self {
            track: Track::idle(),
            radio: false,
            started: None,
            live: false,
            positions: [0, 0],
        }
    }
}

struct QueueAnnouncer {
    control: Arc<ControlHub>,
}

impl QueueObserver<Track> for QueueAnnouncer {
    fn on_enqueue(&self, track: &Track) {
        self.control
            .broadcast(Response::ok(op::TRACK_ENQUEUED).with("track", track.metadata()));
    }

    fn on_dequeue(&self, track: &Track) {
        self.control.broadcast(
            Response::ok(op::CLIENT_REMOVE_TRACK)
                .with("track", track.metadata())
                .with("silent", true),
        );
    }
}

type SchedulerParts = (
    mpsc::UnboundedReceiver<PacerEvent>,
    mpsc::Receiver<SkipRequest>,
);

pub struct Station {
    options: StationOptions,
    queue: Arc<Queue<Track>>,
    sources: SourceRegistry,
    /// Source answering selector 0.
    default_source: Option<SourceKind>,
    lyrics: Option<Arc<dyn LyricsProvider>>,
    radio: Option<Arc<RadioStation>>,
    control: Arc<ControlHub>,
    fanouts: [Arc<Fanout>; 2],
    pacer: PacerHandle,
    playback: RwLock<Playback>,
    listeners: AtomicUsize,
    activity: Notify,
    skip_tx: mpsc::Sender<SkipRequest>,
    stream_lock: Arc<tokio::sync::Mutex<()>>,
    scheduler: Mutex<Option<SchedulerParts>>,
    shutdown: CancellationToken,
}

impl Station {
    pub fn builder() -> StationBuilder {
        StationBuilder::new()
    }

    /// Starts the scheduler, the standby monitor and the optional pinger.
    ///
    /// The returned task only ends on shutdown or when the watchdog gives up.
    pub fn spawn(self: &Arc<Self>) -> Result<JoinHandle<Result<()>>> {
        let (events, skips) = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(StationError::AlreadyStarted)?;

        standby::spawn(self.clone());
        if let Some(app) = self.options.self_ping_app.clone() {
            pinger::spawn(self.clone(), app);
        }

        let scheduler = Scheduler::new(self.clone(), events, skips);
        let cancel = self.shutdown.clone();
        info!("station started");
        Ok(tokio::spawn(scheduler.run(cancel)))
    }

    pub fn options(&self) -> &StationOptions {
        &self.options
    }

    pub fn queue(&self) -> &Arc<Queue<Track>> {
        &self.queue
    }

    pub fn control(&self) -> &Arc<ControlHub> {
        &self.control
    }

    pub fn fanout(&self, kind: StreamKind) -> &Arc<Fanout> {
        &self.fanouts[kind.index()]
    }

    pub fn radio(&self) -> Option<&Arc<RadioStation>> {
        self.radio.as_ref()
    }

    pub(crate) fn lyrics(&self) -> Option<&Arc<dyn LyricsProvider>> {
        self.lyrics.as_ref()
    }

    pub(crate) fn pacer(&self) -> &PacerHandle {
        &self.pacer
    }

    pub(crate) fn stream_lock(&self) -> &Arc<tokio::sync::Mutex<()>> {
        &self.stream_lock
    }

    pub(crate) fn activity(&self) -> &Notify {
        &self.activity
    }

    pub(crate) fn skip_sender(&self) -> &mpsc::Sender<SkipRequest> {
        &self.skip_tx
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn listeners(&self) -> usize {
        self.listeners.load(Ordering::Acquire)
    }

    pub fn now_playing(&self) -> TrackMetadata {
        self.playback().track.metadata()
    }

    pub fn is_radio_playing(&self) -> bool {
        self.playback().radio
    }

    pub(crate) fn playback(&self) -> Playback {
        self.playback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_playback(&self, playback: Playback) {
        *self.playback.write().unwrap_or_else(PoisonError::into_inner) = playback;
    }

    /// A track (or the radio) is now audible.
    pub(crate) fn start_track(&self, track: Track, radio: bool, positions: [u64; 2]) {
        info!(
            radio,
            play_id = track.play_id(),
            "now playing: {} - {}",
            track.artist,
            track.title
        );
        self.set_playback(Playback {
            track,
            radio,
            started: Some(Instant::now()),
            live: true,
            positions,
        });
        self.control.broadcast(self.playing());
    }

    /// The radio announced a new song; keeps the playback start time.
    pub(crate) fn update_radio_track(&self, track: Track) {
        let positions = self.pacer.shared().positions();
        {
            let mut playback = self.playback.write().unwrap_or_else(PoisonError::into_inner);
            playback.track = track;
            playback.positions = positions;
        }
        self.control.broadcast(self.playing());
    }

    /// The current run is over, the next one has not started yet.
    pub(crate) fn end_track(&self) {
        self.playback
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .live = false;
    }

    /// Nothing on air: placeholder track, start positions moved forward.
    pub(crate) fn set_idle(&self) {
        let positions = self.pacer.shared().positions();
        self.set_playback(Playback {
            positions,
            ..Playback::default()
        });
        self.control.broadcast(self.playing());
    }

    pub(crate) fn listener_joined(&self) -> usize {
        let count = self.listeners.fetch_add(1, Ordering::AcqRel) + 1;
        self.activity.notify_one();
        self.control.broadcast(self.listeners_response());
        count
    }

    pub(crate) fn listener_left(&self) -> usize {
        let count = self
            .listeners
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1);
        self.control.broadcast(self.listeners_response());
        count
    }

    // ---- control responses ----

    /// `set-clients-track` payload.
    pub fn playing(&self) -> Response {
        let playback = self.playback();
        Response::ok(op::SET_CLIENTS_TRACK)
            .with("track", playback.track.metadata())
            .with("pos", playback.positions[0])
            .with("fallbackpos", playback.positions[1])
            .with("listeners", self.listeners())
    }

    pub fn listeners_response(&self) -> Response {
        Response::ok(op::SET_CLIENTS_LISTENERS).with("listeners", self.listeners())
    }

    pub fn queue_snapshot(&self) -> Response {
        let queue: Vec<TrackMetadata> = self
            .queue
            .snapshot()
            .iter()
            .map(Track::metadata)
            .collect();
        Response::ok(op::CLIENT_REQUEST_QUEUE).with("queue", queue)
    }

    pub fn sources_response(&self) -> Response {
        Response::ok(op::LIST_SOURCES).with("sources", self.sources.list())
    }

    pub fn start_positions(&self) -> Response {
        let positions = self.playback().positions;
        Response::ok(op::CLIENT_AUDIO_START_POS)
            .with("pos", positions[0])
            .with("fallbackpos", positions[1])
    }

    // ---- client operations ----

    /// Searches `message.query` on the selected source and queues the best
    /// match.
    pub async fn enqueue(&self, message: &ClientMessage) -> Result<Response> {
        let query = message.query.trim();
        if query.is_empty() {
            return Err(StationError::InvalidQuery);
        }
        let source = SourceKind::try_from(message.selector)
            .ok()
            .and_then(|kind| match kind {
                SourceKind::Radio => self.default_source,
                kind => Some(kind),
            })
            .and_then(|kind| self.sources.get(kind))
            .ok_or(StationError::UnknownSource)?;

        let mut tracks = source
            .search(query)
            .await
            .map_err(StationError::SearchFailed)?;
        if tracks.is_empty() {
            return Err(StationError::NoResult);
        }
        let mut track = tracks.swap_remove(0);
        source
            .populate(&mut track)
            .await
            .map_err(StationError::SearchFailed)?;
        track.assign_play_id();

        info!(
            source = source.id(),
            play_id = track.play_id(),
            "enqueued {} - {}",
            track.artist,
            track.title
        );
        let metadata = track.metadata();
        self.queue.push(track);
        Ok(Response::ok(op::CLIENT_REQUEST_TRACK).with("track", metadata))
    }

    /// Applies the skip policy and, when allowed, stops the current track.
    pub fn skip(&self) -> Result<Response> {
        let playback = self.playback();
        let Some(started) = playback.started.filter(|_| playback.live) else {
            return Err(StationError::NothingPlaying);
        };
        if playback.radio {
            return Err(StationError::SkipRadio);
        }
        if started.elapsed() < self.options.skip_guard {
            return Err(StationError::skip_too_early(self.options.skip_guard));
        }

        match self.skip_tx.try_send(SkipRequest::User) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(StationError::PacerStopped),
        }
        info!("skip requested");
        self.control.broadcast(Response::ok(op::ALL_CLIENTS_SKIP));
        Ok(Response::ok(op::CLIENT_REQUEST_SKIP))
    }

    /// Removes the pending track whose play-id is `play_id`.
    pub fn remove(&self, play_id: &str) -> Result<Response> {
        let track = self
            .queue
            .remove(|track| track.play_id() == play_id)
            .ok_or(StationError::TrackNotFound)?;
        info!(play_id, "removed {} from queue", track.title);

        let response = Response::ok(op::CLIENT_REMOVE_TRACK)
            .with("track", track.metadata())
            .with("silent", false);
        self.control.broadcast(response.clone());
        Ok(response)
    }

    /// Dispatches one client request and builds its reply.
    pub async fn handle_message(&self, message: ClientMessage) -> Response {
        let result = match message.op {
            op::SET_CLIENTS_TRACK => Ok(self.playing()),
            op::CLIENT_REQUEST_TRACK => self.enqueue(&message).await,
            op::CLIENT_REQUEST_SKIP => self.skip(),
            op::SET_CLIENTS_LISTENERS => Ok(self.listeners_response()),
            op::CLIENT_REQUEST_QUEUE => Ok(self.queue_snapshot()),
            op::KEEP_ALIVE => Ok(Response::ok(op::KEEP_ALIVE)),
            op::CLIENT_REMOVE_TRACK => self.remove(&message.query),
            op::CLIENT_AUDIO_START_POS => Ok(self.start_positions()),
            op::LIST_SOURCES => Ok(self.sources_response()),
            _ => Err(StationError::BadRequest),
        };
        reply(message.op, result).with_nonce(message.nonce)
    }
}

/// Turns an operation result into the envelope sent back to the client.
pub(crate) fn reply(op: u8, result: Result<Response>) -> Response {
    match result {
        Ok(response) => response,
        Err(e) => {
            if e.is_client_error() {
                debug!(op, "request refused: {}", e);
            } else {
                warn!(op, "request failed: {}", e);
            }
            Response::from_error(op, &e)
        }
    }
}

/// Assembles a [`Station`].
pub struct StationBuilder {
    options: StationOptions,
    sources: SourceRegistry,
    default_source: Option<SourceKind>,
    lyrics: Option<Arc<dyn LyricsProvider>>,
    radio: Option<Arc<RadioStation>>,
    shutdown: CancellationToken,
}

impl Default for StationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StationBuilder {
    pub fn new() -> Self {
        Self {
            options: StationOptions::default(),
            sources: SourceRegistry::new(),
            default_source: None,
            lyrics: None,
            radio: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn options(mut self, options: StationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn source(mut self, source: Arc<dyn MusicSource>) -> Self {
        self.sources.register(source);
        self
    }

    pub fn sources(mut self, sources: SourceRegistry) -> Self {
        self.sources = sources;
        self
    }

    /// Source used when a client sends selector 0.
    pub fn default_source(mut self, kind: SourceKind) -> Self {
        self.default_source = Some(kind);
        self
    }

    pub fn lyrics(mut self, provider: Arc<dyn LyricsProvider>) -> Self {
        self.lyrics = Some(provider);
        self
    }

    pub fn radio(mut self, radio: Arc<RadioStation>) -> Self {
        self.radio = Some(radio);
        self
    }

    /// Token shared with the HTTP server so both stop together.
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Starts the pacer thread and returns the idle station.
    ///
    /// Must be called from a tokio runtime.
    pub async fn build(self) -> Result<Arc<Station>> {
        let options = self.options;
        let control = Arc::new(ControlHub::new());
        let queue = Arc::new(Queue::with_observer(Arc::new(QueueAnnouncer {
            control: control.clone(),
        })));
        let fanouts = [
            Arc::new(Fanout::new(
                "vorbis",
                "application/ogg",
                options.max_listeners,
                options.session_capacity,
            )),
            Arc::new(Fanout::new(
                "mpeg",
                "audio/mpeg",
                options.max_listeners,
                options.session_capacity,
            )),
        ];
        let (pacer, events) = PacerHandle::spawn(
            fanouts.clone(),
            options.buffering_capacity,
            options.pacing_lead,
        )
        .await?;
        let (skip_tx, skip_rx) = mpsc::channel(1);

        if self.sources.is_empty() {
            warn!("no music source registered, only the radio can play");
        }
        let default_source = self.default_source.filter(|kind| {
            let registered = self.sources.get(*kind).is_some();
            if !registered {
                warn!(?kind, "default source is not registered, selector 0 is refused");
            }
            registered
        });

        Ok(Arc::new(Station {
            options,
            queue,
            sources: self.sources,
            default_source,
            lyrics: self.lyrics,
            radio: self.radio,
            control,
            fanouts,
            pacer,
            playback: RwLock::new(Playback::default()),
            listeners: AtomicUsize::new(0),
            activity: Notify::new(),
            skip_tx,
            stream_lock: Arc::new(tokio::sync::Mutex::new(())),
            scheduler: Mutex::new(Some((events, skip_rx))),
            shutdown: self.shutdown,
        }))
    }
}
