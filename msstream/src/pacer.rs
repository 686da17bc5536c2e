//! Real-time pacer.
//!
//! A dedicated OS thread owns both broadcast encoders. It receives canonical
//! PCM windows from the producers, waits until each window is due on the
//! wall clock, encodes it and hands the container output to the matching
//! fanout. It is the only caller of the encoders.
//!
//! Every producer run is identified by a ticket. Messages of a discarded
//! ticket are dropped without being encoded, which is how skips flush the
//! buffered remainder of a track.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use msaudio::{
    Mp3StreamEncoder, StreamEncoder, VorbisStreamEncoder,
    pcm::{frames_in, frames_to_duration},
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::{
    error::{Result, StationError},
    fanout::Fanout,
};

/// Beyond this delay the pacer stops trying to catch up and re-anchors its
/// clock.
const MAX_LATENESS: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub(crate) enum PacerMessage {
    Pcm { ticket: u64, data: Bytes },
    /// Pre-track silence is queued; what follows is the track itself.
    TrackStart { ticket: u64 },
    EndOfStream { ticket: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PacerEvent {
    TrackStarted { ticket: u64, positions: [u64; 2] },
    TrackEnded { ticket: u64 },
    Failed { ticket: u64, reason: String },
}

/// State readable from outside the pacer thread.
#[derive(Debug, Default)]
pub(crate) struct PacerShared {
    granule: [AtomicU64; 2],
    discard_upto: AtomicU64,
}

impl PacerShared {
    /// Frames absorbed so far by the Vorbis and MPEG encoders.
    pub(crate) fn positions(&self) -> [u64; 2] {
        [
            self.granule[0].load(Ordering::Acquire),
            self.granule[1].load(Ordering::Acquire),
        ]
    }

    fn is_discarded(&self, ticket: u64) -> bool {
        ticket <= self.discard_upto.load(Ordering::Acquire)
    }
}

/// Handle on the pacer thread. Dropping it (and every producer sender)
/// stops the thread.
pub(crate) struct PacerHandle {
    tx: mpsc::Sender<PacerMessage>,
    shared: Arc<PacerShared>,
    next_ticket: AtomicU64,
}

impl PacerHandle {
    /// Starts the pacer thread and waits until both encoders are ready and
    /// their warmup headers are installed on the fanouts.
    pub(crate) async fn spawn(
        fanouts: [Arc<Fanout>; 2],
        buffering_capacity: usize,
        lead: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PacerEvent>)> {
        let (tx, rx) = mpsc::channel(buffering_capacity.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = Arc::new(PacerShared::default());

        let thread_shared = shared.clone();
        thread::Builder::new()
            .name("pacer".to_string())
            .spawn(move || run(fanouts, rx, events_tx, thread_shared, lead, ready_tx))?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(StationError::Encoder(reason)),
            Err(_) => return Err(StationError::PacerStopped),
        }

        let handle = Self {
            tx,
            shared,
            next_ticket: AtomicU64::new(1),
        };
        Ok((handle, events_rx))
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<PacerMessage> {
        self.tx.clone()
    }

    pub(crate) fn shared(&self) -> &PacerShared {
        &self.shared
    }

    pub(crate) fn next_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    /// Drops every message already queued or still to come for `ticket`.
    pub(crate) fn discard(&self, ticket: u64) {
        self.shared.discard_upto.fetch_max(ticket, Ordering::AcqRel);
        debug!(ticket, "pacer: discarding buffered audio");
    }
}

type Encoders = [Box<dyn StreamEncoder>; 2];

fn build_encoders() -> msaudio::Result<Encoders> {
    Ok([
        Box::new(VorbisStreamEncoder::new()?),
        Box::new(Mp3StreamEncoder::new()?),
    ])
}

fn run(
    fanouts: [Arc<Fanout>; 2],
    mut rx: mpsc::Receiver<PacerMessage>,
    events: mpsc::UnboundedSender<PacerEvent>,
    shared: Arc<PacerShared>,
    lead: Duration,
    ready: oneshot::Sender<std::result::Result<(), String>>,
) {
    let encoders = match build_encoders() {
        Ok(encoders) => encoders,
        Err(e) => {
            error!("pacer: cannot create encoders: {}", e);
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    for (fanout, encoder) in fanouts.iter().zip(encoders.iter()) {
        fanout.set_warmup_header(encoder.warmup_header().clone());
    }
    if ready.send(Ok(())).is_err() {
        return;
    }
    info!("pacer started");

    let mut pacer = Pacer {
        encoders,
        fanouts,
        scratch: [Vec::new(), Vec::new()],
        events,
        shared,
        lead,
        clock: None,
        failed: None,
    };
    while let Some(message) = rx.blocking_recv() {
        pacer.handle(message);
    }
    info!("pacer stopped");
}

#[derive(Debug, Clone, Copy)]
struct Clock {
    ticket: u64,
    anchor: Instant,
    anchor_frames: u64,
}

struct Pacer {
    encoders: Encoders,
    fanouts: [Arc<Fanout>; 2],
    scratch: [Vec<u8>; 2],
    events: mpsc::UnboundedSender<PacerEvent>,
    shared: Arc<PacerShared>,
    lead: Duration,
    clock: Option<Clock>,
    failed: Option<u64>,
}

impl Pacer {
    fn handle(&mut self, message: PacerMessage) {
        match message {
            PacerMessage::Pcm { ticket, data } => {
                if self.shared.is_discarded(ticket) || self.failed == Some(ticket) {
                    return;
                }
                if let Err(reason) = self.play(ticket, &data) {
                    error!(ticket, "pacer: encoder failure: {}", reason);
                    self.failed = Some(ticket);
                    self.emit(PacerEvent::Failed { ticket, reason });
                }
            }
            PacerMessage::TrackStart { ticket } => {
                if self.shared.is_discarded(ticket) || self.failed == Some(ticket) {
                    return;
                }
                let positions = self.shared.positions();
                self.emit(PacerEvent::TrackStarted { ticket, positions });
            }
            PacerMessage::EndOfStream { ticket } => {
                self.emit(PacerEvent::TrackEnded { ticket });
            }
        }
    }

    fn emit(&self, event: PacerEvent) {
        if self.events.send(event).is_err() {
            trace!("pacer: nobody is following events");
        }
    }

    fn frames(&self) -> u64 {
        self.encoders[0].granule_pos()
    }

    /// Waits until the window starting at the current position is due.
    fn wait_turn(&mut self, ticket: u64) {
        let frames = self.frames();
        let clock = match self.clock {
            Some(clock) if clock.ticket == ticket => clock,
            _ => self.anchor(ticket, frames),
        };

        let due = clock.anchor + frames_to_duration(frames - clock.anchor_frames);
        let due = due.checked_sub(self.lead).unwrap_or(clock.anchor);
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        } else if now - due > MAX_LATENESS {
            warn!(ticket, late = ?(now - due), "pacer: fell behind, re-anchoring");
            self.anchor(ticket, frames);
        }
    }

    fn anchor(&mut self, ticket: u64, frames: u64) -> Clock {
        let clock = Clock {
            ticket,
            anchor: Instant::now(),
            anchor_frames: frames,
        };
        self.clock = Some(clock);
        clock
    }

    fn play(&mut self, ticket: u64, pcm: &[u8]) -> std::result::Result<(), String> {
        if frames_in(pcm.len()) == 0 {
            return Ok(());
        }
        self.wait_turn(ticket);

        for index in 0..2 {
            let encoder = &mut self.encoders[index];
            let out = &mut self.scratch[index];
            out.clear();
            encoder
                .encode(pcm, out)
                .map_err(|e| format!("{}: {}", encoder.name(), e))?;
            let granule = encoder.granule_pos();
            self.shared.granule[index].store(granule, Ordering::Release);

            if !out.is_empty() {
                let data = Bytes::from(std::mem::take(out));
                self.fanouts[index].broadcast(data, frames_to_duration(granule));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msaudio::PCM_WINDOW_BYTES;

    fn fanouts() -> [Arc<Fanout>; 2] {
        [
            Arc::new(Fanout::new("vorbis", "application/ogg", 4, 64)),
            Arc::new(Fanout::new("mpeg", "audio/mpeg", 4, 64)),
        ]
    }

    fn window() -> Bytes {
        Bytes::from(vec![0u8; PCM_WINDOW_BYTES])
    }

    async fn next(events: &mut mpsc::UnboundedReceiver<PacerEvent>) -> PacerEvent {
        tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("pacer event")
            .expect("pacer alive")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_track_lifecycle() {
        let fanouts = fanouts();
        let (pacer, mut events) = PacerHandle::spawn(fanouts.clone(), 64, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(&fanouts[0].warmup_header()[..4], b"OggS");
        assert!(!fanouts[1].warmup_header().is_empty());

        let ticket = pacer.next_ticket();
        let tx = pacer.sender();
        for _ in 0..2 {
            tx.send(PacerMessage::Pcm { ticket, data: window() }).await.unwrap();
        }
        tx.send(PacerMessage::TrackStart { ticket }).await.unwrap();
        for _ in 0..3 {
            tx.send(PacerMessage::Pcm { ticket, data: window() }).await.unwrap();
        }
        tx.send(PacerMessage::EndOfStream { ticket }).await.unwrap();

        assert_eq!(
            next(&mut events).await,
            PacerEvent::TrackStarted {
                ticket,
                positions: [1920, 1920]
            }
        );
        assert_eq!(next(&mut events).await, PacerEvent::TrackEnded { ticket });
        assert_eq!(pacer.shared().positions(), [4800, 4800]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_discarded_ticket_is_not_encoded() {
        let (pacer, mut events) = PacerHandle::spawn(fanouts(), 64, Duration::ZERO)
            .await
            .unwrap();
        let tx = pacer.sender();

        let skipped = pacer.next_ticket();
        pacer.discard(skipped);
        tx.send(PacerMessage::TrackStart { ticket: skipped }).await.unwrap();
        tx.send(PacerMessage::Pcm { ticket: skipped, data: window() }).await.unwrap();
        tx.send(PacerMessage::EndOfStream { ticket: skipped }).await.unwrap();
        assert_eq!(
            next(&mut events).await,
            PacerEvent::TrackEnded { ticket: skipped }
        );
        assert_eq!(pacer.shared().positions(), [0, 0]);

        let ticket = pacer.next_ticket();
        tx.send(PacerMessage::TrackStart { ticket }).await.unwrap();
        tx.send(PacerMessage::Pcm { ticket, data: window() }).await.unwrap();
        tx.send(PacerMessage::EndOfStream { ticket }).await.unwrap();
        assert!(matches!(
            next(&mut events).await,
            PacerEvent::TrackStarted { ticket: t, .. } if t == ticket
        ));
        assert_eq!(next(&mut events).await, PacerEvent::TrackEnded { ticket });
        assert_eq!(pacer.shared().positions(), [960, 960]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_chunks_are_paced() {
        let fanouts = fanouts();
        let mut listener = fanouts[1].subscribe().unwrap();
        let (pacer, mut events) = PacerHandle::spawn(fanouts.clone(), 64, Duration::ZERO)
            .await
            .unwrap();
        let tx = pacer.sender();
        let ticket = pacer.next_ticket();

        let started = Instant::now();
        tx.send(PacerMessage::TrackStart { ticket }).await.unwrap();
        for _ in 0..25 {
            tx.send(PacerMessage::Pcm { ticket, data: window() }).await.unwrap();
        }
        tx.send(PacerMessage::EndOfStream { ticket }).await.unwrap();
        next(&mut events).await;
        next(&mut events).await;

        // 25 fenêtres de 20 ms, la dernière part à 480 ms
        assert!(started.elapsed() >= Duration::from_millis(450));

        let mut last = None;
        while let Some(chunk) = listener.try_recv() {
            if let Some(previous) = last {
                assert!(chunk.id > previous);
            }
            last = Some(chunk.id);
        }
        assert!(last.is_some());
    }
}
