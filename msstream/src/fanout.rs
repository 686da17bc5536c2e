//! Two-generation broadcast of encoded chunks.
//!
//! Each listener session is represented by a handle living in one of two
//! bounded MPMC generation channels. Broadcasting a chunk drains the current
//! generation: every handle gets a non-blocking send attempt and is moved to
//! the other generation, which becomes current for the next chunk. A session
//! whose queue is full simply misses the chunk. Sessions whose receiver is
//! gone are dropped when next dequeued, or swept out of a generation that
//! fills up while nothing is being broadcast.

use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, bounded};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// One unit of encoded audio, broadcast atomically.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub data: Bytes,
    /// Sequential per fanout, survives track transitions.
    pub id: u64,
    /// Frames absorbed by the encoder so far, as a duration.
    pub presentation: Duration,
    /// Generation the receiving handles were moved to.
    pub channel: usize,
}

struct SessionHandle {
    id: u64,
    tx: mpsc::Sender<Chunk>,
    queued: [AtomicBool; 2],
    dropped: AtomicU64,
}

/// Outcome of one [`Fanout::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub chunk_id: u64,
    pub delivered: usize,
    pub dropped: usize,
}

type Generation = (Sender<Arc<SessionHandle>>, Receiver<Arc<SessionHandle>>);

/// Broadcast point of one encoder.
pub struct Fanout {
    name: &'static str,
    content_type: &'static str,
    header: OnceLock<Bytes>,
    generations: [Generation; 2],
    current: AtomicUsize,
    next_chunk_id: AtomicU64,
    next_session_id: AtomicU64,
    subscribers: AtomicUsize,
    max_subscribers: usize,
    session_capacity: usize,
    dropped: AtomicU64,
}

impl Fanout {
    pub fn new(
        name: &'static str,
        content_type: &'static str,
        max_subscribers: usize,
        session_capacity: usize,
    ) -> Self {
        let capacity = (max_subscribers * 2).max(2);
        Self {
            name,
            content_type,
            header: OnceLock::new(),
            generations: [bounded(capacity), bounded(capacity)],
            current: AtomicUsize::new(0),
            next_chunk_id: AtomicU64::new(0),
            next_session_id: AtomicU64::new(0),
            subscribers: AtomicUsize::new(0),
            max_subscribers,
            session_capacity: session_capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Installs the encoder warmup header. Only the first call has an effect.
    pub fn set_warmup_header(&self, header: Bytes) {
        if self.header.set(header).is_err() {
            warn!(fanout = self.name, "warmup header already set");
        }
    }

    pub fn warmup_header(&self) -> Bytes {
        self.header.get().cloned().unwrap_or_default()
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    /// Chunks dropped because a session queue was full, all sessions included.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Subscribes a new session, or `None` when the listener limit is reached.
    pub fn subscribe(self: &Arc<Self>) -> Option<Subscription> {
        self.subscribers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_subscribers).then_some(n + 1)
            })
            .ok()?;

        let (tx, rx) = mpsc::channel(self.session_capacity);
        let handle = Arc::new(SessionHandle {
            id: self.next_session_id.fetch_add(1, Ordering::Relaxed),
            tx,
            queued: [AtomicBool::new(false), AtomicBool::new(false)],
            dropped: AtomicU64::new(0),
        });
        // Servi par la génération courante, quelle qu'elle soit
        let admitted = self.enqueue(0, &handle) & self.enqueue(1, &handle);
        if !admitted {
            // rx fermé à la sortie : la poignée restante sera balayée
            self.subscribers.fetch_sub(1, Ordering::AcqRel);
            warn!(fanout = self.name, session = handle.id, "session refused, generations full");
            return None;
        }
        debug!(fanout = self.name, session = handle.id, "session subscribed");

        Some(Subscription {
            handle,
            rx,
            fanout: self.clone(),
        })
    }

    /// Puts `handle` in `generation`. Returns false when it could not be
    /// placed, even after sweeping released sessions.
    fn enqueue(&self, generation: usize, handle: &Arc<SessionHandle>) -> bool {
        if handle.queued[generation].swap(true, Ordering::AcqRel) {
            return true;
        }
        let sender = &self.generations[generation].0;
        if sender.try_send(handle.clone()).is_ok() {
            return true;
        }

        let released = self.sweep(generation);
        if sender.try_send(handle.clone()).is_ok() {
            debug!(fanout = self.name, generation, released, "generation swept");
            return true;
        }
        handle.queued[generation].store(false, Ordering::Release);
        warn!(
            fanout = self.name,
            session = handle.id,
            generation,
            "generation channel full, session left out"
        );
        false
    }

    /// Drops the handles of released sessions from `generation`, keeping the
    /// live ones in order. Returns how many were dropped.
    fn sweep(&self, generation: usize) -> usize {
        let (sender, receiver) = &self.generations[generation];
        let mut released = 0;
        for _ in 0..receiver.len() {
            let Ok(handle) = receiver.try_recv() else {
                break;
            };
            if handle.tx.is_closed() || sender.try_send(handle.clone()).is_err() {
                handle.queued[generation].store(false, Ordering::Release);
                released += 1;
            }
        }
        released
    }

    /// Sends `data` to every subscribed session without blocking.
    ///
    /// Must be called from a single thread.
    pub fn broadcast(&self, data: Bytes, presentation: Duration) -> BroadcastReport {
        let current = self.current.load(Ordering::Acquire);
        let next = current ^ 1;
        let chunk = Chunk {
            data,
            id: self.next_chunk_id.fetch_add(1, Ordering::Relaxed),
            presentation,
            channel: next,
        };
        let mut report = BroadcastReport {
            chunk_id: chunk.id,
            ..Default::default()
        };

        let receiver = &self.generations[current].1;
        while let Ok(handle) = receiver.try_recv() {
            handle.queued[current].store(false, Ordering::Release);
            match handle.tx.try_send(chunk.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    handle.dropped.fetch_add(1, Ordering::Relaxed);
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(fanout = self.name, session = handle.id, "session released");
                    continue;
                }
            }
            self.enqueue(next, &handle);
        }

        if report.dropped > 0 {
            self.dropped
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
        }
        self.current.store(next, Ordering::Release);
        report
    }
}

/// Receiving side of a listener session.
///
/// Dropping it releases the admission slot; the handle is discarded by the
/// next broadcast.
pub struct Subscription {
    handle: Arc<SessionHandle>,
    rx: mpsc::Receiver<Chunk>,
    fanout: Arc<Fanout>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.handle.id
    }

    pub async fn recv(&mut self) -> Option<Chunk> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Chunk> {
        self.rx.try_recv().ok()
    }

    /// Chunks this session missed because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.handle.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.rx.close();
        self.fanout.subscribers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fanout(max: usize, capacity: usize) -> Arc<Fanout> {
        Arc::new(Fanout::new("test", "audio/test", max, capacity))
    }

    fn chunk(n: u8) -> Bytes {
        Bytes::from(vec![n; 4])
    }

    fn drain(sub: &mut Subscription) -> Vec<u64> {
        std::iter::from_fn(|| sub.try_recv()).map(|c| c.id).collect()
    }

    #[test]
    fn test_each_chunk_is_delivered_once() {
        let fanout = fanout(4, 16);
        let mut a = fanout.subscribe().unwrap();
        for n in 0..5 {
            let report = fanout.broadcast(chunk(n), Duration::from_millis(20 * n as u64));
            assert_eq!(report.delivered, 1);
        }
        assert_eq!(drain(&mut a), vec![0, 1, 2, 3, 4]);

        let mut b = fanout.subscribe().unwrap();
        fanout.broadcast(chunk(9), Duration::ZERO);
        assert_eq!(drain(&mut a), vec![5]);
        assert_eq!(drain(&mut b), vec![5]);
    }

    #[test]
    fn test_full_session_loses_exactly_the_overflow() {
        let fanout = fanout(4, 2);
        let mut slow = fanout.subscribe().unwrap();
        let mut fast = fanout.subscribe().unwrap();

        let mut fast_ids = Vec::new();
        for n in 0..5 {
            fanout.broadcast(chunk(n), Duration::ZERO);
            fast_ids.extend(drain(&mut fast));
        }
        assert_eq!(fast_ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(slow.dropped(), 3);
        assert_eq!(fanout.dropped(), 3);

        assert_eq!(drain(&mut slow), vec![0, 1]);
        fanout.broadcast(chunk(5), Duration::ZERO);
        assert_eq!(drain(&mut slow), vec![5]);
        assert_eq!(drain(&mut fast), vec![5]);
    }

    #[test]
    fn test_released_session_is_forgotten() {
        let fanout = fanout(1, 4);
        let sub = fanout.subscribe().unwrap();
        assert!(fanout.subscribe().is_none());
        drop(sub);
        assert_eq!(fanout.subscribers(), 0);

        let report = fanout.broadcast(chunk(0), Duration::ZERO);
        assert_eq!(report.delivered, 0);
        assert!(fanout.subscribe().is_some());
    }

    #[test]
    fn test_released_sessions_do_not_fill_generations() {
        let fanout = fanout(1, 8);
        // Aucun broadcast entre les connexions : les poignées s'accumulent
        for _ in 0..3 {
            drop(fanout.subscribe().unwrap());
        }
        assert_eq!(fanout.subscribers(), 0);

        let mut live = fanout.subscribe().expect("released slots are reusable");
        for n in 0..5 {
            let report = fanout.broadcast(chunk(n), Duration::ZERO);
            assert_eq!(report.delivered, 1);
        }
        assert_eq!(drain(&mut live), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_sweep_keeps_live_sessions() {
        let fanout = fanout(2, 8);
        let mut first = fanout.subscribe().unwrap();
        for _ in 0..3 {
            drop(fanout.subscribe().unwrap());
        }
        let mut second = fanout.subscribe().unwrap();
        assert_eq!(fanout.subscribers(), 2);

        for n in 0..4 {
            assert_eq!(fanout.broadcast(chunk(n), Duration::ZERO).delivered, 2);
        }
        assert_eq!(drain(&mut first), vec![0, 1, 2, 3]);
        assert_eq!(drain(&mut second), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_chunk_points_to_next_generation() {
        let fanout = fanout(2, 4);
        let mut sub = fanout.subscribe().unwrap();
        fanout.broadcast(chunk(0), Duration::ZERO);
        fanout.broadcast(chunk(1), Duration::ZERO);
        let channels: Vec<usize> = std::iter::from_fn(|| sub.try_recv())
            .map(|c| c.channel)
            .collect();
        assert_eq!(channels, vec![1, 0]);
    }

    #[test]
    fn test_warmup_header_is_set_once() {
        let fanout = fanout(1, 1);
        assert!(fanout.warmup_header().is_empty());
        fanout.set_warmup_header(Bytes::from_static(b"OggS"));
        fanout.set_warmup_header(Bytes::from_static(b"nope"));
        assert_eq!(&fanout.warmup_header()[..], b"OggS");
    }
}
