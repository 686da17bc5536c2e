//! Listener sessions on `/audio` and `/fallback`.

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{info, warn};

use crate::station::{Station, StreamKind};

fn stream_headers(content_type: &'static str) -> [(HeaderName, &'static str); 5] {
    [
        (header::CONTENT_TYPE, content_type),
        (header::CACHE_CONTROL, "no-cache"),
        (header::PRAGMA, "no-cache"),
        (header::CONNECTION, "Keep-Alive"),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    ]
}

/// Counts the listener for as long as its response body is alive.
struct Session {
    station: Arc<Station>,
    kind: StreamKind,
    id: u64,
}

impl Session {
    fn open(station: Arc<Station>, kind: StreamKind, id: u64) -> Self {
        let listeners = station.listener_joined();
        info!(stream = kind.path(), session = id, listeners, "listener connected");
        Self { station, kind, id }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let listeners = self.station.listener_left();
        info!(
            stream = self.kind.path(),
            session = self.id,
            listeners,
            "listener disconnected"
        );
    }
}

pub(crate) async fn audio(State(station): State<Arc<Station>>, headers: HeaderMap) -> Response {
    serve(station, StreamKind::Vorbis, &headers)
}

pub(crate) async fn fallback(State(station): State<Arc<Station>>, headers: HeaderMap) -> Response {
    serve(station, StreamKind::Mpeg, &headers)
}

fn serve(station: Arc<Station>, kind: StreamKind, headers: &HeaderMap) -> Response {
    let fanout = station.fanout(kind).clone();
    let warmup = fanout.warmup_header();
    let content_type = fanout.content_type();

    // Sonde de seekabilité des lecteurs : en-tête seul
    if kind == StreamKind::Mpeg && headers.contains_key(header::RANGE) {
        return (StatusCode::OK, stream_headers(content_type), warmup).into_response();
    }

    let Some(mut subscription) = fanout.subscribe() else {
        warn!(stream = kind.path(), "listener refused, limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many listeners").into_response();
    };
    let session = Session::open(station.clone(), kind, subscription.id());
    let cancel = station.shutdown_token();

    let body = async_stream::stream! {
        let _session = session;
        yield Ok::<Bytes, Infallible>(warmup);

        let mut last: Option<u64> = None;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = subscription.recv() => chunk,
            };
            let Some(chunk) = chunk else { break };
            if let Some(previous) = last {
                if chunk.id != previous + 1 {
                    info!(
                        session = subscription.id(),
                        "chunks from {} to {} have been lost",
                        previous + 1,
                        chunk.id - 1
                    );
                }
            }
            last = Some(chunk.id);
            yield Ok(chunk.data);
        }
    };

    (
        StatusCode::OK,
        stream_headers(content_type),
        Body::from_stream(body),
    )
        .into_response()
}
