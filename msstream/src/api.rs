//! HTTP surface of the station, mounted on a [`msserver::Server`].

use std::{future::Future, sync::Arc};

use axum::{
    Json,
    body::Bytes,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
};
use msserver::{Server, rest_headers};
use tracing::debug;

use crate::{
    control::{self, ClientMessage, Response, op},
    error::{Result, StationError},
    listener,
    station::{Station, reply},
};

/// Mounts the station routes on a server.
///
/// ```rust,no_run
/// use msstream::{Station, StationExt};
/// use msserver::ServerBuilder;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let station = Station::builder().build().await?;
/// let mut server = ServerBuilder::new_configured().build();
/// server.init_station_routes(station.clone()).await;
/// server.start().await?;
/// # Ok(())
/// # }
/// ```
pub trait StationExt {
    fn init_station_routes(&mut self, station: Arc<Station>) -> impl Future<Output = ()> + Send;
}

impl StationExt for Server {
    async fn init_station_routes(&mut self, station: Arc<Station>) {
        self.add_handler_with_state("/audio", listener::audio, station.clone())
            .await;
        self.add_handler_with_state("/fallback", listener::fallback, station.clone())
            .await;
        self.add_handler_with_state("/status", status, station.clone())
            .await;

        self.add_handler_with_state("/playing", playing, station.clone())
            .await;
        self.add_handler_with_state("/listeners", listeners, station.clone())
            .await;
        self.add_handler_with_state("/queue", queue, station.clone())
            .await;
        self.add_handler_with_state("/sources", sources, station.clone())
            .await;
        self.add_handler_with_state("/skip", skip, station.clone())
            .await;
        self.add_post_handler_with_state("/enqueue", enqueue, station.clone())
            .await;
        self.add_post_handler_with_state("/remove", remove, station)
            .await;
    }
}

/// JSON envelope with the REST cache headers. Refused requests map to 400,
/// station failures to 500.
fn rest(op: u8, result: Result<Response>, nonce: u32) -> HttpResponse {
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let response = reply(op, result).with_nonce(nonce);
    (status, rest_headers(), Json(response)).into_response()
}

fn parse(body: &[u8]) -> Option<ClientMessage> {
    serde_json::from_slice(body)
        .inspect_err(|e| debug!("malformed request body: {}", e))
        .ok()
}

async fn status(State(station): State<Arc<Station>>, ws: WebSocketUpgrade) -> HttpResponse {
    ws.on_upgrade(move |socket| control::serve_socket(station, socket))
}

async fn playing(State(station): State<Arc<Station>>) -> HttpResponse {
    rest(op::SET_CLIENTS_TRACK, Ok(station.playing()), 0)
}

async fn listeners(State(station): State<Arc<Station>>) -> HttpResponse {
    rest(op::SET_CLIENTS_LISTENERS, Ok(station.listeners_response()), 0)
}

async fn queue(State(station): State<Arc<Station>>) -> HttpResponse {
    rest(op::CLIENT_REQUEST_QUEUE, Ok(station.queue_snapshot()), 0)
}

async fn sources(State(station): State<Arc<Station>>) -> HttpResponse {
    rest(op::LIST_SOURCES, Ok(station.sources_response()), 0)
}

async fn skip(State(station): State<Arc<Station>>) -> HttpResponse {
    rest(op::CLIENT_REQUEST_SKIP, station.skip(), 0)
}

async fn enqueue(State(station): State<Arc<Station>>, body: Bytes) -> HttpResponse {
    match parse(&body) {
        Some(message) => rest(
            op::CLIENT_REQUEST_TRACK,
            station.enqueue(&message).await,
            message.nonce,
        ),
        None => rest(op::CLIENT_REQUEST_TRACK, Err(StationError::InvalidQuery), 0),
    }
}

async fn remove(State(station): State<Arc<Station>>, body: Bytes) -> HttpResponse {
    match parse(&body) {
        Some(message) => rest(
            op::CLIENT_REMOVE_TRACK,
            station.remove(&message.query),
            message.nonce,
        ),
        None => rest(op::CLIENT_REMOVE_TRACK, Err(StationError::BadRequest), 0),
    }
}
