//! Bidirectional control channel (`/status` websocket).
//!
//! Every message in both directions is a JSON envelope
//! `{op, success, reason, data, nonce}`. Server-initiated broadcasts go
//! through the [`ControlHub`], which holds one writer per connected socket.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{error::StationError, station::Station};

/// Operation codes of the control envelope.
pub mod op {
    pub const SET_CLIENTS_TRACK: u8 = 1;
    pub const ALL_CLIENTS_SKIP: u8 = 2;
    pub const CLIENT_REQUEST_TRACK: u8 = 3;
    pub const CLIENT_REQUEST_SKIP: u8 = 4;
    pub const SET_CLIENTS_LISTENERS: u8 = 5;
    pub const TRACK_ENQUEUED: u8 = 6;
    pub const CLIENT_REQUEST_QUEUE: u8 = 7;
    pub const KEEP_ALIVE: u8 = 8;
    pub const CLIENT_REMOVE_TRACK: u8 = 9;
    pub const CLIENT_AUDIO_START_POS: u8 = 10;
    pub const LIST_SOURCES: u8 = 11;
}

/// Request sent by a client, over the websocket or as a REST body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientMessage {
    pub op: u8,
    /// Search terms, or the play-id for removals.
    #[serde(alias = "playId")]
    pub query: String,
    pub selector: u8,
    pub nonce: u32,
}

/// Control envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Response {
    pub op: u8,
    pub success: bool,
    pub reason: String,
    pub data: Map<String, Value>,
    pub nonce: u32,
}

impl Response {
    pub fn ok(op: u8) -> Self {
        Self {
            op,
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(op: u8, reason: impl Into<String>) -> Self {
        Self {
            op,
            success: false,
            reason: reason.into(),
            ..Default::default()
        }
    }

    /// Failure whose reason is the client-facing message of `err`.
    pub fn from_error(op: u8, err: &StationError) -> Self {
        Self::failure(op, err.to_string())
    }

    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Registry of connected control sockets.
#[derive(Default)]
pub struct ControlHub {
    connections: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl ControlHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection; messages for it arrive on the returned receiver.
    pub fn register(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends `response` to every connection. A zero nonce is replaced by a
    /// random one.
    pub fn broadcast(&self, mut response: Response) {
        if response.nonce == 0 {
            response.nonce = rand::rng().random_range(1..u32::MAX);
        }
        let text = response.to_json();

        let targets: Vec<(u64, mpsc::UnboundedSender<String>)> = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let closed: Vec<u64> = targets
            .into_iter()
            .filter(|(_, tx)| tx.send(text.clone()).is_err())
            .map(|(id, _)| id)
            .collect();
        for id in closed {
            self.unregister(id);
        }
    }
}

/// Serves one upgraded `/status` socket until it closes.
pub(crate) async fn serve_socket(station: Arc<Station>, socket: WebSocket) {
    let hub = station.control();
    let (id, mut outgoing) = hub.register();
    let (mut sink, mut incoming) = socket.split();
    info!(connection = id, "control client connected");

    let writer = tokio::spawn(async move {
        while let Some(text) = outgoing.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reply = |response: Response| {
        let _ = station.control().send_to(id, response);
    };
    reply(station.playing());
    reply(station.queue_snapshot());

    while let Some(frame) = incoming.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(connection = id, "control socket error: {}", err);
                break;
            }
        };
        let response = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(message) => station.handle_message(message).await,
            Err(err) => {
                warn!(connection = id, "malformed control message: {}", err);
                Response::from_error(0, &StationError::BadRequest)
            }
        };
        reply(response);
    }

    hub.unregister(id);
    writer.abort();
    info!(connection = id, "control client disconnected");
}

impl ControlHub {
    /// Sends `response` to a single connection.
    pub fn send_to(&self, id: u64, response: Response) -> bool {
        let tx = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        match tx {
            Some(tx) => tx.send(response.to_json()).is_ok(),
            None => false,
        }
    }
}
