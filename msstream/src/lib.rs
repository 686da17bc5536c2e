//! # msstream
//!
//! Broadcast core of MusicStream: a single channel of audio, encoded twice
//! (Ogg/Vorbis on `/audio`, MPEG on `/fallback`) and pushed in real time to
//! every connected listener.
//!
//! ## Pipeline
//!
//! ```text
//! Queue ──► Scheduler ──► producer task ──► pacer thread ──► Fanout ──► listener sessions
//!              ▲           (decode, PCM)     (encode, pace)   (x2)
//!              └── skip / standby / radio updates
//! ```
//!
//! - [`Station`] holds all the state: queue, fanouts, pacer, playback
//!   snapshot, listener count, control connections.
//! - The scheduler plays one track at a time under the stream lock and falls
//!   back to the radio when the queue is empty.
//! - [`Fanout`] distributes each chunk without ever blocking on a slow
//!   listener.
//! - [`StationExt`] mounts the HTTP surface on an `msserver::Server`.
//!
//! ## Exemple
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use msserver::ServerBuilder;
//! use mssource::HttpSource;
//! use msstream::{Station, StationExt};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = ServerBuilder::new_configured().build();
//! let station = Station::builder()
//!     .source(Arc::new(HttpSource::new()))
//!     .shutdown_token(server.shutdown_token())
//!     .build()
//!     .await?;
//! server.init_station_routes(station.clone()).await;
//! server.start().await?;
//! station.spawn()?.await??;
//! # Ok(())
//! # }
//! ```

mod api;
pub mod control;
mod error;
pub mod fanout;
mod listener;
mod options;
mod pacer;
mod pinger;
mod producer;
mod scheduler;
mod standby;
mod station;

pub use api::StationExt;
pub use control::{ClientMessage, ControlHub, Response};
pub use error::{Result, StationError};
pub use fanout::{BroadcastReport, Chunk, Fanout, Subscription};
pub use options::StationOptions;
pub use station::{Station, StationBuilder, StreamKind};
