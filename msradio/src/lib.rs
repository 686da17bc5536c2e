//! # msradio
//!
//! Fallback radio played while the queue is empty: the listen.moe Ogg/Vorbis
//! stream, and its websocket gateway announcing the song on air.
//!
//! ```no_run
//! use std::sync::Arc;
//! use msradio::RadioStation;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() {
//! let station = Arc::new(RadioStation::from_config(&msconfig::get_config()));
//! let cancel = CancellationToken::new();
//! let feed = station.spawn_gateway(cancel.clone());
//! let mut updates = station.subscribe();
//! while updates.changed().await.is_ok() {
//!     println!("now playing: {}", updates.borrow().title);
//! }
//! cancel.cancel();
//! let _ = feed.await;
//! # }
//! ```

pub mod error;
mod gateway;
pub mod models;
mod station;

pub use error::{Error, Result};
pub use gateway::run_gateway;
pub use models::{GatewayEvent, GatewayMessage, NowPlaying, RADIO_NAME};
pub use station::RadioStation;
