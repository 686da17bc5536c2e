//! Keeps a free-tier host awake while someone is listening.

use std::sync::Arc;

use reqwest::Client;
use tokio::{
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tracing::{debug, info, warn};

use crate::station::Station;

pub(crate) fn spawn(station: Arc<Station>, app: String) -> JoinHandle<()> {
    spawn_url(station, format!("https://{app}.herokuapp.com"))
}

pub(crate) fn spawn_url(station: Arc<Station>, url: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cancel = station.shutdown_token();
        let period = station.options().self_ping_interval;
        let client = Client::new();
        let mut ticker = interval_at(Instant::now() + period, period);
        info!(%url, "self-pinger started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if station.listeners() == 0 {
                        continue;
                    }
                    match client.get(&url).send().await {
                        Ok(response) => debug!(status = %response.status(), "self-ping"),
                        Err(e) => warn!("self-ping failed: {}", e),
                    }
                }
            }
        }
    })
}
