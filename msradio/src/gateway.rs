//! Now-playing feed over the radio's websocket gateway.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::{sync::watch, time::Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    models::{GatewayEvent, GatewayMessage, NowPlaying, HEARTBEAT_FRAME},
};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Applies one text frame to the shared state.
///
/// Returns the heartbeat period when the frame is a hello.
pub(crate) fn apply_frame(text: &str, state: &watch::Sender<NowPlaying>) -> Result<Option<Duration>> {
    let message = GatewayMessage::parse(text)?;
    let previous = state.borrow().clone();
    match message.event(&previous)? {
        Some(GatewayEvent::Hello { heartbeat }) => Ok(Some(heartbeat)),
        Some(GatewayEvent::TrackUpdate(now)) => {
            info!(title = %now.title, artist = %now.artist, "radio: track update");
            state.send_replace(now);
            Ok(None)
        }
        None => Ok(None),
    }
}

/// One gateway session. Returns when the socket closes or on cancel.
async fn session(url: &str, state: &watch::Sender<NowPlaying>, cancel: &CancellationToken) -> Result<()> {
    let (mut ws, _) = connect_async(url).await?;
    info!(url, "radio: gateway connected");

    let mut period: Option<Duration> = None;
    let mut next_beat: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.close(None).await;
                return Ok(());
            }
            _ = tokio::time::sleep_until(next_beat.unwrap_or_else(Instant::now)), if next_beat.is_some() => {
                ws.send(Message::text(HEARTBEAT_FRAME)).await?;
                next_beat = period.map(|p| Instant::now() + p);
            }
            frame = ws.next() => {
                match frame {
                    None | Some(Ok(Message::Close(_))) => return Ok(()),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Message::Text(text))) => match apply_frame(text.as_str(), state) {
                        Ok(Some(heartbeat)) => {
                            debug!(?heartbeat, "radio: heartbeat armed");
                            period = Some(heartbeat);
                            next_beat = Some(Instant::now() + heartbeat);
                        }
                        Ok(None) => {}
                        Err(e) => warn!("radio: unreadable gateway frame: {e}"),
                    },
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Keeps a gateway session alive until `cancel` fires.
///
/// Every disconnect resets the state to the bare radio name, then the
/// connection is retried with exponential back-off.
pub async fn run_gateway(url: String, state: watch::Sender<NowPlaying>, cancel: CancellationToken) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let started = Instant::now();
        match session(&url, &state, &cancel).await {
            Ok(()) => info!("radio: gateway disconnected"),
            Err(e) => warn!("radio: gateway failure: {e}"),
        }
        state.send_replace(NowPlaying::default());

        if cancel.is_cancelled() {
            return;
        }
        if started.elapsed() > MAX_BACKOFF {
            backoff = INITIAL_BACKOFF;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
