//! Inactivity standby.
//!
//! Listener connections and the periodic "listeners are still here" tick
//! count as activity. When none is seen for the configured timeout, the
//! current playback is stopped and the stream lock is held so that nothing
//! new starts; the next listener connection releases it.

use std::sync::Arc;

use tokio::{
    sync::OwnedMutexGuard,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, sleep_until},
};
use tracing::{debug, info};

use crate::station::{SkipRequest, Station};

pub(crate) fn spawn(station: Arc<Station>) -> JoinHandle<()> {
    tokio::spawn(monitor(station))
}

async fn monitor(station: Arc<Station>) {
    let cancel = station.shutdown_token();
    let timeout = station.options().inactivity_timeout;
    let period = station.options().listener_tick;

    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut deadline = Instant::now() + timeout;
    let mut standby: Option<OwnedMutexGuard<()>> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = station.activity().notified() => {
                deadline = Instant::now() + timeout;
                if standby.take().is_some() {
                    info!("listener connected, leaving standby");
                }
            }
            _ = tick.tick() => {
                if station.listeners() > 0 {
                    debug!(listeners = station.listeners(), "listeners still connected");
                    deadline = Instant::now() + timeout;
                }
            }
            _ = sleep_until(deadline), if standby.is_none() => {
                info!("no listener activity for {:?}, entering standby", timeout);
                let _ = station.skip_sender().try_send(SkipRequest::Standby);
                let lock = station.stream_lock().clone();
                let guard = tokio::select! {
                    _ = cancel.cancelled() => break,
                    guard = lock.lock_owned() => guard,
                };
                station.set_idle();
                standby = Some(guard);
            }
        }
    }
    debug!("standby monitor stopped");
}
