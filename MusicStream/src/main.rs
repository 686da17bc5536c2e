use std::{process::ExitCode, sync::Arc};

use msconfig::get_config;
use msradio::RadioStation;
use msserver::{LoggingOptions, ServerBuilder, init_logging};
use mssource::{CsnSource, HttpSource, MusixmatchClient, SourceKind, YoutubeSource};
use msstream::{Station, StationError, StationExt, StationOptions};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let config = get_config();
    if let Err(e) = init_logging(LoggingOptions::from_config(&config)) {
        eprintln!("cannot initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    // ========== PHASE 1 : Serveur HTTP ==========
    let mut server = ServerBuilder::new_configured().build();
    server
        .add_route("/info", || async {
            serde_json::json!({"name": "MusicStream", "version": env!("CARGO_PKG_VERSION")})
        })
        .await;

    // ========== PHASE 2 : Sources et station ==========
    info!("🎵 Registering music sources...");
    let mut builder = Station::builder()
        .options(StationOptions::from_config(&config))
        .source(Arc::new(HttpSource::new()))
        .shutdown_token(server.shutdown_token());

    match CsnSource::new(config.get_csn_proxy_url().as_deref()) {
        Ok(csn) => builder = builder.source(Arc::new(csn)),
        Err(e) => warn!("⚠️ Chiasenhac source disabled: {}", e),
    }

    match config.get_youtube_developer_key() {
        Some(key) => {
            let api = config.get_youtube_stream_api_url();
            info!("📺 YouTube audio resolved through {}", api);
            builder = builder.source(Arc::new(YoutubeSource::new(key, api)));
        }
        None => info!("📺 No YouTube developer key, YouTube source disabled"),
    }

    let default_source = config.get_default_source();
    match SourceKind::from_id(&default_source) {
        Some(kind) => builder = builder.default_source(kind),
        None => warn!("⚠️ Unknown default source '{}', selector 0 is refused", default_source),
    }

    match config.get_radio_enabled() {
        Ok(true) => {
            let radio = RadioStation::from_config(&config);
            info!("📻 Radio fallback on {}", radio.stream_url());
            builder = builder.radio(Arc::new(radio));
        }
        Ok(false) => info!("📻 Radio fallback disabled"),
        Err(e) => warn!("⚠️ radio.enabled: {}, radio fallback disabled", e),
    }

    if let Some(token) = config.get_musixmatch_user_token() {
        info!("🎤 Lyrics lookup enabled");
        builder = builder.lyrics(Arc::new(MusixmatchClient::new(
            token,
            config.get_musixmatch_ob_user_token(),
        )));
    }

    let station = match builder.build().await {
        Ok(station) => station,
        Err(e) => {
            error!("❌ Cannot build the station: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(sources) = station.sources_response().data.get("sources") {
        info!("✅ Music sources: {}", sources);
    }

    server.init_station_routes(station.clone()).await;

    // ========== PHASE 3 : Démarrage ==========
    info!("🌐 Starting HTTP server...");
    if let Err(e) = server.start().await {
        error!("❌ {:#}", e);
        return ExitCode::FAILURE;
    }

    let scheduler = match station.spawn() {
        Ok(handle) => handle,
        Err(e) => {
            error!("❌ Cannot start the scheduler: {}", e);
            server.stop();
            return ExitCode::FAILURE;
        }
    };
    info!("✅ MusicStream is ready!");
    info!("Press Ctrl+C to stop...");

    let outcome = scheduler.await;
    server.stop();
    server.wait().await;

    match outcome {
        Ok(Ok(())) => {
            info!("👋 MusicStream stopped");
            ExitCode::SUCCESS
        }
        Ok(Err(e @ StationError::Watchdog { .. })) => {
            error!("❌ {}, exiting so the supervisor restarts us", e);
            ExitCode::FAILURE
        }
        Ok(Err(e)) => {
            error!("❌ Scheduler stopped: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("❌ Scheduler task failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
