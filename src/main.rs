//! camrelay-sync
//!
//! Main entry point for the stream reconciliation controller.

use camrelay_sync::{
    fleet_client::FleetClient,
    process_supervisor::{CommandLauncher, ProcessSupervisor},
    reconciler::{shutdown_signal, Controller, ReconciliationEngine},
    relay_client::{JanusClient, StreamTemplate},
    slot_allocator::SlotAllocator,
    state::{AppConfig, AppState},
    web_api,
};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camrelay_sync=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camrelay-sync v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::parse();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }
    tracing::info!(
        fleet_endpoint = %config.fleet_endpoint,
        relay_url = %config.relay_url,
        poll_interval_secs = config.poll_interval_secs,
        slot_base = config.slot_base,
        slot_capacity = config.slot_capacity,
        relay_program = %config.relay_program,
        "Configuration loaded"
    );

    let fleet = Arc::new(FleetClient::new(
        config.fleet_endpoint.clone(),
        config.request_timeout(),
    )?);
    let relay = Arc::new(JanusClient::new(
        config.relay_url.clone(),
        config.relay_plugin.clone(),
        config.stream_secret.clone(),
        config.request_timeout(),
    )?);
    let launcher = Arc::new(CommandLauncher::new(
        config.relay_program.clone(),
        config.relay_args.clone(),
        config.rtp_host.clone(),
    ));
    let supervisor = ProcessSupervisor::new(launcher, config.termination_grace());
    let template = StreamTemplate {
        video_codec: config.video_codec.clone(),
        video_pt: config.video_pt,
        secret: config.stream_secret.clone(),
    };

    let engine = ReconciliationEngine::new(
        fleet,
        relay,
        supervisor,
        SlotAllocator::new(config.slot_base, config.slot_capacity),
        template,
    )
    .with_resync_every(config.resync_every_passes);

    let state = AppState::new();
    let controller = Controller::new(engine, state.clone(), config.poll_interval());

    let shutdown = CancellationToken::new();

    if let Some(addr) = config.status_addr {
        let app = web_api::create_router(state.clone()).layer(TraceLayer::new_for_http());
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Status API listening on {}", addr);

        let token = shutdown.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Status API stopped");
            }
        });
    }

    let token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    controller.run(shutdown).await;

    tracing::info!("camrelay-sync stopped");
    Ok(())
}
