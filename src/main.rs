//! camwarden daemon entry point

use camwarden::{
    device::{DeviceTracker, SysfsInspector},
    hardware::HardwareProbe,
    ingress,
    mediamtx::MediaMtxClient,
    moonraker::MoonrakerClient,
    reconciler::{spawn_timer, Reconciler},
    settings_store::{keys, SettingsStore},
    state::{AppConfig, AppState},
    web_api, Error,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code for settings store corruption, distinguishable by the service
/// manager from ordinary failures.
const EXIT_CORRUPTION: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camwarden=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camwarden v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env();
    tracing::info!(
        base_dir = %config.base_dir.display(),
        mediamtx_url = %config.mediamtx_url,
        moonraker_url = %config.moonraker_url,
        "Configuration loaded"
    );

    // A corrupt store must not come up half-working
    let store = match SettingsStore::open(&config.database_path).await {
        Ok(store) => store,
        Err(e @ Error::Corruption(_)) => {
            tracing::error!(error = %e, "Settings store corrupt, refusing to start");
            std::process::exit(EXIT_CORRUPTION);
        }
        Err(e) => return Err(e.into()),
    };
    store.append_log("info", None, "camwarden starting").await?;
    tracing::info!("Settings store ready");

    let probe = HardwareProbe::detect().await;

    // The stored orchestrator URL wins over the environment default
    let moonraker_url = store
        .get_setting(keys::MOONRAKER_URL)
        .await?
        .and_then(|value| value.as_str().map(String::from))
        .unwrap_or_else(|| config.moonraker_url.clone());

    let mediamtx = Arc::new(MediaMtxClient::new(config.mediamtx_url.clone()));
    let moonraker = Arc::new(MoonrakerClient::new(moonraker_url));

    // Attachment state is observed, not remembered
    store.mark_all_disconnected().await?;

    let cancel = CancellationToken::new();

    let (reconciler, handle, event_tx, health) = Reconciler::new(
        store.clone(),
        probe.clone(),
        mediamtx,
        moonraker,
        config.rtsp_base.clone(),
    );

    let inspector = Arc::new(SysfsInspector::new());
    let (hotplug_tx, hotplug_rx) = mpsc::channel(64);

    let tracker = DeviceTracker::new(inspector.clone(), event_tx);
    tokio::spawn(tracker.run(hotplug_rx, cancel.clone()));

    let ingress_mode = ingress::start(hotplug_tx, cancel.clone()).await;
    tracing::info!(mode = ingress_mode.as_str(), "Event ingress started");

    spawn_timer(handle.clone(), cancel.clone());
    tokio::spawn(reconciler.run(cancel.clone()));

    // First pass converges whatever the initial scan found
    handle.trigger();

    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        probe,
        reconciler: handle,
        health,
        inspector,
        ingress_mode,
    };

    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Admin API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    store.append_log("info", None, "camwarden stopped").await.ok();
    tracing::info!("camwarden stopped");

    Ok(())
}

/// Resolves on SIGINT, SIGTERM, or an internally requested shutdown (e.g.
/// the ingress losing its subscription).
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = cancel.cancelled() => tracing::info!("Internal shutdown requested"),
    }

    cancel.cancel();
}
