use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod metrics;
pub mod notification;
pub mod routes;
pub mod telemetry;

use batch::BatchQueue;
use config::Config;
use context::AppContext;
use gateway::Gateway;
use ledger::{LedgerBackend, LedgerClient, TcpLedgerBackend};
use notification::NotificationForwarder;
use telemetry::{ResolutionTracer, StallDetector, SystemResolver, TelemetryEmitter};

/// Delay before the startup event that confirms the collector path
const STARTUP_EVENT_DELAY: Duration = Duration::from_secs(1);

/// A wired gateway, ready to be served
pub struct App {
    pub router: Router,
    pub gateway: Gateway,
}

/// Connects to the ledger and wires the gateway. Fails if the ledger is
/// unreachable.
pub async fn build_app(config: Arc<Config>, telemetry: TelemetryEmitter) -> Result<App> {
    let resolver = traced_resolver(&config, &telemetry);
    let backend = TcpLedgerBackend::connect(&config.ledger, Arc::new(resolver)).await?;
    build_app_with_backend(config, telemetry, Arc::new(backend))
}

pub fn build_app_with_backend(
    config: Arc<Config>,
    telemetry: TelemetryEmitter,
    backend: Arc<dyn LedgerBackend>,
) -> Result<App> {
    let ledger = LedgerClient::new(backend);
    let batches = BatchQueue::new(ledger.clone(), &config.batch, telemetry.clone());

    let forwarder =
        NotificationForwarder::new(&config.notification, traced_resolver(&config, &telemetry))?;

    let gateway = Gateway::new(batches, ledger, forwarder, config.notification.clone());
    let app_context = Arc::new(AppContext::new(gateway.clone(), config));

    Ok(App {
        router: routes::create_router(app_context),
        gateway,
    })
}

fn traced_resolver(config: &Config, telemetry: &TelemetryEmitter) -> ResolutionTracer {
    ResolutionTracer::new(SystemResolver, telemetry.clone(), config.service_name.clone())
}

pub fn init_tracing(rust_log: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Runs the gateway until ctrl-c. A fatal error is reported to the collector
/// before it is returned.
pub async fn run() -> Result<()> {
    let config = Arc::new(Config::from_env()?);
    init_tracing(&config.rust_log);

    info!("=== Batch Gateway Starting ===");
    info!("Port: {}", config.port);
    info!(
        "Flush window: {}ms",
        config.batch.flush_window.as_millis()
    );

    let (telemetry, _sink) = TelemetryEmitter::start(&config.telemetry, &config.service_name);
    telemetry::install_panic_hook(telemetry.clone(), config.service_name.clone());

    let result = serve(config.clone(), telemetry.clone()).await;
    if let Err(e) = &result {
        tracing::error!(error = %format!("{:#}", e), "Gateway failed");
        telemetry.emit_label(format!("{}: fatal error: {:#}", config.service_name, e));
        // Let the sink send before the process exits
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    result
}

async fn serve(config: Arc<Config>, telemetry: TelemetryEmitter) -> Result<()> {
    let stall_probe = StallDetector::new(&config.stall, tokio::time::Instant::now())
        .spawn(telemetry.clone(), config.service_name.clone());

    tokio::spawn({
        let telemetry = telemetry.clone();
        let service_name = config.service_name.clone();
        async move {
            tokio::time::sleep(STARTUP_EVENT_DELAY).await;
            telemetry.emit_label(format!("initialized telemetry in {}", service_name));
        }
    });

    let app = build_app(config.clone(), telemetry).await?;

    let address = config.listen_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;
    info!("Batch Gateway listening on {}", address);

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to start server")?;

    info!("Draining pending batches");
    for handle in app.gateway.batches().flush_all() {
        if let Err(e) = handle.await {
            warn!(error = %e, "Batch drain task failed");
        }
    }
    stall_probe.abort();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received. Shutting down...");
}
