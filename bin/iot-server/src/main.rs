//! Internet of Trash Server
//!
//! Bridges smart waste bins on the MQTT broker to the backend:
//! stores the measurements bins push, lets HTTP callers force a fresh
//! reading, and accepts bulk uploads of buffered readings.
//!
//! Configuration comes from the TOML file named by `CONFIG_FILE` (defaults
//! otherwise), overridden by `IOT_*` environment variables. A `.env` file in
//! the working directory is loaded first. Set `LOG_FORMAT=json` for JSON logs.

use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use tokio::{signal, net::TcpListener, sync::broadcast};
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, error};
use tracing_subscriber::EnvFilter;

use iot_api::create_router;
use iot_bridge::{run_session, Bridge, MeasurementRepository, MqttTransport, UpdateClientConfig};
use iot_config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    info!("Starting Internet of Trash server");

    // 1. Configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // 2. Measurement storage
    let repository = create_repository(&config).await?;

    // 3. MQTT transport and bridge
    let (transport, eventloop) = MqttTransport::new(&config.mqtt);
    let transport = Arc::new(transport);
    let bridge = Arc::new(
        Bridge::new(transport.clone(), repository, UpdateClientConfig::from(&config.rpc))
            .context("Failed to register topic routes")?,
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    info!(
        broker = %config.mqtt.broker_ip,
        port = config.mqtt.broker_port,
        client_id = %config.mqtt.client_id,
        "Connecting to MQTT broker"
    );
    let session_handle = tokio::spawn(run_session(
        bridge.clone(),
        eventloop,
        shutdown_tx.subscribe(),
    ));

    // 4. HTTP API
    let app = create_router(bridge.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", config.api.listen_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(port = config.api.listen_port, "Starting HTTP API server");

    let mut server_shutdown = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "HTTP server error");
        }
    });

    info!("Server started. Press Ctrl+C to shutdown.");

    shutdown_signal().await;
    info!("Shutdown signal received...");

    if let Err(e) = transport.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    }
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(10), session_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(30), server_handle).await;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(feature = "mongo")]
async fn create_repository(config: &AppConfig) -> Result<Arc<dyn MeasurementRepository>> {
    let client = mongodb::Client::with_uri_str(&config.mongo.uri)
        .await
        .context("Failed to create MongoDB client")?;
    info!(
        database = %config.mongo.database,
        collection = %config.mongo.measurement_collection,
        "Using MongoDB measurement storage"
    );
    Ok(Arc::new(iot_bridge::MongoMeasurementRepository::new(
        client,
        &config.mongo.database,
        &config.mongo.measurement_collection,
    )))
}

#[cfg(not(feature = "mongo"))]
async fn create_repository(_config: &AppConfig) -> Result<Arc<dyn MeasurementRepository>> {
    warn!("Built without MongoDB support, measurements are kept in memory only");
    Ok(Arc::new(iot_bridge::InMemoryMeasurementRepository::new()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
