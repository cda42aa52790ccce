use anyhow::Result;
use aquasense::config::Config;
use aquasense::forecast::{self, ForecastClient};
use aquasense::pipeline::{IngestionPipeline, TelemetryObserver};
use aquasense::supervisor::ConnectionState;
use aquasense::telemetry::{Sample, ValidationError};
use std::sync::Arc;

struct LogObserver;

impl TelemetryObserver for LogObserver {
    fn on_sample(&self, window: &[Sample], latest: &Sample) {
        tracing::info!(
            window_len = window.len(),
            ph = ?latest.ph,
            turbidity = ?latest.turbidity,
            dissolved_solids = ?latest.dissolved_solids,
            "sample ingested"
        );
    }

    fn on_invalid_message(&self, error: &ValidationError) {
        tracing::warn!(error = %error, "invalid sensor message");
    }

    fn on_connection_state_changed(&self, old: ConnectionState, new: ConnectionState) {
        tracing::info!(%old, %new, "connection state changed");
    }
}

fn init_tracing() -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,aquasense=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let pipeline = IngestionPipeline::new(config.clone());
    let handle = pipeline.start(&config.topic, Arc::new(LogObserver));
    tracing::info!(
        topic = %config.topic,
        host = %config.mqtt_host,
        port = config.mqtt_port,
        "ingestion started"
    );

    let _forecast_task = ForecastClient::from_config(&config)
        .map(|client| forecast::spawn_refresh_task(client, config.forecast_refresh_interval()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    handle.stop();

    Ok(())
}
