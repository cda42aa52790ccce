use crate::config::Config;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Client for the external maintenance-forecast service. The ingestion
/// pipeline never calls this; the surrounding application does.
#[derive(Clone)]
pub struct ForecastClient {
    client: Client,
    url: String,
    token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceForecast {
    #[serde(default)]
    pub next_maintenance: Option<DateTime<Utc>>,
    #[serde(default)]
    pub advisories: Vec<String>,
}

impl ForecastClient {
    pub fn from_config(config: &Config) -> Option<Self> {
        let url = config.forecast_url.clone()?;
        Some(Self {
            client: Client::new(),
            url,
            token: config.forecast_token.clone(),
        })
    }

    /// Ask the service to recompute the maintenance schedule.
    pub async fn request_schedule(&self) -> Result<MaintenanceForecast> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&json!({ "requested_at": Utc::now() }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("forecast request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("forecast service returned {status}");
        }
        response.json().await.context("decode forecast response")
    }
}

pub fn spawn_refresh_task(client: ForecastClient, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match client.request_schedule().await {
                Ok(forecast) => {
                    tracing::info!(
                        next_maintenance = ?forecast.next_maintenance,
                        advisories = forecast.advisories.len(),
                        "maintenance forecast refreshed"
                    );
                }
                Err(err) => tracing::warn!(error = %err, "maintenance forecast request failed"),
            }
        }
    })
}
