use anyhow::{ensure, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_connect_timeout_secs: u64,
    pub mqtt_clean_session: bool,
    pub mqtt_use_tls: bool,
    pub topic: String,
    pub retry_max_attempts: u32,
    pub retry_delay_secs: u64,
    pub min_sample_interval_ms: u64,
    pub window_capacity: usize,
    pub forecast_url: Option<String>,
    pub forecast_token: Option<String>,
    pub forecast_refresh_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let mqtt_host = env::var("AQUA_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = env::var("AQUA_MQTT_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(1883);
        let mqtt_username = env::var("AQUA_MQTT_USERNAME")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let mqtt_password = env::var("AQUA_MQTT_PASSWORD").ok();
        let mqtt_client_id =
            env::var("AQUA_MQTT_CLIENT_ID").unwrap_or_else(|_| "aquasense".to_string());
        let mqtt_keepalive_secs = env::var("AQUA_MQTT_KEEPALIVE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        let mqtt_connect_timeout_secs = env::var("AQUA_MQTT_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);
        let mqtt_clean_session = env::var("AQUA_MQTT_CLEAN_SESSION")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        let mqtt_use_tls = env::var("AQUA_MQTT_TLS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let topic = env::var("AQUA_TOPIC").unwrap_or_else(|_| "aquasense".to_string());

        let retry_max_attempts = env::var("AQUA_RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(5);
        let retry_delay_secs = env::var("AQUA_RETRY_DELAY_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);

        let min_sample_interval_ms = env::var("AQUA_MIN_SAMPLE_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3000);
        let window_capacity = env::var("AQUA_WINDOW_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(120);

        let forecast_url = env::var("AQUA_FORECAST_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let forecast_token = env::var("AQUA_FORECAST_TOKEN").ok();
        let forecast_refresh_secs = env::var("AQUA_FORECAST_REFRESH_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3600);

        ensure!(retry_max_attempts > 0, "AQUA_RETRY_MAX_ATTEMPTS must be > 0");
        ensure!(window_capacity > 0, "AQUA_WINDOW_CAPACITY must be > 0");

        Ok(Self {
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_keepalive_secs,
            mqtt_connect_timeout_secs,
            mqtt_clean_session,
            mqtt_use_tls,
            topic,
            retry_max_attempts,
            retry_delay_secs,
            min_sample_interval_ms,
            window_capacity,
            forecast_url,
            forecast_token,
            forecast_refresh_secs,
        })
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn mqtt_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt_connect_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn min_sample_interval(&self) -> Duration {
        Duration::from_millis(self.min_sample_interval_ms)
    }

    pub fn forecast_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.forecast_refresh_secs)
    }
}
