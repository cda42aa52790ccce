use crate::config::Config;
use async_trait::async_trait;
use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

#[derive(Debug)]
pub enum LinkEvent {
    Message { topic: String, payload: Bytes },
    Closed { reason: TransportError },
}

/// Factory for broker connections. The supervisor calls `connect` once per
/// attempt; socket-level state lives entirely inside the returned link.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn TransportLink>, TransportError>;
}

/// One established broker connection.
#[async_trait]
pub trait TransportLink: Send {
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;
    async fn next_event(&mut self) -> LinkEvent;
    async fn close(&mut self);
}

pub struct MqttTransport {
    config: Config,
}

impl MqttTransport {
    pub fn from_config(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    // A fresh client id per connection keeps concurrent subscriptions from
    // kicking each other off the broker.
    fn options(&self) -> MqttOptions {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        let client_id = format!("{}-{}", self.config.mqtt_client_id, suffix);

        let mut options = MqttOptions::new(
            client_id,
            self.config.mqtt_host.clone(),
            self.config.mqtt_port,
        );
        options.set_keep_alive(self.config.mqtt_keepalive());
        options.set_clean_session(self.config.mqtt_clean_session);
        if self.config.mqtt_use_tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        if let Some(username) = &self.config.mqtt_username {
            options.set_credentials(
                username.clone(),
                self.config.mqtt_password.clone().unwrap_or_default(),
            );
        }
        options
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<Box<dyn TransportLink>, TransportError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), 32);
        let connect_timeout = self.config.mqtt_connect_timeout();
        let deadline = tokio::time::Instant::now() + connect_timeout;

        loop {
            let polled = tokio::time::timeout_at(deadline, eventloop.poll())
                .await
                .map_err(|_| TransportError::ConnectTimeout(connect_timeout))?;
            match polled {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok(Box::new(MqttLink { client, eventloop }));
                    }
                    return Err(TransportError::Connect(format!(
                        "broker rejected connection: {:?}",
                        ack.code
                    )));
                }
                Ok(_) => {}
                Err(err) => return Err(TransportError::Connect(err.to_string())),
            }
        }
    }
}

struct MqttLink {
    client: AsyncClient,
    eventloop: EventLoop,
}

#[async_trait]
impl TransportLink for MqttLink {
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        // At-most-once delivery; the rate limiter downstream already
        // tolerates dropped messages.
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|err| TransportError::Subscribe(err.to_string()))
    }

    async fn next_event(&mut self) -> LinkEvent {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    return LinkEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload,
                    };
                }
                Ok(_) => {}
                Err(err) => {
                    return LinkEvent::Closed {
                        reason: TransportError::ConnectionLost(err.to_string()),
                    };
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.client.disconnect().await;
    }
}
