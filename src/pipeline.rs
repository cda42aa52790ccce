use crate::config::Config;
use crate::limiter::RateLimiter;
use crate::supervisor::{
    ConnectionState, ConnectionSupervisor, SharedConnectionState, SupervisorCommand,
    SupervisorConfig, SupervisorEvent,
};
use crate::telemetry::{parse_sensor_payload, Sample, ValidationError};
use crate::transport::{MqttTransport, Transport};
use crate::window::SampleWindow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Callbacks fired from the ingestion task. Implementations must not block;
/// they run on the single per-subscription delivery path.
pub trait TelemetryObserver: Send + Sync {
    fn on_sample(&self, window: &[Sample], latest: &Sample);
    fn on_invalid_message(&self, error: &ValidationError);
    fn on_connection_state_changed(&self, old: ConnectionState, new: ConnectionState);
}

pub struct IngestionPipeline {
    config: Config,
    transport: Arc<dyn Transport>,
}

impl IngestionPipeline {
    pub fn new(config: Config) -> Self {
        let transport = Arc::new(MqttTransport::from_config(&config));
        Self { config, transport }
    }

    pub(crate) fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// Begin ingesting `<topic>/sensor`. Each call yields an independent
    /// session with its own supervisor, window and limiter.
    pub fn start(&self, topic: &str, observer: Arc<dyn TelemetryObserver>) -> PipelineHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let state = SharedConnectionState::new();
        let stopped = Arc::new(AtomicBool::new(false));

        let supervisor = ConnectionSupervisor::new(
            self.transport.clone(),
            SupervisorConfig {
                topic: topic.to_string(),
                retry_max_attempts: self.config.retry_max_attempts,
                retry_delay: self.config.retry_delay(),
            },
            state.clone(),
            event_tx,
            command_rx,
            cancel.clone(),
        );
        tokio::spawn(supervisor.run());

        let window = SampleWindow::new(self.config.window_capacity);
        let limiter = RateLimiter::new(self.config.min_sample_interval());
        tokio::spawn(run_ingest_worker(
            event_rx,
            observer,
            window,
            limiter,
            format!("{topic}/sensor"),
            stopped.clone(),
        ));

        PipelineHandle {
            topic: topic.to_string(),
            stopped,
            cancel,
            commands: command_tx,
            state,
        }
    }
}

/// Owner of one active ingestion session. Dropping the handle tears the
/// session down as if `stop` had been called.
pub struct PipelineHandle {
    topic: String,
    stopped: Arc<AtomicBool>,
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<SupervisorCommand>,
    state: SharedConnectionState,
}

impl PipelineHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Request a fresh connection cycle after the supervisor has given up.
    /// No-op unless the session is in `Failed` state.
    pub fn reconnect(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.commands.send(SupervisorCommand::Reconnect);
    }

    /// Tear down the session: close the broker connection and cancel any
    /// pending retry timer. Idempotent; no observer callback fires after
    /// the first call returns.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_ingest_worker(
    mut events: mpsc::UnboundedReceiver<SupervisorEvent>,
    observer: Arc<dyn TelemetryObserver>,
    mut window: SampleWindow,
    mut limiter: RateLimiter,
    sensor_topic: String,
    stopped: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        // In-flight events must not reach the observer once the handle is
        // stopped.
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        match event {
            SupervisorEvent::StateChanged { old, new, error } => {
                if let Some(detail) = error {
                    tracing::warn!(%old, %new, error = %detail, "connection state changed");
                }
                observer.on_connection_state_changed(old, new);
            }
            SupervisorEvent::Message { topic, payload } => {
                if topic != sensor_topic {
                    tracing::trace!(%topic, "ignoring message from unexpected topic");
                    continue;
                }
                let mut buf = payload.to_vec();
                match parse_sensor_payload(&mut buf) {
                    Ok(sample) => {
                        let Some(sample) = limiter.admit(sample) else {
                            continue;
                        };
                        window.push(sample.clone());
                        let snapshot = window.snapshot();
                        observer.on_sample(&snapshot, &sample);
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "dropped invalid sensor payload");
                        observer.on_invalid_message(&err);
                    }
                }
            }
        }
    }
}
