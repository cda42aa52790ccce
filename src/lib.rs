//! Ingestion of water-quality sensor telemetry (pH, turbidity, dissolved
//! solids) over MQTT, with bounded reconnection, payload validation, rate
//! limiting and a fixed-capacity window of recent samples.

pub mod config;
pub mod forecast;
pub mod limiter;
pub mod pipeline;
pub mod supervisor;
pub mod telemetry;
pub mod transport;
pub mod window;

pub use config::Config;
pub use pipeline::{IngestionPipeline, PipelineHandle, TelemetryObserver};
pub use supervisor::ConnectionState;
pub use telemetry::{Sample, ValidationError};
pub use window::SampleWindow;
