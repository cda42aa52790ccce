use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// One decoded water-quality reading. The timestamp is assigned at
/// validation time; publisher-supplied timestamps are not trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub ph: Option<f64>,
    pub turbidity: Option<f64>,
    pub dissolved_solids: Option<f64>,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("no recognized sensor fields in payload")]
    NoRecognizedFields,
}

#[derive(Debug, Deserialize)]
struct WirePayload {
    #[serde(default)]
    ph: Option<f64>,
    #[serde(default)]
    tbdt: Option<f64>,
    #[serde(default)]
    tds: Option<f64>,
}

/// Decode a raw sensor payload into a [`Sample`]. A missing field stays
/// absent rather than defaulting to zero, so "no reading" and "reading is
/// zero" never collapse into each other.
pub fn parse_sensor_payload(payload: &mut [u8]) -> Result<Sample, ValidationError> {
    let wire: WirePayload = simd_json::from_slice(payload)
        .map_err(|err| ValidationError::MalformedPayload(err.to_string()))?;

    let ph = wire.ph.map(round2);
    let turbidity = wire.tbdt.map(round2);
    let dissolved_solids = wire.tds.map(round2);

    if ph.is_none() && turbidity.is_none() && dissolved_solids.is_none() {
        return Err(ValidationError::NoRecognizedFields);
    }

    Ok(Sample {
        timestamp: Utc::now(),
        ph,
        turbidity,
        dissolved_solids,
    })
}

// Upstream sensors report two decimals of precision; anything beyond that is
// conversion noise.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
