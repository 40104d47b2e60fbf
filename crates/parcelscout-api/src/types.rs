use serde::{Deserialize, Serialize};

/// Body of `GET /track/{tracking_number}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackResponse {
    pub success: bool,
    #[serde(default)]
    pub package: Option<WirePackage>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cached: bool,
}

/// Package snapshot as the tracking service sends it.
///
/// Carrier and status stay as raw strings and timestamps stay as text: the
/// service emits naive ISO-8601 datetimes without an offset, so the conversion
/// into the domain model decides how to read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePackage {
    pub id: String,
    pub tracking_number: String,
    pub carrier: String,
    #[serde(default)]
    pub carrier_detected: bool,
    #[serde(default)]
    pub nickname: Option<String>,
    pub status: String,
    #[serde(default)]
    pub estimated_delivery: Option<String>,
    #[serde(default)]
    pub events: Vec<WireTrackingEvent>,
    pub last_updated: String,
    pub created_at: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub delivered_at: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTrackingEvent {
    pub timestamp: String,
    pub status: String,
    #[serde(default)]
    pub location: Option<String>,
    pub description: String,
    #[serde(default)]
    pub raw_status: Option<String>,
}

/// Body of `GET /detect/{tracking_number}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub tracking_number: Option<String>,
    pub detected_carrier: String,
    #[serde(default)]
    pub confidence: Option<String>,
}

/// Error body FastAPI-style services send alongside 4xx responses
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorDetail {
    pub detail: String,
}
