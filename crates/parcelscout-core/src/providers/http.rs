// HTTP provider - bridges the API client with the TrackingService trait
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use parcelscout_api::{TrackingClient, WirePackage, WireTrackingEvent};

use crate::{
    models::{Carrier, Package, PackageStatus, TrackingEvent},
    service::{TrackedSnapshot, TrackingService},
    Error, Result,
};

/// Wrapper around TrackingClient that implements TrackingService
pub struct HttpTrackingService {
    client: TrackingClient,
}

impl HttpTrackingService {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = TrackingClient::with_base_url(base_url.to_string())
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TrackingService for HttpTrackingService {
    async fn track(&self, tracking_number: &str, carrier: Option<Carrier>) -> Result<TrackedSnapshot> {
        let response = self
            .client
            .track(tracking_number, carrier.map(|c| c.as_str()))
            .await
            .map_err(|e| Error::ApiError(e.to_string()))?;

        if !response.success {
            return Err(Error::ApiError(
                response
                    .error
                    .unwrap_or_else(|| "Unable to retrieve tracking information".to_string()),
            ));
        }

        let package = response
            .package
            .ok_or_else(|| Error::ApiError("Response carried no package".to_string()))?;

        Ok(TrackedSnapshot {
            package: wire_to_package(package)?,
            cached: response.cached,
        })
    }

    async fn detect(&self, tracking_number: &str) -> Result<Carrier> {
        let detected = self
            .client
            .detect(tracking_number)
            .await
            .map_err(|e| Error::ApiError(e.to_string()))?;

        Ok(Carrier::from_wire(&detected.detected_carrier))
    }
}

/// Convert the service's package into our model
fn wire_to_package(wire: WirePackage) -> Result<Package> {
    let events = wire
        .events
        .into_iter()
        .map(wire_to_event)
        .collect::<Result<Vec<_>>>()?;

    let mut package = Package {
        id: wire.id,
        tracking_number: wire.tracking_number,
        carrier: Carrier::from_wire(&wire.carrier),
        carrier_detected: wire.carrier_detected,
        nickname: wire.nickname,
        status: PackageStatus::from_wire(&wire.status),
        estimated_delivery: optional_timestamp(wire.estimated_delivery.as_deref())?,
        events,
        last_updated: required_timestamp(&wire.last_updated)?,
        created_at: required_timestamp(&wire.created_at)?,
        archived: wire.archived,
        delivered_at: optional_timestamp(wire.delivered_at.as_deref())?,
        source: wire.source,
    };
    package.normalize_events();
    Ok(package)
}

fn wire_to_event(wire: WireTrackingEvent) -> Result<TrackingEvent> {
    Ok(TrackingEvent {
        timestamp: required_timestamp(&wire.timestamp)?,
        status: wire.status,
        location: wire.location,
        description: wire.description,
        raw_status: wire.raw_status,
    })
}

fn required_timestamp(value: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(value)
        .ok_or_else(|| Error::ApiError(format!("Invalid timestamp in response: {}", value)))
}

fn optional_timestamp(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(required_timestamp).transpose()
}

/// RFC 3339, or naive ISO-8601 which the service means as UTC
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
