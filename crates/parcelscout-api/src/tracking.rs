use thiserror::Error;
use tracing::debug;

use crate::types::{DetectResponse, ErrorDetail, TrackResponse};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

#[derive(Error, Debug)]
pub enum TrackingApiError {
    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("Tracking number not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    ParseError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrackingApiError>;

/// Client for the carrier tracking service.
///
/// Every call is a single attempt: there is no retry or backoff here, a failed
/// request is reported to the caller as-is.
pub struct TrackingClient {
    client: reqwest::Client,
    base_url: String,
}

impl TrackingClient {
    /// For self-hosted tracking services
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("ParcelScout/0.1.0"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the current tracking snapshot for a tracking number.
    ///
    /// Without a carrier the service detects one from the number's format.
    /// A response with `success: false` is returned as-is; only transport
    /// failures, unexpected statuses and undecodable bodies are errors.
    pub async fn track(&self, tracking_number: &str, carrier: Option<&str>) -> Result<TrackResponse> {
        let url = format!(
            "{}/track/{}",
            self.base_url,
            urlencoding::encode(tracking_number)
        );

        let mut request = self.client.get(&url);
        if let Some(carrier) = carrier {
            request = request.query(&[("carrier", carrier)]);
        }

        debug!("GET {} (carrier: {:?})", url, carrier);
        let response = request.send().await?;

        if response.status() == 404 {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorDetail>(&body)
                .map(|d| d.detail)
                .unwrap_or_else(|_| tracking_number.to_string());
            return Err(TrackingApiError::NotFound(detail));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrackingApiError::RequestFailed(format!(
                "Status {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        let parsed: TrackResponse = serde_json::from_str(&body)?;
        Ok(parsed)
    }

    /// Ask the service which carrier a tracking number belongs to
    pub async fn detect(&self, tracking_number: &str) -> Result<DetectResponse> {
        let url = format!(
            "{}/detect/{}",
            self.base_url,
            urlencoding::encode(tracking_number)
        );

        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrackingApiError::RequestFailed(format!(
                "Status {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        let parsed: DetectResponse = serde_json::from_str(&body)?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACK_BODY: &str = r#"{
        "success": true,
        "cached": false,
        "package": {
            "id": "ups_1Z999AA10123456784",
            "tracking_number": "1Z999AA10123456784",
            "carrier": "ups",
            "carrier_detected": true,
            "status": "in_transit",
            "events": [
                {
                    "timestamp": "2024-03-02T10:15:00",
                    "status": "In Transit",
                    "location": "Louisville, KY",
                    "description": "Departed from facility"
                }
            ],
            "last_updated": "2024-03-02T11:00:00",
            "created_at": "2024-03-02T11:00:00"
        }
    }"#;

    #[tokio::test]
    async fn test_track_success() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/track/1Z999AA10123456784?carrier=ups")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TRACK_BODY)
            .create_async()
            .await;

        let client = TrackingClient::with_base_url(server.url()).unwrap();
        let response = client.track("1Z999AA10123456784", Some("ups")).await.unwrap();

        mock.assert_async().await;
        assert!(response.success);
        assert!(!response.cached);
        let package = response.package.unwrap();
        assert_eq!(package.carrier, "ups");
        assert_eq!(package.events.len(), 1);
        assert_eq!(package.nickname, None);
    }

    #[tokio::test]
    async fn test_track_without_carrier_sends_no_query() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/track/9400111899223100000000")
            .match_query(mockito::Matcher::Missing)
            .with_status(200)
            .with_body(r#"{"success": false, "error": "Unable to retrieve tracking information"}"#)
            .create_async()
            .await;

        let client = TrackingClient::with_base_url(server.url()).unwrap();
        let response = client.track("9400111899223100000000", None).await.unwrap();

        mock.assert_async().await;
        assert!(!response.success);
        assert!(response.package.is_none());
        assert_eq!(
            response.error.as_deref(),
            Some("Unable to retrieve tracking information")
        );
    }

    #[tokio::test]
    async fn test_track_not_found_uses_detail() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/track/ABC12")
            .with_status(404)
            .with_body(r#"{"detail": "Could not detect carrier from tracking number. Please specify manually."}"#)
            .create_async()
            .await;

        let client = TrackingClient::with_base_url(server.url()).unwrap();
        let err = client.track("ABC12", None).await.unwrap_err();

        mock.assert_async().await;
        match err {
            TrackingApiError::NotFound(detail) => assert!(detail.contains("Could not detect carrier")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_track_server_error() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/track/ABC12")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = TrackingClient::with_base_url(server.url()).unwrap();
        let result = client.track("ABC12", None).await;

        mock.assert_async().await;
        assert!(matches!(result, Err(TrackingApiError::RequestFailed(_))));
    }

    #[tokio::test]
    async fn test_track_malformed_body() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/track/ABC12")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = TrackingClient::with_base_url(server.url()).unwrap();
        let result = client.track("ABC12", None).await;

        mock.assert_async().await;
        assert!(matches!(result, Err(TrackingApiError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_detect() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/detect/1Z999AA10123456784")
            .with_status(200)
            .with_body(r#"{"tracking_number": "1Z999AA10123456784", "detected_carrier": "ups", "confidence": "high"}"#)
            .create_async()
            .await;

        let client = TrackingClient::with_base_url(format!("{}/", server.url())).unwrap();
        let detected = client.detect("1Z999AA10123456784").await.unwrap();

        mock.assert_async().await;
        assert_eq!(detected.detected_carrier, "ups");
        assert_eq!(detected.confidence.as_deref(), Some("high"));
    }
}
