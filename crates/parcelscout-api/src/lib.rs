// HTTP client for the carrier tracking service
pub mod tracking;
pub mod types;

// Re-export common types
pub use tracking::{TrackingApiError, TrackingClient, DEFAULT_BASE_URL};
pub use types::{DetectResponse, TrackResponse, WirePackage, WireTrackingEvent};
