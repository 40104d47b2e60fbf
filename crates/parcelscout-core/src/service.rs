use async_trait::async_trait;

use crate::models::{Carrier, Package};
use crate::Result;

/// A package snapshot fresh from the tracking service
#[derive(Debug, Clone)]
pub struct TrackedSnapshot {
    pub package: Package,
    /// Served from the service's own cache rather than the carrier
    pub cached: bool,
}

/// Trait for the remote tracking service - keeps the store testable
///
/// The HTTP implementation lives in `providers`; tests plug in mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackingService: Send + Sync {
    /// Fetch the current state of a shipment. `None` lets the service detect
    /// the carrier itself. Any unsuccessful response is an `Err`.
    async fn track(&self, tracking_number: &str, carrier: Option<Carrier>) -> Result<TrackedSnapshot>;

    /// Guess the carrier from the tracking number's format
    async fn detect(&self, tracking_number: &str) -> Result<Carrier>;
}
