// Tracking service implementations
pub mod http;

pub use http::HttpTrackingService;
