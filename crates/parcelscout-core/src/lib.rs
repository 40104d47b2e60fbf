// Client-side package state: the store, merging remote snapshots into it,
// refreshing, import/export and stats
pub mod auto_refresh;
pub mod config;
pub mod error;
pub mod export;
pub mod models;
pub mod providers;
pub mod reconcile;
pub mod service;
pub mod stats;
pub mod store;
pub mod tracker;

pub use auto_refresh::{AutoRefresh, AutoRefreshHandle, DEFAULT_REFRESH_INTERVAL};
pub use config::Config;
pub use error::Error;
pub use export::Exporter;
pub use models::{Carrier, NewPackage, Package, PackagePatch, PackageStatus, TrackingEvent};
pub use providers::HttpTrackingService;
pub use service::{TrackedSnapshot, TrackingService};
pub use stats::PackageStats;
pub use store::{PackageStore, SharedStore, STORAGE_KEY};
pub use tracker::{RefreshOutcome, Tracker};

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
