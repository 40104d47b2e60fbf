use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// Package model - one tracked parcel
///
/// `nickname` and `archived` belong to the user. Everything else describes the
/// shipment and is owned by the tracking service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub tracking_number: String,
    pub carrier: Carrier,
    /// Carrier was inferred from the tracking number rather than picked by the user
    #[serde(default)]
    pub carrier_detected: bool,
    #[serde(default)]
    pub nickname: Option<String>,
    pub status: PackageStatus,
    #[serde(default)]
    pub estimated_delivery: Option<DateTime<Utc>>,
    /// Newest first; `events[0]` is the latest event
    #[serde(default)]
    pub events: Vec<TrackingEvent>,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Mirrors the partition holding the package
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    /// Where the package was added from
    #[serde(default)]
    pub source: Option<String>,
}

impl Package {
    /// The event shown on cards and list rows
    pub fn latest_event(&self) -> Option<&TrackingEvent> {
        self.events.first()
    }

    /// Nickname if the user gave one, tracking number otherwise
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.tracking_number)
    }

    pub fn is_delivered(&self) -> bool {
        self.status.is_delivered()
    }

    /// Restore newest-first event order. Stable, so events sharing a
    /// timestamp keep the order the carrier reported them in.
    pub fn normalize_events(&mut self) {
        self.events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    }

    pub fn tracking_url(&self) -> Option<String> {
        self.carrier.tracking_url(&self.tracking_number)
    }
}

/// A single carrier scan. Never edited after it arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub timestamp: DateTime<Utc>,
    /// Carrier's own wording, not a `PackageStatus`
    pub status: String,
    #[serde(default)]
    pub location: Option<String>,
    pub description: String,
    #[serde(default)]
    pub raw_status: Option<String>,
}

/// Which carrier ships the package
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Carrier {
    Usps,
    Ups,
    Fedex,
    Dhl,
    Amazon,
    Ontrac,
    Lasership,
    Unknown,
}

impl Carrier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Carrier::Usps => "usps",
            Carrier::Ups => "ups",
            Carrier::Fedex => "fedex",
            Carrier::Dhl => "dhl",
            Carrier::Amazon => "amazon",
            Carrier::Ontrac => "ontrac",
            Carrier::Lasership => "lasership",
            Carrier::Unknown => "unknown",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Carrier::Usps => "USPS",
            Carrier::Ups => "UPS",
            Carrier::Fedex => "FedEx",
            Carrier::Dhl => "DHL",
            Carrier::Amazon => "Amazon",
            Carrier::Ontrac => "OnTrac",
            Carrier::Lasership => "LaserShip",
            Carrier::Unknown => "Unknown",
        }
    }

    pub fn all() -> Vec<Carrier> {
        vec![
            Carrier::Usps,
            Carrier::Ups,
            Carrier::Fedex,
            Carrier::Dhl,
            Carrier::Amazon,
            Carrier::Ontrac,
            Carrier::Lasership,
        ]
    }

    /// Public tracking page, for the carriers that have a stable URL scheme
    pub fn tracking_url(&self, tracking_number: &str) -> Option<String> {
        let template = match self {
            Carrier::Usps => "https://tools.usps.com/go/TrackConfirmAction?tLabels=",
            Carrier::Ups => "https://www.ups.com/track?tracknum=",
            Carrier::Fedex => "https://www.fedex.com/apps/fedextrack/?tracknumbers=",
            _ => return None,
        };
        Some(format!("{}{}", template, tracking_number))
    }

    /// Lenient mapping for strings coming off the wire
    pub fn from_wire(value: &str) -> Self {
        value.parse().unwrap_or(Carrier::Unknown)
    }
}

impl std::fmt::Display for Carrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Carrier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "usps" => Ok(Carrier::Usps),
            "ups" => Ok(Carrier::Ups),
            "fedex" => Ok(Carrier::Fedex),
            "dhl" => Ok(Carrier::Dhl),
            "amazon" => Ok(Carrier::Amazon),
            "ontrac" => Ok(Carrier::Ontrac),
            "lasership" => Ok(Carrier::Lasership),
            "unknown" => Ok(Carrier::Unknown),
            other => Err(Error::Validation(format!("unknown carrier: {}", other))),
        }
    }
}

/// Normalized shipment status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    PreTransit,
    InTransit,
    OutForDelivery,
    Delivered,
    Exception,
    Returned,
    Unknown,
}

impl PackageStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PackageStatus::PreTransit => "Pre-Transit",
            PackageStatus::InTransit => "In Transit",
            PackageStatus::OutForDelivery => "Out for Delivery",
            PackageStatus::Delivered => "Delivered",
            PackageStatus::Exception => "Exception",
            PackageStatus::Returned => "Returned",
            PackageStatus::Unknown => "Unknown",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, PackageStatus::Delivered)
    }

    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "pre_transit" => PackageStatus::PreTransit,
            "in_transit" => PackageStatus::InTransit,
            "out_for_delivery" => PackageStatus::OutForDelivery,
            "delivered" => PackageStatus::Delivered,
            "exception" => PackageStatus::Exception,
            "returned" => PackageStatus::Returned,
            _ => PackageStatus::Unknown,
        }
    }
}

impl std::fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

pub const TRACKING_NUMBER_MIN_LEN: usize = 5;
pub const TRACKING_NUMBER_MAX_LEN: usize = 50;
pub const NICKNAME_MAX_LEN: usize = 100;

/// What the user typed into the add form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewPackage {
    pub tracking_number: String,
    /// `None` lets the tracking service detect the carrier
    pub carrier: Option<Carrier>,
    pub nickname: Option<String>,
}

impl NewPackage {
    pub fn new(tracking_number: impl Into<String>) -> Self {
        Self {
            tracking_number: tracking_number.into(),
            ..Self::default()
        }
    }

    pub fn with_carrier(mut self, carrier: Carrier) -> Self {
        self.carrier = Some(carrier);
        self
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    /// Trim input and enforce the length limits. Blank nicknames become `None`.
    pub fn validated(self) -> crate::Result<Self> {
        let tracking_number = self.tracking_number.trim().to_string();
        let len = tracking_number.chars().count();
        if !(TRACKING_NUMBER_MIN_LEN..=TRACKING_NUMBER_MAX_LEN).contains(&len) {
            return Err(Error::Validation(format!(
                "tracking number must be {}-{} characters, got {}",
                TRACKING_NUMBER_MIN_LEN, TRACKING_NUMBER_MAX_LEN, len
            )));
        }

        let nickname = self
            .nickname
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if let Some(n) = &nickname {
            if n.chars().count() > NICKNAME_MAX_LEN {
                return Err(Error::Validation(format!(
                    "nickname must be at most {} characters",
                    NICKNAME_MAX_LEN
                )));
            }
        }

        // Unknown is the same as not choosing
        let carrier = self.carrier.filter(|c| *c != Carrier::Unknown);

        Ok(Self {
            tracking_number,
            carrier,
            nickname,
        })
    }
}

/// Shallow partial update for a stored package.
///
/// `None` leaves a field alone. For optional fields, `Some(None)` clears it.
/// `id`, `created_at` and `archived` are not patchable: identity never changes
/// and the partition flag moves only through archive/unarchive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackagePatch {
    pub tracking_number: Option<String>,
    pub carrier: Option<Carrier>,
    pub carrier_detected: Option<bool>,
    pub nickname: Option<Option<String>>,
    pub status: Option<PackageStatus>,
    pub estimated_delivery: Option<Option<DateTime<Utc>>>,
    pub events: Option<Vec<TrackingEvent>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub delivered_at: Option<Option<DateTime<Utc>>>,
    pub source: Option<Option<String>>,
}

impl PackagePatch {
    /// User edit of the nickname; `None` removes it
    pub fn nickname(nickname: Option<String>) -> Self {
        Self {
            nickname: Some(nickname),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(self, package: &mut Package) {
        if let Some(v) = self.tracking_number {
            package.tracking_number = v;
        }
        if let Some(v) = self.carrier {
            package.carrier = v;
        }
        if let Some(v) = self.carrier_detected {
            package.carrier_detected = v;
        }
        if let Some(v) = self.nickname {
            package.nickname = v;
        }
        if let Some(v) = self.status {
            package.status = v;
        }
        if let Some(v) = self.estimated_delivery {
            package.estimated_delivery = v;
        }
        if let Some(v) = self.events {
            package.events = v;
            package.normalize_events();
        }
        if let Some(v) = self.last_updated {
            package.last_updated = v;
        }
        if let Some(v) = self.delivered_at {
            package.delivered_at = v;
        }
        if let Some(v) = self.source {
            package.source = v;
        }
    }
}
