use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{Carrier, Package, PackageStatus};

/// Summary counts over the active partition.
///
/// Two different "active" ideas meet here. `total` is the size of the active
/// partition (archived packages never count). The `active` field is a status
/// predicate: packages in that partition whose status is anything but
/// delivered. Exceptions and returns therefore still count as active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStats {
    pub total: usize,
    pub active: usize,
    pub delivered: usize,
    pub in_transit: usize,
    pub exception: usize,
    pub carrier_breakdown: BTreeMap<Carrier, usize>,
}

impl PackageStats {
    /// Recomputed from scratch on every call, nothing is cached
    pub fn from_packages(packages: &[Package]) -> Self {
        let mut stats = PackageStats {
            total: packages.len(),
            ..Self::default()
        };

        for package in packages {
            match package.status {
                PackageStatus::Delivered => stats.delivered += 1,
                PackageStatus::InTransit => stats.in_transit += 1,
                PackageStatus::Exception => stats.exception += 1,
                _ => {}
            }
            *stats.carrier_breakdown.entry(package.carrier).or_insert(0) += 1;
        }
        stats.active = stats.total - stats.delivered;

        stats
    }
}
