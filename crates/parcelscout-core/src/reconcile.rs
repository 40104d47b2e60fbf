// Merging remote tracking snapshots into local records
//
// The remote side is authoritative for shipping facts, the local side for
// user annotations and identity.
use crate::models::{Package, PackagePatch};

/// Patch carrying every shipping fact from a remote snapshot.
///
/// Leaves out `nickname` and `archived` (user-owned) as well as `id` and
/// `created_at`: the service regenerates `created_at` on every fetch, while a
/// record's creation time is fixed once it is tracked.
pub fn remote_patch(remote: Package) -> PackagePatch {
    PackagePatch {
        tracking_number: Some(remote.tracking_number),
        carrier: Some(remote.carrier),
        carrier_detected: Some(remote.carrier_detected),
        nickname: None,
        status: Some(remote.status),
        estimated_delivery: Some(remote.estimated_delivery),
        events: Some(remote.events),
        last_updated: Some(remote.last_updated),
        delivered_at: Some(remote.delivered_at),
        source: Some(remote.source),
    }
}

/// The record that results from applying `remote` on top of `local`
pub fn merge_snapshot(local: &Package, remote: Package) -> Package {
    let mut merged = local.clone();
    remote_patch(remote).apply(&mut merged);
    merged
}
