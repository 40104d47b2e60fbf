// Add, refresh and bulk-refresh packages against the tracking service
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::{Carrier, NewPackage, Package};
use crate::reconcile::remote_patch;
use crate::service::TrackingService;
use crate::store::SharedStore;
use crate::Result;

/// What a single refresh did. Diagnostic only: a refresh never fails loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Remote snapshot merged into the local record
    Updated,
    /// The service call failed; the local record is untouched
    Failed,
    /// Nothing active to refresh (never tracked, removed or archived)
    NotFound,
}

type InFlight = Mutex<HashMap<String, watch::Receiver<Option<RefreshOutcome>>>>;

/// Coordinates all traffic between the store and the tracking service.
///
/// Refreshes are coalesced per package id: while one is in flight, further
/// refreshes of the same package wait for its outcome instead of racing it
/// with a second request.
pub struct Tracker {
    store: SharedStore,
    service: Arc<dyn TrackingService>,
    in_flight: InFlight,
}

impl Tracker {
    pub fn new(store: SharedStore, service: Arc<dyn TrackingService>) -> Self {
        Self {
            store,
            service,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Fetch a new package and start tracking it.
    ///
    /// Unlike refreshes, failures here are surfaced: they are returned and
    /// recorded as the store's error, and no package is created.
    pub async fn add_package(&self, request: NewPackage) -> Result<Package> {
        let request = match request.validated() {
            Ok(request) => request,
            Err(e) => {
                self.store.lock().set_error(e.to_string());
                return Err(e);
            }
        };

        self.store.lock().clear_error();
        let _loading = LoadingGuard::enter(&self.store);

        info!("Tracking new package {}", request.tracking_number);
        match self
            .service
            .track(&request.tracking_number, request.carrier)
            .await
        {
            Ok(snapshot) => {
                let mut package = snapshot.package;
                package.nickname = request.nickname;
                package.archived = false;
                package.normalize_events();

                self.store.lock().add(package.clone());
                Ok(package)
            }
            Err(e) => {
                warn!("Failed to add {}: {}", request.tracking_number, e);
                self.store.lock().set_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Refresh the active package with this tracking number.
    ///
    /// Failures leave the record as it was and are only logged.
    pub async fn refresh_package(&self, tracking_number: &str) -> RefreshOutcome {
        let target = {
            let store = self.store.lock();
            store
                .find_by_tracking_number(tracking_number)
                .map(|p| (p.id.clone(), p.carrier))
        };

        match target {
            Some((id, carrier)) => self.refresh_entry(&id, tracking_number, carrier).await,
            None => {
                debug!("No active package with tracking number {}", tracking_number);
                RefreshOutcome::NotFound
            }
        }
    }

    /// Refresh every active package concurrently and wait for all of them.
    ///
    /// The store reports loading for the whole run. Individual outcomes are
    /// only logged.
    pub async fn refresh_all(&self) {
        let _loading = LoadingGuard::enter(&self.store);

        let targets: Vec<(String, String, Carrier)> = {
            let store = self.store.lock();
            store
                .active()
                .iter()
                .map(|p| (p.id.clone(), p.tracking_number.clone(), p.carrier))
                .collect()
        };

        if targets.is_empty() {
            debug!("Nothing to refresh");
            return;
        }

        info!("Refreshing {} packages", targets.len());
        let refreshes = targets
            .iter()
            .map(|(id, tracking_number, carrier)| self.refresh_entry(id, tracking_number, *carrier));
        let outcomes = join_all(refreshes).await;

        let updated = outcomes
            .iter()
            .filter(|o| **o == RefreshOutcome::Updated)
            .count();
        let failed = outcomes
            .iter()
            .filter(|o| **o == RefreshOutcome::Failed)
            .count();
        info!(
            "Refresh finished: {} updated, {} failed, {} skipped",
            updated,
            failed,
            outcomes.len() - updated - failed
        );
    }

    /// Ask the service which carrier a tracking number belongs to
    pub async fn detect_carrier(&self, tracking_number: &str) -> Result<Carrier> {
        self.service.detect(tracking_number.trim()).await
    }

    async fn refresh_entry(&self, id: &str, tracking_number: &str, carrier: Carrier) -> RefreshOutcome {
        let slot = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(id) {
                Some(rx) => Slot::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(id.to_string(), rx);
                    Slot::Leader(tx)
                }
            }
        };

        match slot {
            Slot::Follower(rx) => {
                debug!("Refresh of {} already in flight, waiting for it", id);
                wait_for_outcome(rx).await
            }
            Slot::Leader(tx) => {
                let _marker = InFlightMarker {
                    in_flight: &self.in_flight,
                    id,
                };
                let outcome = self.fetch_and_merge(id, tracking_number, carrier).await;
                tx.send_replace(Some(outcome));
                outcome
            }
        }
    }

    async fn fetch_and_merge(&self, id: &str, tracking_number: &str, carrier: Carrier) -> RefreshOutcome {
        // An unknown carrier lets the service detect it
        let carrier = (carrier != Carrier::Unknown).then_some(carrier);

        match self.service.track(tracking_number, carrier).await {
            Ok(snapshot) => {
                let mut store = self.store.lock();
                // Archived or removed while the request was out
                if !store.active().iter().any(|p| p.id == id) {
                    debug!("{} left the active list during refresh, dropping snapshot", id);
                    return RefreshOutcome::NotFound;
                }

                store.update(id, remote_patch(snapshot.package));
                debug!("Refreshed {} (cached: {})", tracking_number, snapshot.cached);
                RefreshOutcome::Updated
            }
            Err(e) => {
                warn!("Failed to refresh {}: {}", tracking_number, e);
                RefreshOutcome::Failed
            }
        }
    }
}

enum Slot {
    Leader(watch::Sender<Option<RefreshOutcome>>),
    Follower(watch::Receiver<Option<RefreshOutcome>>),
}

async fn wait_for_outcome(mut rx: watch::Receiver<Option<RefreshOutcome>>) -> RefreshOutcome {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => {
            let outcome = *outcome;
            outcome.unwrap_or(RefreshOutcome::Failed)
        }
        // Leader was dropped before it finished
        Err(_) => RefreshOutcome::Failed,
    }
}

/// Clears the in-flight entry even when the leading refresh is cancelled
struct InFlightMarker<'a> {
    in_flight: &'a InFlight,
    id: &'a str,
}

impl Drop for InFlightMarker<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.id);
    }
}

/// Holds one loading section open on the store until dropped
struct LoadingGuard<'a> {
    store: &'a SharedStore,
}

impl<'a> LoadingGuard<'a> {
    fn enter(store: &'a SharedStore) -> Self {
        store.lock().begin_loading();
        Self { store }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.store.lock().end_loading();
    }
}
