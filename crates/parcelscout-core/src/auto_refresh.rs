use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::tracker::Tracker;

/// Default period between automatic bulk refreshes
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Periodic `refresh_all` for as long as the handle lives
pub struct AutoRefresh;

impl AutoRefresh {
    /// Start refreshing every `period`, first firing one period from now.
    ///
    /// A slow run delays the next tick instead of overlapping with it.
    pub fn spawn(tracker: Arc<Tracker>, period: Duration) -> AutoRefreshHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Auto-refresh every {}s", period.as_secs());

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        debug!("Auto-refresh tick");
                        tokio::select! {
                            _ = tracker.refresh_all() => {}
                            _ = shutdown_rx.changed() => break,
                        }
                    }
                }
            }

            info!("Auto-refresh stopped");
        });

        AutoRefreshHandle {
            shutdown_tx,
            task: Some(task),
        }
    }
}

/// Owns the timer task. Dropping it stops the timer too, `shutdown` also
/// waits for the task to finish.
pub struct AutoRefreshHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl AutoRefreshHandle {
    pub async fn shutdown(mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Auto-refresh task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for AutoRefreshHandle {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Carrier, PackageStatus};
    use crate::service::{MockTrackingService, TrackedSnapshot};
    use crate::store::PackageStore;
    use crate::test_support::package;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_tracker(calls: Arc<AtomicUsize>) -> Arc<Tracker> {
        let mut service = MockTrackingService::new();
        service.expect_track().returning(move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(TrackedSnapshot {
                package: package("p1", PackageStatus::InTransit),
                cached: true,
            })
        });
        service.expect_detect().returning(|_| Ok(Carrier::Unknown));

        let mut store = PackageStore::new();
        store.add(package("p1", PackageStatus::InTransit));
        Arc::new(Tracker::new(store.into_shared(), Arc::new(service)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_per_period() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = AutoRefresh::spawn(counting_tracker(Arc::clone(&calls)), DEFAULT_REFRESH_INTERVAL);

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_timer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = AutoRefresh::spawn(counting_tracker(Arc::clone(&calls)), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.shutdown().await;
        let after_shutdown = calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_timer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tracker = counting_tracker(Arc::clone(&calls));
        let handle = AutoRefresh::spawn(Arc::clone(&tracker), Duration::from_secs(60));
        drop(handle);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!tracker.store().lock().is_loading());
    }
}
