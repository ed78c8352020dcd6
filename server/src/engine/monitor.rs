use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use trip_safety_lib::{error::TrackingError, tracking_session::SessionStatus};

use crate::{engine::TrackingEngine, notify::Notifier, roster::RosterProvider};

/// The trip's dead man's switch: a background sweep that flags
/// participants who have gone silent while their trip is live. This is
/// the only component allowed to raise alerts without a user action.
pub struct StalenessMonitor<R, N> {
    engine: Arc<TrackingEngine<R, N>>,
    interval: Duration,
    threshold: TimeDelta,
    sweep_timeout: Duration,
}

impl<R: RosterProvider, N: Notifier> StalenessMonitor<R, N> {
    pub fn new(
        engine: Arc<TrackingEngine<R, N>>,
        interval: Duration,
        stale_threshold: Duration,
        sweep_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            interval,
            threshold: TimeDelta::from_std(stale_threshold).unwrap_or_else(|_| TimeDelta::minutes(15)),
            sweep_timeout,
        }
    }

    pub async fn run(self) {
        tracing::info!(
            "Staleness monitor running every {:?}, threshold {}s",
            self.interval,
            self.threshold.num_seconds()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// One pass over every live trip. A slow or failing trip is skipped
    /// and logged; it never stalls the others.
    pub async fn sweep(&self) {
        let trip_ids = match self.engine.store().active_trip_ids().await {
            Ok(trip_ids) => trip_ids,
            Err(err) => {
                tracing::error!("Staleness sweep could not list active trips: {}", err);
                return;
            }
        };

        // Trips are independent; a slow one only costs itself its timeout.
        join_all(trip_ids.into_iter().map(|trip_id| async move {
            match tokio::time::timeout(self.sweep_timeout, self.sweep_trip(trip_id)).await {
                Ok(Ok(0)) => {}
                Ok(Ok(raised)) => tracing::info!("Raised {} staleness alerts for trip {}", raised, trip_id),
                Ok(Err(err)) => tracing::warn!("Skipping staleness sweep of trip {}: {}", trip_id, err),
                Err(_) => tracing::warn!("Staleness sweep of trip {} timed out, skipping", trip_id),
            }
        }))
        .await;
    }

    async fn sweep_trip(&self, trip_id: i64) -> Result<usize, TrackingError> {
        let session = self.engine.snapshot(trip_id).await?;
        if session.status != SessionStatus::Active {
            // Status moved between listing and here.
            return Ok(0);
        }

        let now = Utc::now();
        let mut raised = 0;
        for participant in session.participants.values() {
            if participant.is_stale(now, self.threshold) {
                self.engine.raise_staleness(trip_id, &participant.user_id).await?;
                raised += 1;
            }
        }

        Ok(raised)
    }
}
