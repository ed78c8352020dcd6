use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use trip_safety_data_management::SessionStore;
use trip_safety_lib::{error::TrackingError, tracking_session::TrackingSession};

use crate::{
    broadcast::SessionEvent,
    notify::{Notifier, NotifyJob},
    roster::RosterProvider,
};

pub mod alerts;
pub mod control;
pub mod ingest;
pub mod monitor;

/// Retry budget for optimistic writes before the caller sees `Conflict`.
const COMMIT_ATTEMPTS: usize = 3;

/// The tracking engine: every mutation of a session, no matter which
/// surface it enters through, funnels into [`mutate`] — read, run the
/// state machines, compare-and-swap, publish. Collaborators are trait
/// parameters so tests can swap in stubs.
pub struct TrackingEngine<R, N> {
    store: SessionStore,
    roster: R,
    notifier: Arc<N>,
    events: broadcast::Sender<SessionEvent>,
    retry_queue: mpsc::UnboundedSender<NotifyJob>,
    notify_timeout: Duration,
}

impl<R: RosterProvider, N: Notifier> TrackingEngine<R, N> {
    pub fn new(
        store: SessionStore,
        roster: R,
        notifier: Arc<N>,
        events: broadcast::Sender<SessionEvent>,
        retry_queue: mpsc::UnboundedSender<NotifyJob>,
        notify_timeout: Duration,
    ) -> Self {
        Self {
            store,
            roster,
            notifier,
            events,
            retry_queue,
            notify_timeout,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Pull path: the authoritative session snapshot.
    pub async fn snapshot(&self, trip_id: i64) -> Result<TrackingSession, TrackingError> {
        self.store.get_session(trip_id).await
    }

    pub(crate) async fn mutate<T>(
        &self,
        trip_id: i64,
        op: impl Fn(&mut TrackingSession, DateTime<Utc>) -> Result<(T, Vec<SessionEvent>), TrackingError>,
    ) -> Result<(TrackingSession, T), TrackingError> {
        mutate(&self.store, &self.events, trip_id, op).await
    }
}

/// The single write path: fetch, apply, commit-if-unchanged, publish.
/// Losing the version race re-reads and reapplies, so concurrent writers
/// of one trip serialize without ever holding a lock across I/O.
pub(crate) async fn mutate<T>(
    store: &SessionStore,
    events: &broadcast::Sender<SessionEvent>,
    trip_id: i64,
    op: impl Fn(&mut TrackingSession, DateTime<Utc>) -> Result<(T, Vec<SessionEvent>), TrackingError>,
) -> Result<(TrackingSession, T), TrackingError> {
    for _ in 0..COMMIT_ATTEMPTS {
        let mut session = store.get_session(trip_id).await?;
        let (value, pending_events) = op(&mut session, Utc::now())?;

        if store.commit(&mut session).await? {
            for event in pending_events {
                // Nobody listening is fine; the pull path always works.
                let _ = events.send(event);
            }
            return Ok((session, value));
        }

        tracing::debug!("Lost the version race on trip {}, retrying", trip_id);
    }

    Err(TrackingError::Conflict(trip_id))
}

pub(crate) fn require_organizer(session: &TrackingSession, caller: &str) -> Result<(), TrackingError> {
    if session.organizer_id != caller {
        return Err(TrackingError::Forbidden(format!(
            "only the organizer may do this for trip {}",
            session.trip_id
        )));
    }
    Ok(())
}
