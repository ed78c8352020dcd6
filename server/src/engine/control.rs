use trip_safety_lib::{error::TrackingError, tracking_session::TrackingSession};

use crate::{
    broadcast::SessionEvent,
    engine::{TrackingEngine, require_organizer},
    notify::Notifier,
    roster::RosterProvider,
};

/// Organizer controls over the session lifecycle.
impl<R: RosterProvider, N: Notifier> TrackingEngine<R, N> {
    /// Creates the tracking session for a trip, seeding the participant
    /// map from the booking service's roster. One session per trip, ever.
    pub async fn initialize(&self, trip_id: i64, caller: &str) -> Result<TrackingSession, TrackingError> {
        let roster = self.roster.fetch_roster(trip_id).await?;
        if roster.organizer_id != caller {
            return Err(TrackingError::Forbidden(format!(
                "only the organizer may initialize tracking for trip {trip_id}"
            )));
        }

        let session = TrackingSession::initialize(
            trip_id,
            roster.organizer_id,
            roster.members.into_iter().map(|member| (member.user_id, member.user_name)),
        );
        self.store.create_session(&session).await?;

        tracing::info!(
            "Initialized tracking for trip {} with {} participants",
            trip_id,
            session.participants.len()
        );
        let _ = self.events.send(SessionEvent::SessionInitialized {
            trip_id,
            status: session.status,
        });

        Ok(session)
    }

    pub async fn start(&self, trip_id: i64, caller: &str) -> Result<TrackingSession, TrackingError> {
        let (session, _) = self
            .mutate(trip_id, |session, now| {
                require_organizer(session, caller)?;
                session.begin(now)?;
                Ok(((), vec![SessionEvent::SessionStatusChanged {
                    trip_id,
                    status: session.status,
                }]))
            })
            .await?;

        tracing::info!("Trip {} is now live", trip_id);
        Ok(session)
    }

    pub async fn pause(&self, trip_id: i64, caller: &str) -> Result<TrackingSession, TrackingError> {
        let (session, _) = self
            .mutate(trip_id, |session, _now| {
                require_organizer(session, caller)?;
                let before = session.status;
                session.pause()?;
                let events = if session.status != before {
                    vec![SessionEvent::SessionStatusChanged { trip_id, status: session.status }]
                } else {
                    Vec::new()
                };
                Ok(((), events))
            })
            .await?;
        Ok(session)
    }

    pub async fn resume(&self, trip_id: i64, caller: &str) -> Result<TrackingSession, TrackingError> {
        let (session, _) = self
            .mutate(trip_id, |session, _now| {
                require_organizer(session, caller)?;
                let before = session.status;
                session.resume()?;
                let events = if session.status != before {
                    vec![SessionEvent::SessionStatusChanged { trip_id, status: session.status }]
                } else {
                    Vec::new()
                };
                Ok(((), events))
            })
            .await?;
        Ok(session)
    }
}
