use trip_safety_lib::{
    error::TrackingError, location_point::LocationPoint, tracking_session::TrackingSession,
};

use crate::{
    broadcast::SessionEvent,
    engine::{TrackingEngine, require_organizer},
    notify::Notifier,
    roster::RosterProvider,
};

/// Location ingestion: the high-volume path. Each call is one independent
/// fix from one device; bad points are dropped locally and never fail the
/// session.
impl<R: RosterProvider, N: Notifier> TrackingEngine<R, N> {
    pub async fn submit_location(
        &self,
        trip_id: i64,
        caller: &str,
        point: LocationPoint,
    ) -> Result<TrackingSession, TrackingError> {
        point.validate()?;

        let (session, _) = self
            .mutate(trip_id, |session, now| {
                session.record_location(caller, point, now)?;
                let participant = session.participant(caller)?.clone();
                Ok(((), vec![SessionEvent::ParticipantUpdated { trip_id, participant }]))
            })
            .await?;

        Ok(session)
    }

    /// Marks a participant done with the trip, optionally stamping a final
    /// fix as their end location. Organizers may complete on a member's
    /// behalf; completing the last participant completes the session.
    pub async fn complete(
        &self,
        trip_id: i64,
        caller: &str,
        target: Option<&str>,
        end_location: Option<LocationPoint>,
    ) -> Result<TrackingSession, TrackingError> {
        if let Some(point) = &end_location {
            point.validate()?;
        }
        let target = target.unwrap_or(caller).to_owned();

        let (session, completed_now) = self
            .mutate(trip_id, |session, now| {
                if target != caller {
                    require_organizer(session, caller)?;
                }

                let before = session.status;
                session.complete_participant(&target, end_location, now)?;

                let mut events = vec![SessionEvent::ParticipantUpdated {
                    trip_id,
                    participant: session.participant(&target)?.clone(),
                }];
                let completed_now = session.status != before;
                if completed_now {
                    events.push(SessionEvent::SessionStatusChanged {
                        trip_id,
                        status: session.status,
                    });
                }
                Ok((completed_now, events))
            })
            .await?;

        if completed_now {
            tracing::info!("Trip {} tracking completed", trip_id);
        }
        Ok(session)
    }
}
