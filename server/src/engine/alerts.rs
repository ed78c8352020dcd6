use tokio::sync::broadcast;
use trip_safety_data_management::SessionStore;
use trip_safety_lib::{
    emergency_alert::AlertKind,
    error::TrackingError,
    location_point::LocationPoint,
    tracking_session::TrackingSession,
};

use crate::{
    broadcast::SessionEvent,
    engine::{TrackingEngine, mutate, require_organizer},
    notify::{Notifier, NotifyJob, NotifyRequest},
    roster::RosterProvider,
};

/// Emergency escalation and resolution. Raising is idempotent per
/// participant: one unresolved alert, one notification fan-out, no matter
/// how many times the button is pressed.
impl<R: RosterProvider, N: Notifier> TrackingEngine<R, N> {
    pub async fn raise_sos(
        &self,
        trip_id: i64,
        caller: &str,
        location: Option<LocationPoint>,
    ) -> Result<(TrackingSession, i64), TrackingError> {
        if let Some(point) = &location {
            point.validate()?;
        }
        self.raise(trip_id, caller, AlertKind::ManualSos, location).await
    }

    /// The staleness monitor's entry point; carries the participant's last
    /// known position as a best-effort hint.
    pub async fn raise_staleness(&self, trip_id: i64, user_id: &str) -> Result<(TrackingSession, i64), TrackingError> {
        self.raise(trip_id, user_id, AlertKind::StalenessTimeout, None).await
    }

    async fn raise(
        &self,
        trip_id: i64,
        raised_by: &str,
        kind: AlertKind,
        location: Option<LocationPoint>,
    ) -> Result<(TrackingSession, i64), TrackingError> {
        let (session, (alert_id, created)) = self
            .mutate(trip_id, |session, now| {
                let before = session.status;
                let location = match kind {
                    AlertKind::ManualSos => location,
                    AlertKind::StalenessTimeout => location.or(session.participant(raised_by)?.last_location),
                };

                let (alert_id, created) = session.raise_alert(kind, raised_by, location, now)?;
                let alert = session.alert(alert_id)?.clone();

                let mut events = Vec::new();
                if created {
                    events.push(SessionEvent::AlertRaised { trip_id, alert });
                    events.push(SessionEvent::ParticipantUpdated {
                        trip_id,
                        participant: session.participant(raised_by)?.clone(),
                    });
                    if session.status != before {
                        events.push(SessionEvent::SessionStatusChanged {
                            trip_id,
                            status: session.status,
                        });
                    }
                } else {
                    events.push(SessionEvent::AlertUpdated { trip_id, alert });
                }

                Ok(((alert_id, created), events))
            })
            .await?;

        if !created {
            // Existing unresolved incident refreshed; contacts were already
            // escalated for it.
            return Ok((session, alert_id));
        }

        tracing::warn!("Emergency ({:?}) raised by {} on trip {}", kind, raised_by, trip_id);

        match self.dispatch_notification(&session, alert_id).await {
            Ok(()) => {
                let session = self.confirm_notified(trip_id, alert_id).await?;
                Ok((session, alert_id))
            }
            Err(err) => {
                // The alert is already committed; delivery moves to the
                // background queue and the SOS call still succeeds.
                tracing::warn!(
                    "Notification dispatch for alert {} on trip {} failed, queueing retry: {}",
                    alert_id, trip_id, err
                );
                if self.retry_queue.send(NotifyJob { trip_id, alert_id }).is_err() {
                    tracing::error!(
                        "Notification retry queue is gone; alert {} on trip {} stays unnotified",
                        alert_id, trip_id
                    );
                }
                Ok((session, alert_id))
            }
        }
    }

    async fn dispatch_notification(&self, session: &TrackingSession, alert_id: i64) -> Result<(), TrackingError> {
        let alert = session.alert(alert_id)?.clone();
        let request = NotifyRequest {
            trip_id: session.trip_id,
            recipients: vec![session.organizer_id.clone(), alert.raised_by.clone()],
            alert,
        };

        match tokio::time::timeout(self.notify_timeout, self.notifier.notify(&request)).await {
            Ok(result) => result,
            Err(_) => Err(TrackingError::Unavailable("notification service timed out".to_string())),
        }
    }

    async fn confirm_notified(&self, trip_id: i64, alert_id: i64) -> Result<TrackingSession, TrackingError> {
        mark_contacts_notified(&self.store, &self.events, trip_id, alert_id).await
    }

    /// Organizer-only. Resolution order between independent alerts is
    /// irrelevant; the session stays in emergency until none remain open.
    pub async fn resolve_alert(
        &self,
        trip_id: i64,
        caller: &str,
        alert_id: i64,
    ) -> Result<TrackingSession, TrackingError> {
        let (session, was_open) = self
            .mutate(trip_id, |session, now| {
                require_organizer(session, caller)?;

                let before = session.status;
                let was_open = session.resolve_alert(alert_id, now)?;

                let mut events = Vec::new();
                if was_open {
                    events.push(SessionEvent::AlertResolved { trip_id, alert_id });
                    let raised_by = session.alert(alert_id)?.raised_by.clone();
                    if let Ok(participant) = session.participant(&raised_by) {
                        events.push(SessionEvent::ParticipantUpdated {
                            trip_id,
                            participant: participant.clone(),
                        });
                    }
                    if session.status != before {
                        events.push(SessionEvent::SessionStatusChanged {
                            trip_id,
                            status: session.status,
                        });
                    }
                }
                Ok((was_open, events))
            })
            .await?;

        if was_open {
            tracing::info!("Alert {} on trip {} resolved", alert_id, trip_id);
        }
        Ok(session)
    }
}

/// Flips `emergency_contacts_notified` once delivery has actually
/// happened. Shared by the inline dispatch and the retry worker, and
/// goes through the same optimistic write path as everything else.
pub(crate) async fn mark_contacts_notified(
    store: &SessionStore,
    events: &broadcast::Sender<SessionEvent>,
    trip_id: i64,
    alert_id: i64,
) -> Result<TrackingSession, TrackingError> {
    let (session, _) = mutate(store, events, trip_id, |session, _now| {
        let raised_by = session.alert(alert_id)?.raised_by.clone();
        let participant = session.participant_mut(&raised_by)?;
        if participant.emergency_contacts_notified {
            return Ok(((), Vec::new()));
        }
        participant.emergency_contacts_notified = true;
        let updated = participant.clone();
        Ok(((), vec![SessionEvent::ParticipantUpdated { trip_id, participant: updated }]))
    })
    .await?;

    Ok(session)
}
