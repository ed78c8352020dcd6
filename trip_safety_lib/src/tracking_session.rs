use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "sqlx")]
use sqlx::{prelude::*, sqlite::SqliteRow};

use crate::{
    emergency_alert::{AlertKind, EmergencyAlert},
    error::TrackingError,
    location_point::LocationPoint,
    participant::{ParticipantStatus, ParticipantTracking},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    Active,
    Completed,
    Emergency,
    Paused,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Emergency => "emergency",
            SessionStatus::Paused => "paused",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_started" => Some(SessionStatus::NotStarted),
            "active" => Some(SessionStatus::Active),
            "completed" => Some(SessionStatus::Completed),
            "emergency" => Some(SessionStatus::Emergency),
            "paused" => Some(SessionStatus::Paused),
            _ => None,
        }
    }
}

/// The server-side record of one trip's live safety tracking. One session
/// per trip, created at initialization and destroyed only with the trip.
///
/// All mutation goes through the transition methods below; the store
/// persists whole sessions guarded by the `version` counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSession {
    pub trip_id: i64,
    pub organizer_id: String,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status_before_emergency: Option<SessionStatus>,
    pub participants: BTreeMap<String, ParticipantTracking>,
    pub emergency_alerts: Vec<EmergencyAlert>,
    pub next_alert_id: i64,
    pub version: i64,
}

impl TrackingSession {
    pub fn initialize(
        trip_id: i64,
        organizer_id: String,
        roster: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let participants = roster
            .into_iter()
            .map(|(user_id, user_name)| (user_id.clone(), ParticipantTracking::joined(user_id, user_name)))
            .collect();

        Self {
            trip_id,
            organizer_id,
            status: SessionStatus::NotStarted,
            started_at: None,
            completed_at: None,
            status_before_emergency: None,
            participants,
            emergency_alerts: Vec::new(),
            next_alert_id: 1,
            version: 0,
        }
    }

    pub fn participant(&self, user_id: &str) -> Result<&ParticipantTracking, TrackingError> {
        self.participants
            .get(user_id)
            .ok_or_else(|| TrackingError::NotFound(format!("participant {} in trip {}", user_id, self.trip_id)))
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Result<&mut ParticipantTracking, TrackingError> {
        let trip_id = self.trip_id;
        self.participants
            .get_mut(user_id)
            .ok_or_else(|| TrackingError::NotFound(format!("participant {} in trip {}", user_id, trip_id)))
    }

    /// `start`: the one transition out of `not_started`.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<(), TrackingError> {
        match self.status {
            SessionStatus::NotStarted => {
                self.status = SessionStatus::Active;
                self.started_at = Some(now);
                Ok(())
            }
            other => Err(TrackingError::InvalidTransition(format!(
                "cannot start trip {} from {}",
                self.trip_id,
                other.as_str()
            ))),
        }
    }

    /// Manual organizer pause. Pausing an already paused session is a no-op.
    pub fn pause(&mut self) -> Result<(), TrackingError> {
        match self.status {
            SessionStatus::Active => {
                self.status = SessionStatus::Paused;
                Ok(())
            }
            SessionStatus::Paused => Ok(()),
            other => Err(TrackingError::InvalidTransition(format!(
                "cannot pause trip {} from {}",
                self.trip_id,
                other.as_str()
            ))),
        }
    }

    pub fn resume(&mut self) -> Result<(), TrackingError> {
        match self.status {
            SessionStatus::Paused => {
                self.status = SessionStatus::Active;
                Ok(())
            }
            SessionStatus::Active => Ok(()),
            other => Err(TrackingError::InvalidTransition(format!(
                "cannot resume trip {} from {}",
                self.trip_id,
                other.as_str()
            ))),
        }
    }

    /// Accepts a fix for a participant. Session-level preconditions live
    /// here; point-level ones in `ParticipantTracking::record_location`.
    pub fn record_location(
        &mut self,
        user_id: &str,
        point: LocationPoint,
        now: DateTime<Utc>,
    ) -> Result<(), TrackingError> {
        match self.status {
            SessionStatus::NotStarted => {
                return Err(TrackingError::InvalidTransition(format!(
                    "trip {} has not started tracking",
                    self.trip_id
                )));
            }
            SessionStatus::Completed => {
                return Err(TrackingError::InvalidTransition(format!(
                    "trip {} tracking is completed",
                    self.trip_id
                )));
            }
            // Fixes keep flowing while paused or in emergency.
            SessionStatus::Active | SessionStatus::Paused | SessionStatus::Emergency => {}
        }

        self.participant_mut(user_id)?.record_location(point, now)
    }

    /// Marks one participant completed and completes the session if that
    /// was the last one still out.
    pub fn complete_participant(
        &mut self,
        user_id: &str,
        end_location: Option<LocationPoint>,
        now: DateTime<Utc>,
    ) -> Result<(), TrackingError> {
        if self.status == SessionStatus::Completed {
            return Ok(());
        }

        self.participant_mut(user_id)?.complete(end_location)?;
        self.recompute_completion(now);
        Ok(())
    }

    /// Session completes exactly when every participant has completed.
    /// Returns true when this call performed the transition.
    pub fn recompute_completion(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == SessionStatus::Completed || self.participants.is_empty() {
            return false;
        }
        if !self.participants.values().all(|p| p.status == ParticipantStatus::Completed) {
            return false;
        }

        self.status = SessionStatus::Completed;
        self.status_before_emergency = None;
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        true
    }

    /// Raises (or refreshes) an emergency for a participant. Returns the
    /// alert id and whether a new record was created; at most one
    /// unresolved alert exists per participant at any time.
    pub fn raise_alert(
        &mut self,
        kind: AlertKind,
        raised_by: &str,
        location: Option<LocationPoint>,
        now: DateTime<Utc>,
    ) -> Result<(i64, bool), TrackingError> {
        if self.status == SessionStatus::Completed {
            return Err(TrackingError::InvalidTransition(format!(
                "trip {} tracking is completed",
                self.trip_id
            )));
        }
        if self.participant(raised_by)?.status == ParticipantStatus::Completed {
            return Err(TrackingError::InvalidTransition(format!(
                "participant {} already completed the trip",
                raised_by
            )));
        }

        if let Some(alert) = self
            .emergency_alerts
            .iter_mut()
            .find(|alert| !alert.resolved && alert.raised_by == raised_by)
        {
            alert.refresh(location, now);
            return Ok((alert.alert_id, false));
        }

        let alert_id = self.next_alert_id;
        self.next_alert_id += 1;
        self.emergency_alerts
            .push(EmergencyAlert::new(alert_id, kind, raised_by.to_owned(), location, now));

        self.participant_mut(raised_by)?.enter_emergency();
        self.enter_emergency();

        Ok((alert_id, true))
    }

    pub fn alert(&self, alert_id: i64) -> Result<&EmergencyAlert, TrackingError> {
        self.emergency_alerts
            .iter()
            .find(|alert| alert.alert_id == alert_id)
            .ok_or_else(|| TrackingError::NotFound(format!("alert {} in trip {}", alert_id, self.trip_id)))
    }

    /// Resolves one alert. Returns true when the alert was still open.
    /// The participant leaves emergency once their unresolved set empties;
    /// the session leaves emergency once no unresolved alerts remain at all.
    pub fn resolve_alert(&mut self, alert_id: i64, now: DateTime<Utc>) -> Result<bool, TrackingError> {
        let trip_id = self.trip_id;
        let alert = self
            .emergency_alerts
            .iter_mut()
            .find(|alert| alert.alert_id == alert_id)
            .ok_or_else(|| TrackingError::NotFound(format!("alert {} in trip {}", alert_id, trip_id)))?;

        if alert.resolved {
            return Ok(false);
        }
        alert.resolve(now);
        let raised_by = alert.raised_by.clone();

        if self.unresolved_alert_for(&raised_by).is_none() {
            if let Some(participant) = self.participants.get_mut(&raised_by) {
                participant.leave_emergency();
            }
        }
        if !self.has_unresolved_alerts() {
            self.leave_emergency();
        }

        Ok(true)
    }

    pub fn unresolved_alert_for(&self, user_id: &str) -> Option<&EmergencyAlert> {
        self.emergency_alerts
            .iter()
            .find(|alert| !alert.resolved && alert.raised_by == user_id)
    }

    pub fn has_unresolved_alerts(&self) -> bool {
        self.emergency_alerts.iter().any(|alert| !alert.resolved)
    }

    fn enter_emergency(&mut self) {
        if matches!(self.status, SessionStatus::Emergency | SessionStatus::Completed) {
            return;
        }
        self.status_before_emergency = Some(self.status);
        self.status = SessionStatus::Emergency;
    }

    fn leave_emergency(&mut self) {
        if self.status != SessionStatus::Emergency {
            return;
        }
        self.status = self.status_before_emergency.take().unwrap_or(SessionStatus::Active);
    }

    pub fn participants_blob(&self) -> Vec<u8> {
        bincode::serialize(&self.participants).unwrap()
    }

    pub fn alerts_blob(&self) -> Vec<u8> {
        bincode::serialize(&self.emergency_alerts).unwrap()
    }
}

#[cfg(feature = "sqlx")]
impl FromRow<'_, SqliteRow> for TrackingSession {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("status")?;
        let status = SessionStatus::parse(&status)
            .ok_or_else(|| sqlx::Error::Decode(format!("unknown session status {status}").into()))?;

        let status_before_emergency: Option<String> = row.try_get("status_before_emergency")?;
        let status_before_emergency = match status_before_emergency {
            Some(value) => Some(
                SessionStatus::parse(&value)
                    .ok_or_else(|| sqlx::Error::Decode(format!("unknown session status {value}").into()))?,
            ),
            None => None,
        };

        let participants: Vec<u8> = row.try_get("participants")?;
        let participants = bincode::deserialize(&participants)
            .map_err(|err| sqlx::Error::Decode(format!("participants blob: {err}").into()))?;

        let alerts: Vec<u8> = row.try_get("emergency_alerts")?;
        let emergency_alerts = bincode::deserialize(&alerts)
            .map_err(|err| sqlx::Error::Decode(format!("emergency_alerts blob: {err}").into()))?;

        Ok(Self {
            trip_id: row.try_get("trip_id")?,
            organizer_id: row.try_get("organizer_id")?,
            status,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            status_before_emergency,
            participants,
            emergency_alerts,
            next_alert_id: row.try_get("next_alert_id")?,
            version: row.try_get("version")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(participants: &[&str]) -> TrackingSession {
        TrackingSession::initialize(
            7,
            "org".to_string(),
            participants.iter().map(|id| (id.to_string(), format!("name-{id}"))),
        )
    }

    fn started_session(participants: &[&str]) -> TrackingSession {
        let mut session = session_with(participants);
        session.begin(Utc::now()).unwrap();
        session
    }

    #[test]
    fn initialize_seeds_joined_roster() {
        let session = session_with(&["p1", "p2"]);

        assert_eq!(session.status, SessionStatus::NotStarted);
        assert_eq!(session.participants.len(), 2);
        assert!(session
            .participants
            .values()
            .all(|p| p.status == ParticipantStatus::Joined));
    }

    #[test]
    fn begin_sets_started_at_once_and_rejects_repeats() {
        let mut session = session_with(&["p1"]);

        session.begin(Utc::now()).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        let started_at = session.started_at;
        assert!(started_at.is_some());

        let err = session.begin(Utc::now()).unwrap_err();
        assert!(matches!(err, TrackingError::InvalidTransition(_)));
        assert_eq!(session.started_at, started_at);
    }

    #[test]
    fn pause_resume_cycle() {
        let mut session = started_session(&["p1"]);

        session.pause().unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
        session.pause().unwrap();
        assert_eq!(session.status, SessionStatus::Paused);

        session.resume().unwrap();
        assert_eq!(session.status, SessionStatus::Active);

        let mut fresh = session_with(&["p1"]);
        assert!(matches!(fresh.pause(), Err(TrackingError::InvalidTransition(_))));
    }

    #[test]
    fn location_rejected_before_start_and_after_completion() {
        let mut session = session_with(&["p1"]);
        let point = LocationPoint::new(0.0, 0.0, Utc::now());

        assert!(matches!(
            session.record_location("p1", point, Utc::now()),
            Err(TrackingError::InvalidTransition(_))
        ));

        session.begin(Utc::now()).unwrap();
        session.complete_participant("p1", None, Utc::now()).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        assert!(matches!(
            session.record_location("p1", point, Utc::now()),
            Err(TrackingError::InvalidTransition(_))
        ));
    }

    #[test]
    fn session_completes_only_when_every_participant_has() {
        let mut session = started_session(&["p1", "p2"]);

        session.complete_participant("p1", None, Utc::now()).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.completed_at.is_none());

        session.complete_participant("p2", None, Utc::now()).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        let completed_at = session.completed_at;
        assert!(completed_at.is_some());

        // Idempotent on repeat.
        session.complete_participant("p2", None, Utc::now()).unwrap();
        assert_eq!(session.completed_at, completed_at);
    }

    #[test]
    fn repeat_sos_refreshes_single_unresolved_alert() {
        let mut session = started_session(&["p1", "p2"]);
        let now = Utc::now();

        let (first_id, created) = session
            .raise_alert(AlertKind::ManualSos, "p1", Some(LocationPoint::new(10.0, 20.0, now)), now)
            .unwrap();
        assert!(created);
        assert_eq!(session.status, SessionStatus::Emergency);

        let later = Utc::now();
        let (second_id, created) = session
            .raise_alert(AlertKind::ManualSos, "p1", None, later)
            .unwrap();
        assert!(!created);
        assert_eq!(second_id, first_id);

        let open: Vec<_> = session
            .emergency_alerts
            .iter()
            .filter(|a| !a.resolved && a.raised_by == "p1")
            .collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].timestamp, later);
        assert_eq!(open[0].location.unwrap().latitude(), 10.0);
    }

    #[test]
    fn session_leaves_emergency_when_last_alert_resolves() {
        let mut session = started_session(&["p1", "p2"]);
        let now = Utc::now();

        let (a1, _) = session.raise_alert(AlertKind::ManualSos, "p1", None, now).unwrap();
        let (a2, _) = session.raise_alert(AlertKind::StalenessTimeout, "p2", None, now).unwrap();
        assert_eq!(session.status, SessionStatus::Emergency);

        assert!(session.resolve_alert(a2, Utc::now()).unwrap());
        assert_eq!(session.status, SessionStatus::Emergency, "p1 still has an open alert");
        assert_eq!(session.participants["p2"].status, ParticipantStatus::Joined);

        assert!(session.resolve_alert(a1, Utc::now()).unwrap());
        assert_eq!(session.status, SessionStatus::Active);
        // Resolution is idempotent.
        assert!(!session.resolve_alert(a1, Utc::now()).unwrap());
    }

    #[test]
    fn emergency_restores_pre_emergency_session_status() {
        let mut session = session_with(&["p1"]);
        let now = Utc::now();

        let (alert_id, _) = session.raise_alert(AlertKind::ManualSos, "p1", None, now).unwrap();
        assert_eq!(session.status, SessionStatus::Emergency);

        session.resolve_alert(alert_id, Utc::now()).unwrap();
        assert_eq!(session.status, SessionStatus::NotStarted);
    }

    #[test]
    fn sos_rejected_for_completed_participant_and_session() {
        let mut session = started_session(&["p1", "p2"]);
        session.complete_participant("p1", None, Utc::now()).unwrap();

        assert!(matches!(
            session.raise_alert(AlertKind::ManualSos, "p1", None, Utc::now()),
            Err(TrackingError::InvalidTransition(_))
        ));

        session.complete_participant("p2", None, Utc::now()).unwrap();
        assert!(matches!(
            session.raise_alert(AlertKind::ManualSos, "p2", None, Utc::now()),
            Err(TrackingError::InvalidTransition(_))
        ));
    }

    #[test]
    fn alert_ids_stay_unique_across_resolved_incidents() {
        let mut session = started_session(&["p1"]);

        let (first, _) = session.raise_alert(AlertKind::ManualSos, "p1", None, Utc::now()).unwrap();
        session.resolve_alert(first, Utc::now()).unwrap();
        let (second, created) = session.raise_alert(AlertKind::ManualSos, "p1", None, Utc::now()).unwrap();

        assert!(created, "a resolved incident does not suppress a new one");
        assert_ne!(first, second);
        assert_eq!(session.emergency_alerts.len(), 2);
    }
}
