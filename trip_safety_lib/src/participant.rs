use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::TrackingError, location_point::LocationPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Joined,
    Started,
    Active,
    Completed,
    Emergency,
}

/// Per-participant safety-tracking state inside a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantTracking {
    pub user_id: String,
    pub user_name: String,
    pub status: ParticipantStatus,
    pub last_location: Option<LocationPoint>,
    pub start_location: Option<LocationPoint>,
    pub end_location: Option<LocationPoint>,
    pub last_check_in: Option<DateTime<Utc>>,
    pub status_before_emergency: Option<ParticipantStatus>,
    pub emergency_contacts_notified: bool,
}

impl ParticipantTracking {
    /// A fresh roster entry, before the trip has started.
    pub fn joined(user_id: String, user_name: String) -> Self {
        Self {
            user_id,
            user_name,
            status: ParticipantStatus::Joined,
            last_location: None,
            start_location: None,
            end_location: None,
            last_check_in: None,
            status_before_emergency: None,
            emergency_contacts_notified: false,
        }
    }

    /// Applies an accepted fix. Out-of-order points never move state
    /// backward: anything older than the current check-in is rejected.
    /// The first accepted fix takes the participant from joined through
    /// started straight to active.
    pub fn record_location(&mut self, point: LocationPoint, now: DateTime<Utc>) -> Result<(), TrackingError> {
        if self.status == ParticipantStatus::Completed {
            return Err(TrackingError::InvalidTransition(format!(
                "participant {} already completed the trip",
                self.user_id
            )));
        }

        if let Some(last) = self.last_check_in {
            if point.timestamp < last {
                return Err(TrackingError::InvalidLocation(format!(
                    "fix from {} is older than the last check-in at {}",
                    point.timestamp, last
                )));
            }
        }

        if self.start_location.is_none() {
            self.start_location = Some(point);
        }
        self.last_location = Some(point);
        self.last_check_in = Some(now);

        // A fix during an emergency keeps the trail warm but the status is
        // owned by the alert lifecycle until resolution.
        if matches!(self.status, ParticipantStatus::Joined | ParticipantStatus::Started) {
            self.status = ParticipantStatus::Active;
        }

        Ok(())
    }

    /// Explicit completion by the participant or the organizer. Terminal:
    /// repeated completion is a no-op, but an open emergency blocks it.
    pub fn complete(&mut self, end_location: Option<LocationPoint>) -> Result<(), TrackingError> {
        match self.status {
            ParticipantStatus::Completed => return Ok(()),
            ParticipantStatus::Emergency => {
                return Err(TrackingError::InvalidTransition(format!(
                    "participant {} has an open emergency, resolve it before completing",
                    self.user_id
                )));
            }
            _ => {}
        }

        if let Some(point) = end_location {
            self.end_location = Some(point);
            self.last_location = Some(point);
        }
        self.status = ParticipantStatus::Completed;
        self.status_before_emergency = None;

        Ok(())
    }

    pub fn enter_emergency(&mut self) {
        if self.status == ParticipantStatus::Emergency {
            return;
        }
        self.status_before_emergency = Some(self.status);
        self.status = ParticipantStatus::Emergency;
    }

    /// Restores the pre-emergency status, defaulting to active when it
    /// cannot be recovered. Clears the notified flag so a later incident
    /// escalates again.
    pub fn leave_emergency(&mut self) {
        if self.status != ParticipantStatus::Emergency {
            return;
        }
        self.status = self.status_before_emergency.take().unwrap_or(ParticipantStatus::Active);
        self.emergency_contacts_notified = false;
    }

    /// True when the participant should be reporting but has been silent
    /// for longer than `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: TimeDelta) -> bool {
        if !matches!(self.status, ParticipantStatus::Started | ParticipantStatus::Active) {
            return false;
        }
        match self.last_check_in {
            Some(last) => now - last > threshold,
            None => false,
        }
    }
}
