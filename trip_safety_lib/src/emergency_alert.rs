use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::location_point::LocationPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Raised explicitly by a participant pressing SOS.
    ManualSos,
    /// Raised by the staleness monitor when a participant goes silent.
    StalenessTimeout,
}

/// One emergency incident for one participant. Appended to the session's
/// alert log and never removed; resolution only flips the flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyAlert {
    pub alert_id: i64,
    pub kind: AlertKind,
    pub raised_by: String,
    pub location: Option<LocationPoint>,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl EmergencyAlert {
    pub fn new(
        alert_id: i64,
        kind: AlertKind,
        raised_by: String,
        location: Option<LocationPoint>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            alert_id,
            kind,
            raised_by,
            location,
            timestamp,
            resolved: false,
            resolved_at: None,
        }
    }

    /// A repeat escalation refreshes the open record in place instead of
    /// creating a duplicate.
    pub fn refresh(&mut self, location: Option<LocationPoint>, timestamp: DateTime<Utc>) {
        if location.is_some() {
            self.location = location;
        }
        self.timestamp = timestamp;
    }

    pub fn resolve(&mut self, at: DateTime<Utc>) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        self.resolved_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_keeps_previous_location_when_none_given() {
        let location = LocationPoint::new(10.0, 20.0, Utc::now());
        let mut alert = EmergencyAlert::new(1, AlertKind::ManualSos, "p1".into(), Some(location), Utc::now());

        let later = Utc::now();
        alert.refresh(None, later);

        assert_eq!(alert.location, Some(location));
        assert_eq!(alert.timestamp, later);
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut alert = EmergencyAlert::new(1, AlertKind::StalenessTimeout, "p1".into(), None, Utc::now());

        let first = Utc::now();
        alert.resolve(first);
        let resolved_at = alert.resolved_at;
        alert.resolve(Utc::now());

        assert!(alert.resolved);
        assert_eq!(alert.resolved_at, resolved_at);
    }
}
