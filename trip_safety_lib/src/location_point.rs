use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;

/// A single GPS fix as reported by a participant's device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub position: Point<f64>,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl LocationPoint {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            position: Point::new(longitude, latitude),
            altitude: None,
            accuracy: None,
            timestamp,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.position.y()
    }

    pub fn longitude(&self) -> f64 {
        self.position.x()
    }

    /// Range and finiteness checks. Ordering against the participant's
    /// last check-in is enforced at ingestion, where that state lives.
    pub fn validate(&self) -> Result<(), TrackingError> {
        let (lat, lon) = (self.latitude(), self.longitude());

        if !lat.is_finite() || !lon.is_finite() {
            return Err(TrackingError::InvalidLocation("coordinates must be finite".to_string()));
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(TrackingError::InvalidLocation(format!("latitude {} out of range", lat)));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(TrackingError::InvalidLocation(format!("longitude {} out of range", lon)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_extreme_but_legal_coordinates() {
        let point = LocationPoint::new(-90.0, 180.0, Utc::now());
        assert!(point.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_and_non_finite() {
        assert!(LocationPoint::new(90.5, 0.0, Utc::now()).validate().is_err());
        assert!(LocationPoint::new(0.0, -180.5, Utc::now()).validate().is_err());
        assert!(LocationPoint::new(f64::NAN, 0.0, Utc::now()).validate().is_err());
        assert!(LocationPoint::new(0.0, f64::INFINITY, Utc::now()).validate().is_err());
    }
}
