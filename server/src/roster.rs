use std::future::Future;

use serde::Deserialize;
use trip_safety_lib::error::TrackingError;

/// Trip membership as owned by the booking service. The tracking engine
/// only ever reads it, at initialization time.
#[derive(Debug, Clone, Deserialize)]
pub struct TripRoster {
    pub organizer_id: String,
    pub members: Vec<RosterMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterMember {
    pub user_id: String,
    pub user_name: String,
}

pub trait RosterProvider: Send + Sync + 'static {
    fn fetch_roster(&self, trip_id: i64) -> impl Future<Output = Result<TripRoster, TrackingError>> + Send;
}

/// Production roster source: the trip/booking service's REST API.
pub struct HttpRosterClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRosterClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

impl RosterProvider for HttpRosterClient {
    async fn fetch_roster(&self, trip_id: i64) -> Result<TripRoster, TrackingError> {
        let url = format!("{}/trips/{}/roster", self.base_url, trip_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| TrackingError::Unavailable(format!("trip service: {err}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TrackingError::NotFound(format!("trip {trip_id}")));
        }

        response
            .error_for_status()
            .map_err(|err| TrackingError::Unavailable(format!("trip service: {err}")))?
            .json()
            .await
            .map_err(|err| TrackingError::Unavailable(format!("trip service sent a malformed roster: {err}")))
    }
}
