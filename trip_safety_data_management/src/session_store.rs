use std::path::PathBuf;

use trip_safety_lib::{
    error::TrackingError,
    tracking_session::{SessionStatus, TrackingSession},
};

use crate::{DATA_DIR, database::db::TrackingDatabase};

/// The public interface to durable tracking-session storage.
///
/// Sessions are read and written whole; `commit` is the only write path
/// for existing sessions and is guarded by the optimistic version counter,
/// so concurrent writers of the same trip lose cleanly instead of
/// clobbering each other.
#[derive(Clone)]
pub struct SessionStore {
    database: TrackingDatabase,
}

impl SessionStore {
    pub async fn open() -> Result<Self, TrackingError> {
        let root: PathBuf = project_root::get_project_root()
            .map_err(|err| TrackingError::Unavailable(format!("failed to locate project root: {err}")))?;
        let data_dir = root.join(DATA_DIR);
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir)
                .map_err(|err| TrackingError::Unavailable(format!("failed to create data directory {data_dir:?}: {err}")))?;
        }

        Ok(SessionStore {
            database: TrackingDatabase::connect().await?,
        })
    }

    pub async fn open_in_memory() -> Result<Self, TrackingError> {
        Ok(SessionStore {
            database: TrackingDatabase::connect_in_memory().await?,
        })
    }

    /// Creates the session record. Fails when the trip already has one.
    pub async fn create_session(&self, session: &TrackingSession) -> Result<(), TrackingError> {
        self.database.insert_session(session).await
    }

    pub async fn get_session(&self, trip_id: i64) -> Result<TrackingSession, TrackingError> {
        self.database.fetch_session(trip_id).await
    }

    /// Compare-and-swap commit. On success the session's version is bumped
    /// to the stored one; on a lost race the caller re-reads and retries.
    pub async fn commit(&self, session: &mut TrackingSession) -> Result<bool, TrackingError> {
        let won = self.database.update_session(session).await?;
        if won {
            session.version += 1;
        }
        Ok(won)
    }

    /// Trips currently under active tracking, the staleness sweep set.
    pub async fn active_trip_ids(&self) -> Result<Vec<i64>, TrackingError> {
        self.database.list_sessions_with_status(SessionStatus::Active).await
    }

    /// Driven by trip deletion in the booking service; tracking state has
    /// no life of its own beyond the trip.
    pub async fn delete_session(&self, trip_id: i64) -> Result<(), TrackingError> {
        tracing::info!("Deleting tracking session for trip {trip_id}");
        self.database.delete_session(trip_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session(trip_id: i64) -> TrackingSession {
        TrackingSession::initialize(
            trip_id,
            "org-1".to_string(),
            [
                ("p1".to_string(), "Pia".to_string()),
                ("p2".to_string(), "Per".to_string()),
            ],
        )
    }

    #[tokio::test]
    async fn round_trips_a_session() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let session = sample_session(1);

        store.create_session(&session).await.unwrap();
        let loaded = store.get_session(1).await.unwrap();

        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let session = sample_session(1);

        store.create_session(&session).await.unwrap();
        let err = store.create_session(&session).await.unwrap_err();

        assert!(matches!(err, TrackingError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let err = store.get_session(42).await.unwrap_err();
        assert!(matches!(err, TrackingError::NotFound(_)));
    }

    #[tokio::test]
    async fn commit_bumps_version_and_detects_races() {
        let store = SessionStore::open_in_memory().await.unwrap();
        store.create_session(&sample_session(1)).await.unwrap();

        let mut first = store.get_session(1).await.unwrap();
        let mut second = store.get_session(1).await.unwrap();

        first.begin(chrono::Utc::now()).unwrap();
        assert!(store.commit(&mut first).await.unwrap());
        assert_eq!(first.version, 1);

        // The stale copy lost the race.
        second.begin(chrono::Utc::now()).unwrap();
        assert!(!store.commit(&mut second).await.unwrap());
        assert_eq!(second.version, 0);

        let loaded = store.get_session(1).await.unwrap();
        assert_eq!(loaded, first);
    }

    #[tokio::test]
    async fn active_trip_ids_filters_by_status() {
        let store = SessionStore::open_in_memory().await.unwrap();

        let mut active = sample_session(1);
        active.begin(chrono::Utc::now()).unwrap();
        store.create_session(&active).await.unwrap();
        store.create_session(&sample_session(2)).await.unwrap();

        assert_eq!(store.active_trip_ids().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let store = SessionStore::open_in_memory().await.unwrap();
        store.create_session(&sample_session(1)).await.unwrap();

        store.delete_session(1).await.unwrap();
        assert!(matches!(store.get_session(1).await, Err(TrackingError::NotFound(_))));
        assert!(matches!(store.delete_session(1).await, Err(TrackingError::NotFound(_))));
    }
}
