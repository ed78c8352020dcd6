use std::path::PathBuf;

use const_format::concatcp;
use sqlx::{
    Executor, Pool, Sqlite, SqlitePool, query, query_as,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use trip_safety_lib::{error::TrackingError, tracking_session::{SessionStatus, TrackingSession}};

use crate::DATABASE_PATH;

use super::constants::*;

const CREATE_SCHEMA: &str = concatcp!(
    "CREATE TABLE IF NOT EXISTS ", TRACKING_SESSIONS_TABLE_NAME, "(",
        TRIP_ID,                 " INTEGER PRIMARY KEY,",
        ORGANIZER_ID,            " TEXT NOT NULL,",
        STATUS,                  " TEXT NOT NULL,",
        STARTED_AT,              " TIMESTAMP,",
        COMPLETED_AT,            " TIMESTAMP,",
        STATUS_BEFORE_EMERGENCY, " TEXT,",
        PARTICIPANTS,            " BLOB NOT NULL,",
        EMERGENCY_ALERTS,        " BLOB NOT NULL,",
        NEXT_ALERT_ID,           " INTEGER NOT NULL,",
        VERSION,                 " INTEGER NOT NULL)"
);

/// SQLite-backed storage for tracking sessions, one row per trip. The
/// `version` column carries the optimistic-concurrency counter checked by
/// every update.
#[derive(Clone)]
pub struct TrackingDatabase {
    pool: Pool<Sqlite>,
}

impl TrackingDatabase {
    pub async fn connect() -> Result<Self, TrackingError> {
        let root: PathBuf = project_root::get_project_root()
            .map_err(|err| TrackingError::Unavailable(format!("failed to locate project root: {err}")))?;
        let options = SqliteConnectOptions::new()
            .filename(root.join(DATABASE_PATH))
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|err| TrackingError::Unavailable(format!("failed to connect to database: {err}")))?;

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Private in-memory database, used by tests and ephemeral deployments.
    pub async fn connect_in_memory() -> Result<Self, TrackingError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await
            .map_err(|err| TrackingError::Unavailable(format!("failed to open in-memory database: {err}")))?;

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    async fn init(&self) -> Result<(), TrackingError> {
        self.pool
            .execute(CREATE_SCHEMA)
            .await
            .map_err(|err| TrackingError::Unavailable(format!("failed to create schema: {err}")))
            .map(|_| ())
    }

    pub async fn insert_session(&self, session: &TrackingSession) -> Result<(), TrackingError> {
        query(concatcp!(
            "INSERT INTO ", TRACKING_SESSIONS_TABLE_NAME,
            "(", TRIP_ID, ", ", ORGANIZER_ID, ", ", STATUS, ", ", STARTED_AT, ", ", COMPLETED_AT, ", ",
            STATUS_BEFORE_EMERGENCY, ", ", PARTICIPANTS, ", ", EMERGENCY_ALERTS, ", ", NEXT_ALERT_ID, ", ", VERSION, ")
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ))
        .bind(session.trip_id)
        .bind(&session.organizer_id)
        .bind(session.status.as_str())
        .bind(session.started_at)
        .bind(session.completed_at)
        .bind(session.status_before_emergency.map(|status| status.as_str()))
        .bind(session.participants_blob())
        .bind(session.alerts_blob())
        .bind(session.next_alert_id)
        .bind(session.version)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if err.as_database_error().is_some_and(|db_err| db_err.is_unique_violation()) {
                TrackingError::InvalidTransition(format!(
                    "tracking session already exists for trip {}",
                    session.trip_id
                ))
            } else {
                TrackingError::Unavailable(format!("failed to insert session: {err}"))
            }
        })
        .map(|_| ())
    }

    pub async fn fetch_session(&self, trip_id: i64) -> Result<TrackingSession, TrackingError> {
        query_as::<_, TrackingSession>(concatcp!(
            "SELECT * FROM ", TRACKING_SESSIONS_TABLE_NAME, " WHERE ", TRIP_ID, " = ?1"
        ))
        .bind(trip_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => TrackingError::NotFound(format!("tracking session for trip {trip_id}")),
            other => TrackingError::Unavailable(format!("failed to fetch session: {other}")),
        })
    }

    /// Compare-and-swap write: commits the session only when the stored
    /// version still matches `session.version`, bumping it by one. Returns
    /// false when the write lost the race.
    pub async fn update_session(&self, session: &TrackingSession) -> Result<bool, TrackingError> {
        let result = query(concatcp!(
            "UPDATE ", TRACKING_SESSIONS_TABLE_NAME, " SET ",
            STATUS, " = ?1, ",
            STARTED_AT, " = ?2, ",
            COMPLETED_AT, " = ?3, ",
            STATUS_BEFORE_EMERGENCY, " = ?4, ",
            PARTICIPANTS, " = ?5, ",
            EMERGENCY_ALERTS, " = ?6, ",
            NEXT_ALERT_ID, " = ?7, ",
            VERSION, " = ?8
            WHERE ", TRIP_ID, " = ?9 AND ", VERSION, " = ?10"
        ))
        .bind(session.status.as_str())
        .bind(session.started_at)
        .bind(session.completed_at)
        .bind(session.status_before_emergency.map(|status| status.as_str()))
        .bind(session.participants_blob())
        .bind(session.alerts_blob())
        .bind(session.next_alert_id)
        .bind(session.version + 1)
        .bind(session.trip_id)
        .bind(session.version)
        .execute(&self.pool)
        .await
        .map_err(|err| TrackingError::Unavailable(format!("failed to update session: {err}")))?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn list_sessions_with_status(&self, status: SessionStatus) -> Result<Vec<i64>, TrackingError> {
        let rows = query_as::<_, (i64,)>(concatcp!(
            "SELECT ", TRIP_ID, " FROM ", TRACKING_SESSIONS_TABLE_NAME, " WHERE ", STATUS, " = ?1"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|err| TrackingError::Unavailable(format!("failed to list sessions: {err}")))?;

        Ok(rows.into_iter().map(|row| row.0).collect())
    }

    pub async fn delete_session(&self, trip_id: i64) -> Result<(), TrackingError> {
        let result = query(concatcp!(
            "DELETE FROM ", TRACKING_SESSIONS_TABLE_NAME, " WHERE ", TRIP_ID, " = ?1"
        ))
        .bind(trip_id)
        .execute(&self.pool)
        .await
        .map_err(|err| TrackingError::Unavailable(format!("failed to delete session: {err}")))?;

        if result.rows_affected() == 0 {
            return Err(TrackingError::NotFound(format!("tracking session for trip {trip_id}")));
        }
        Ok(())
    }
}
