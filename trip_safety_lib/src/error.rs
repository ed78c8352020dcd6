use thiserror::Error;

/// Failure taxonomy shared by every layer of the tracking engine.
///
/// `InvalidLocation` and `Conflict` are recoverable (drop the update,
/// retry the call); the rest are permanent for the request that hit them.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("write conflict on trip {0}, retry the request")]
    Conflict(i64),

    #[error("unavailable: {0}")]
    Unavailable(String),
}
