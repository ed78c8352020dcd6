use axum::{extract::FromRequestParts, http::request::Parts};
use trip_safety_lib::error::TrackingError;

use crate::routes::ApiError;

/// Header carrying the authenticated user id, stamped by the auth layer
/// in front of this service. The engine treats it as an opaque string;
/// organizer/participant roles come from the session record itself, so
/// every role check happens inside the engine operation it guards.
pub const IDENTITY_HEADER: &str = "x-user-id";

pub struct CallerIdentity(pub String);

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(IDENTITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| CallerIdentity(value.to_owned()))
            .ok_or_else(|| ApiError(TrackingError::Forbidden("missing caller identity".to_string())))
    }
}
