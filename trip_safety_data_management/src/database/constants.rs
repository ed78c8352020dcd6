pub const TRACKING_SESSIONS_TABLE_NAME: &str = "TrackingSessions";
pub const TRIP_ID: &str = "trip_id";
pub const ORGANIZER_ID: &str = "organizer_id";
pub const STATUS: &str = "status";
pub const STARTED_AT: &str = "started_at";
pub const COMPLETED_AT: &str = "completed_at";
pub const STATUS_BEFORE_EMERGENCY: &str = "status_before_emergency";
pub const PARTICIPANTS: &str = "participants";
pub const EMERGENCY_ALERTS: &str = "emergency_alerts";
pub const NEXT_ALERT_ID: &str = "next_alert_id";
pub const VERSION: &str = "version";
