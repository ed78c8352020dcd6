use std::sync::Arc;

use crate::{engine::TrackingEngine, notify::HttpNotifier, roster::HttpRosterClient};

/// Engine wired with the production collaborators.
pub type AppEngine = TrackingEngine<HttpRosterClient, HttpNotifier>;

pub struct ServerState {
    pub engine: Arc<AppEngine>,
}
