pub mod auth;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod notify;
pub mod roster;
pub mod routes;
pub mod server_state;
