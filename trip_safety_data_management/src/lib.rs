use const_format::concatcp;

pub mod database;
mod session_store;

pub use session_store::*;

pub const DATA_DIR: &str = "data/";
pub const DATABASE_PATH: &str = concatcp!(DATA_DIR, "tracking.db");
