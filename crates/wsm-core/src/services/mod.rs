//! Services shared by the CLI and the API server

mod database;

pub use database::DatabaseService;
