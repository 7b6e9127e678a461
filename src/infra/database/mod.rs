//! PostgreSQL persistence.

pub mod jobs;
pub mod postgres;

pub use jobs::PostgresJobQueue;
pub use postgres::{PostgresClient, PostgresConfig};
