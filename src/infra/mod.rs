//! Infrastructure layer implementations.

pub mod callback;
pub mod collaborators;
pub mod database;
pub mod providers;
pub mod signing;

pub use callback::HttpCallbackClient;
pub use collaborators::{TracingAuditLogger, TracingUsageRecorder};
pub use database::{PostgresClient, PostgresConfig, PostgresJobQueue};
pub use providers::{AirtelConfig, AirtelProvider, MtnConfig, MtnProvider};
pub use signing::{sign_payload, verify_signature};
