//! Audit and usage collaborators backed by structured logs.
//!
//! Persistence of both trails belongs to other services; here they are emitted as
//! `tracing` events on dedicated targets so a log pipeline can route them.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::domain::{AppError, AuditLogger, UsageRecorder};

#[derive(Debug, Default, Clone)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(
        &self,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<(), AppError> {
        info!(
            target: "audit",
            action = %action,
            resource_type = %resource_type,
            resource_id = resource_id.unwrap_or("-"),
            metadata = %metadata,
            "audit"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct TracingUsageRecorder;

#[async_trait]
impl UsageRecorder for TracingUsageRecorder {
    async fn record(&self, consumer_id: Uuid, calls: u64, volume: Decimal) -> Result<(), AppError> {
        info!(
            target: "usage",
            consumer_id = %consumer_id,
            calls,
            volume = %volume,
            "usage"
        );
        Ok(())
    }
}
