//! Background job definitions shared by the queue, the worker and the services.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::PaymentStatus;

/// A unit of work on the durable queue.
///
/// Every variant must be safe to run more than once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Job {
    InitiatePayment {
        payment_id: Uuid,
    },
    ProcessRefund {
        payment_id: Uuid,
        refund_transaction_id: Uuid,
    },
    SendCallback {
        payment_id: Uuid,
        status: PaymentStatus,
    },
    PaymentStatusCheck {
        payment_id: Uuid,
    },
    DailyReconciliation {
        date: NaiveDate,
    },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitiatePayment { .. } => "initiate-payment",
            Self::ProcessRefund { .. } => "process-refund",
            Self::SendCallback { .. } => "send-callback",
            Self::PaymentStatusCheck { .. } => "payment-status-check",
            Self::DailyReconciliation { .. } => "daily-reconciliation",
        }
    }

    /// Attempts before the job is abandoned
    pub fn max_attempts(&self) -> i32 {
        match self {
            Self::SendCallback { .. } => 5,
            _ => 3,
        }
    }

    pub fn payment_id(&self) -> Option<Uuid> {
        match self {
            Self::InitiatePayment { payment_id }
            | Self::ProcessRefund { payment_id, .. }
            | Self::SendCallback { payment_id, .. }
            | Self::PaymentStatusCheck { payment_id } => Some(*payment_id),
            Self::DailyReconciliation { .. } => None,
        }
    }
}

/// A job claimed from the queue by a worker
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    pub job: Job,
    /// Attempts made before this one
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
}

impl QueuedJob {
    /// Whether this is the final allowed attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempts + 1 >= self.max_attempts
    }
}
