//! Job handlers.
//!
//! Each handler is a plain async function of the job payload and its
//! dependencies; the worker loop only decides what happens to the job afterwards.
//! Every handler tolerates being run more than once for the same job.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    AppError, CallbackClient, CallbackPayload, DatabaseError, Job, JobQueue, PaymentStatus,
    PaymentStore, QueuedJob,
};

use super::metrics::GatewayMetrics;
use super::reconciliation::ReconciliationService;
use super::service::PaymentService;

/// Dependencies shared by all job handlers
#[derive(Clone)]
pub struct JobContext {
    pub service: Arc<PaymentService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub store: Arc<dyn PaymentStore>,
    pub queue: Arc<dyn JobQueue>,
    pub callbacks: Arc<dyn CallbackClient>,
    pub metrics: Arc<GatewayMetrics>,
}

/// What the worker should do with a job whose handler returned an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Schedule another attempt with backoff
    Retry,
    /// Nothing sensible to retry; log and drop
    Drop,
}

impl FailureAction {
    pub fn for_error(error: &AppError) -> Self {
        match error {
            AppError::NotFound(_) | AppError::Database(DatabaseError::NotFound(_)) => Self::Drop,
            e if e.is_retryable() => Self::Retry,
            _ => Self::Drop,
        }
    }
}

/// Run the handler for one claimed job
#[instrument(skip_all, fields(job_id = %job.id, kind = job.job.kind(), attempt = job.attempts + 1))]
pub async fn handle_job(job: &QueuedJob, ctx: &JobContext) -> Result<(), AppError> {
    match &job.job {
        Job::InitiatePayment { payment_id } => {
            ctx.service.initiate_payment(*payment_id).await?;
            Ok(())
        }
        Job::ProcessRefund {
            payment_id,
            refund_transaction_id,
        } => {
            ctx.service
                .process_refund(*payment_id, *refund_transaction_id)
                .await
        }
        Job::SendCallback { payment_id, status } => send_callback(*payment_id, *status, ctx).await,
        Job::PaymentStatusCheck { payment_id } => payment_status_check(*payment_id, ctx).await,
        Job::DailyReconciliation { date } => {
            ctx.reconciliation.run_daily(*date).await?;
            Ok(())
        }
    }
}

async fn send_callback(
    payment_id: Uuid,
    status: PaymentStatus,
    ctx: &JobContext,
) -> Result<(), AppError> {
    let payment = ctx
        .store
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(payment_id.to_string())))?;

    let Some(url) = payment.callback_url.as_deref() else {
        debug!("Payment has no callback URL");
        return Ok(());
    };

    let payload = CallbackPayload {
        payment_id: payment.id,
        status,
        amount: payment.amount,
        currency: payment.currency.clone(),
        external_reference: payment.external_reference.clone(),
        timestamp: Utc::now(),
    };
    ctx.callbacks.deliver(url, &payload).await?;
    info!(status = %status, "Callback delivered");
    Ok(())
}

/// Polling fallback for lost webhooks. Re-schedules itself until the payment leaves
/// the waiting states; expiry bounds the chain.
async fn payment_status_check(payment_id: Uuid, ctx: &JobContext) -> Result<(), AppError> {
    let payment = ctx.service.check_payment_status(payment_id).await?;

    if payment.status.is_awaiting_provider() {
        let delay = ctx.service.config().status_check_delay;
        let run_at = (Utc::now() + delay).min(payment.expires_at);
        ctx.queue
            .enqueue_at(Job::PaymentStatusCheck { payment_id }, run_at)
            .await?;
        debug!(next_check = %run_at, "Payment still pending, status check rescheduled");
    } else {
        debug!(status = %payment.status, "Payment resolved, polling stops");
    }
    Ok(())
}
