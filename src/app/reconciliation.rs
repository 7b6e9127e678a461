//! Daily and on-demand reconciliation against provider status.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    AppError, AuditLogger, DatabaseError, GatewayOutcome, Payment, PaymentStatus, PaymentStore,
    ProviderStatus, ReconciliationSummary,
};

use super::metrics::GatewayMetrics;
use super::registry::ProviderRegistry;
use super::service::{PaymentService, TransitionOutcome};

/// Payments fetched per page during a daily run
const RECONCILIATION_PAGE_SIZE: i64 = 100;

/// Result of comparing one payment with its provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Reconciled,
    Discrepancy,
    Unreachable,
    Skipped,
}

/// Re-polls providers for completed payments and promotes agreement to SETTLED
pub struct ReconciliationService {
    service: Arc<PaymentService>,
    store: Arc<dyn PaymentStore>,
    providers: Arc<ProviderRegistry>,
    audit: Arc<dyn AuditLogger>,
    metrics: Arc<GatewayMetrics>,
}

impl ReconciliationService {
    #[must_use]
    pub fn new(
        service: Arc<PaymentService>,
        store: Arc<dyn PaymentStore>,
        providers: Arc<ProviderRegistry>,
        audit: Arc<dyn AuditLogger>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            service,
            store,
            providers,
            audit,
            metrics,
        }
    }

    /// Reconcile every payment COMPLETED within `date` (UTC).
    ///
    /// Disagreement never changes a payment; it is written to the audit trail.
    #[instrument(skip(self))]
    pub async fn run_daily(&self, date: NaiveDate) -> Result<ReconciliationSummary, AppError> {
        let started_at = Utc::now();
        let start = date.and_time(NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1);

        let mut summary = ReconciliationSummary {
            date,
            total_checked: 0,
            reconciled: 0,
            discrepancies: 0,
            errors: 0,
            started_at,
            finished_at: started_at,
        };

        let mut after: Option<Uuid> = None;
        loop {
            let page = self
                .store
                .list_completed_between(start, end, RECONCILIATION_PAGE_SIZE, after)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.id);
            let page_len = page.len();

            for payment in &page {
                summary.total_checked += 1;
                match self.reconcile_completed(payment, date).await {
                    Verdict::Reconciled => summary.reconciled += 1,
                    Verdict::Discrepancy => summary.discrepancies += 1,
                    Verdict::Unreachable => summary.errors += 1,
                    Verdict::Skipped => {}
                }
            }

            if (page_len as i64) < RECONCILIATION_PAGE_SIZE {
                break;
            }
        }

        summary.finished_at = Utc::now();
        self.metrics.reconciliation_run();
        info!(
            total = summary.total_checked,
            reconciled = summary.reconciled,
            discrepancies = summary.discrepancies,
            errors = summary.errors,
            "Reconciliation run complete"
        );

        let date_str = date.to_string();
        if let Err(e) = self
            .audit
            .log(
                "reconciliation.completed",
                "reconciliation",
                Some(&date_str),
                serde_json::to_value(&summary).unwrap_or_default(),
            )
            .await
        {
            warn!(error = %e, "Failed to audit reconciliation summary");
        }

        Ok(summary)
    }

    /// On-demand check of a single payment.
    ///
    /// Payments still waiting on the provider are polled through the lifecycle;
    /// COMPLETED ones are reconciled as in the daily run.
    #[instrument(skip(self))]
    pub async fn check_payment(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(payment_id.to_string())))?;

        match payment.status {
            s if s.is_awaiting_provider() => self.service.check_payment_status(payment_id).await,
            PaymentStatus::Completed => {
                let verdict = self
                    .reconcile_completed(&payment, Utc::now().date_naive())
                    .await;
                debug!(verdict = ?verdict, "Single payment reconciled");
                self.store
                    .get_payment(payment_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Database(DatabaseError::NotFound(payment_id.to_string()))
                    })
            }
            _ => Ok(payment),
        }
    }

    async fn reconcile_completed(&self, payment: &Payment, date: NaiveDate) -> Verdict {
        let Some(reference) = payment.provider_reference.as_deref() else {
            self.record_discrepancy(payment, "missing_reference", date).await;
            return Verdict::Discrepancy;
        };

        let adapter = match self.providers.get(payment.provider) {
            Ok(a) => a,
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "No adapter for payment");
                return Verdict::Unreachable;
            }
        };

        let reported = match adapter.check_status(reference).await {
            Ok(GatewayOutcome::Success(status)) => status,
            Ok(GatewayOutcome::Failure(reason) | GatewayOutcome::Indeterminate(reason)) => {
                warn!(payment_id = %payment.id, reason = %reason, "Provider status check failed");
                return Verdict::Unreachable;
            }
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "Provider status check errored");
                return Verdict::Unreachable;
            }
        };

        if reported != ProviderStatus::Completed {
            self.record_discrepancy(payment, reported.as_str(), date).await;
            return Verdict::Discrepancy;
        }

        match self
            .service
            .update_payment_status(
                payment.id,
                PaymentStatus::Settled,
                None,
                Some(json!({ "source": "reconciliation", "date": date })),
            )
            .await
        {
            Ok(TransitionOutcome::Applied(_)) => Verdict::Reconciled,
            Ok(other) => {
                debug!(status = %other.payment().status, "Payment moved before settlement");
                Verdict::Skipped
            }
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "Settlement failed");
                Verdict::Unreachable
            }
        }
    }

    async fn record_discrepancy(&self, payment: &Payment, provider_status: &str, date: NaiveDate) {
        warn!(
            payment_id = %payment.id,
            internal = %payment.status,
            provider = %provider_status,
            "Reconciliation discrepancy"
        );
        let id = payment.id.to_string();
        if let Err(e) = self
            .audit
            .log(
                "reconciliation.discrepancy",
                "payment",
                Some(&id),
                json!({
                    "internal_status": payment.status,
                    "provider_status": provider_status,
                    "amount": payment.amount,
                    "provider": payment.provider,
                    "date": date,
                }),
            )
            .await
        {
            warn!(error = %e, "Failed to audit discrepancy");
        }
    }
}
