//! PostgreSQL store for payments, their ledger and consumers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    AppError, Consumer, DatabaseError, PaginatedResponse, Payment, PaymentFilter, PaymentStore,
    Provider, RefundInsert, StatusChange, Transaction, ValidationError, refund_status,
};

const PAYMENT_COLUMNS: &str = "id, consumer_id, external_reference, amount, currency, provider, \
     phone_number, status, provider_reference, callback_url, idempotency_key, expires_at, \
     created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, payment_id, type, amount, status, provider_transaction_id, \
     raw_payload, processed_at, created_at";

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL database client with connection pooling
#[derive(Clone)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Wrap an existing pool
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Register a consumer under the SHA-256 hex digest of its API key
    #[instrument(skip(self, api_key_hash))]
    pub async fn create_consumer(&self, name: &str, api_key_hash: &str) -> Result<Consumer, AppError> {
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO consumers (id, name, api_key_hash) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(name)
            .bind(api_key_hash)
            .execute(&self.pool)
            .await?;
        Ok(Consumer {
            id,
            name: name.to_string(),
        })
    }

    fn row_to_payment(row: &sqlx::postgres::PgRow) -> Result<Payment, AppError> {
        let provider: String = row.try_get("provider")?;
        let status: String = row.try_get("status")?;
        Ok(Payment {
            id: row.try_get("id")?,
            consumer_id: row.try_get("consumer_id")?,
            external_reference: row.try_get("external_reference")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            provider: provider
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            phone_number: row.try_get("phone_number")?,
            status: status
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            provider_reference: row.try_get("provider_reference")?,
            callback_url: row.try_get("callback_url")?,
            idempotency_key: row.try_get("idempotency_key")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<Transaction, AppError> {
        let transaction_type: String = row.try_get("type")?;
        Ok(Transaction {
            id: row.try_get("id")?,
            payment_id: row.try_get("payment_id")?,
            transaction_type: transaction_type
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            amount: row.try_get("amount")?,
            status: row.try_get("status")?,
            provider_transaction_id: row.try_get("provider_transaction_id")?,
            raw_payload: row.try_get("raw_payload")?,
            processed_at: row.try_get("processed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn insert_transaction_with<'e, E>(
        executor: E,
        transaction: &Transaction,
    ) -> Result<Transaction, AppError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO transactions (
                id, payment_id, type, amount, status, provider_transaction_id,
                raw_payload, processed_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(transaction.id)
        .bind(transaction.payment_id)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.amount)
        .bind(&transaction.status)
        .bind(&transaction.provider_transaction_id)
        .bind(&transaction.raw_payload)
        .bind(transaction.processed_at)
        .bind(transaction.created_at)
        .fetch_one(executor)
        .await?;
        Self::row_to_transaction(&row)
    }
}

#[async_trait]
impl PaymentStore for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, payment), fields(payment_id = %payment.id, provider = %payment.provider))]
    async fn insert_payment(&self, payment: &Payment) -> Result<Payment, AppError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payments (
                id, consumer_id, external_reference, amount, currency, provider,
                phone_number, status, provider_reference, callback_url, idempotency_key,
                expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.id)
        .bind(payment.consumer_id)
        .bind(&payment.external_reference)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.provider.as_str())
        .bind(&payment.phone_number)
        .bind(payment.status.as_str())
        .bind(&payment.provider_reference)
        .bind(&payment.callback_url)
        .bind(&payment.idempotency_key)
        .bind(payment.expires_at)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_payment(&row)
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError> {
        let row = sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_payment).transpose()
    }

    #[instrument(skip(self, idempotency_key))]
    async fn find_by_idempotency_key(
        &self,
        consumer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Payment>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE consumer_id = $1 AND idempotency_key = $2"
        ))
        .bind(consumer_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_payment).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_provider_reference(
        &self,
        provider: Provider,
        provider_reference: &str,
    ) -> Result<Option<Payment>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider = $1 AND provider_reference = $2"
        ))
        .bind(provider.as_str())
        .bind(provider_reference)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_payment).transpose()
    }

    #[instrument(skip(self, filter), fields(consumer_id = %filter.consumer_id))]
    async fn list_payments(
        &self,
        filter: &PaymentFilter,
        limit: i64,
        cursor: Option<Uuid>,
    ) -> Result<PaginatedResponse<Payment>, AppError> {
        let limit = limit.clamp(1, 100);
        // Fetch one extra to determine if there are more items
        let fetch_limit = limit + 1;

        let cursor_created_at: Option<DateTime<Utc>> = match cursor {
            Some(cursor_id) => {
                let row = sqlx::query(
                    "SELECT created_at FROM payments WHERE id = $1 AND consumer_id = $2",
                )
                .bind(cursor_id)
                .bind(filter.consumer_id)
                .fetch_optional(&self.pool)
                .await?;
                match row {
                    Some(row) => Some(row.try_get("created_at")?),
                    None => {
                        return Err(AppError::Validation(ValidationError::invalid(
                            "cursor",
                            "Invalid cursor",
                        )));
                    }
                }
            }
            None => None,
        };

        let rows = sqlx::query(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE consumer_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
              AND ($5::timestamptz IS NULL OR (created_at, id) < ($5, $6))
            ORDER BY created_at DESC, id DESC
            LIMIT $7
            "#
        ))
        .bind(filter.consumer_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(cursor_created_at)
        .bind(cursor)
        .bind(fetch_limit)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() > limit as usize;
        let payments = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_payment)
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if has_more {
            payments.last().map(|p| p.id)
        } else {
            None
        };

        Ok(PaginatedResponse::new(payments, next_cursor, has_more))
    }

    #[instrument(skip(self))]
    async fn list_completed_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
        after: Option<Uuid>,
    ) -> Result<Vec<Payment>, AppError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE status = 'COMPLETED'
              AND updated_at >= $1 AND updated_at < $2
              AND ($3::uuid IS NULL OR id > $3)
            ORDER BY id ASC
            LIMIT $4
            "#
        ))
        .bind(start)
        .bind(end)
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_payment).collect()
    }

    #[instrument(skip(self, change), fields(payment_id = %change.payment_id, from = %change.from, to = %change.to))]
    async fn transition(&self, change: &StatusChange) -> Result<Option<Payment>, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE payments
            SET status = $1,
                provider_reference = COALESCE(provider_reference, $2),
                updated_at = NOW()
            WHERE id = $3 AND status = $4
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(change.to.as_str())
        .bind(&change.provider_reference)
        .bind(change.payment_id)
        .bind(change.from.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            debug!("Status guard did not match, nothing written");
            tx.rollback().await?;
            return Ok(None);
        };
        let payment = Self::row_to_payment(&row)?;

        if let Some(transaction) = &change.transaction {
            Self::insert_transaction_with(&mut *tx, transaction).await?;
        }

        tx.commit().await?;
        Ok(Some(payment))
    }

    #[instrument(skip(self, provider_reference, transaction))]
    async fn attach_provider_reference(
        &self,
        payment_id: Uuid,
        provider_reference: &str,
        transaction: &Transaction,
    ) -> Result<Option<Payment>, AppError> {
        let mut tx = self.pool.begin().await?;

        // updated_at stays put: the reconciliation window reads it as the completion time.
        let row = sqlx::query(&format!(
            r#"
            UPDATE payments
            SET provider_reference = $1
            WHERE id = $2 AND provider_reference IS NULL
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(provider_reference)
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            debug!("Provider reference already set, nothing written");
            tx.rollback().await?;
            return Ok(None);
        };
        let payment = Self::row_to_payment(&row)?;
        Self::insert_transaction_with(&mut *tx, transaction).await?;

        tx.commit().await?;
        Ok(Some(payment))
    }

    #[instrument(skip(self, transaction), fields(payment_id = %transaction.payment_id, kind = transaction.transaction_type.as_str()))]
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<Transaction, AppError> {
        Self::insert_transaction_with(&self.pool, transaction).await
    }

    #[instrument(skip(self, refund), fields(payment_id = %refund.payment_id, amount = %refund.amount))]
    async fn insert_refund_within_balance(&self, refund: &Transaction) -> Result<RefundInsert, AppError> {
        let mut tx = self.pool.begin().await?;

        // The payment row lock serializes refunds of one payment until commit.
        let locked = sqlx::query("SELECT amount FROM payments WHERE id = $1 FOR UPDATE")
            .bind(refund.payment_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(locked) = locked else {
            tx.rollback().await?;
            return Err(AppError::Database(DatabaseError::NotFound(
                refund.payment_id.to_string(),
            )));
        };
        let amount: Decimal = locked.try_get("amount")?;

        if let Some(key) = refund.idempotency_key() {
            let taken: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM transactions
                    WHERE payment_id = $1
                      AND type = 'refund'
                      AND raw_payload->>'idempotency_key' = $2
                )
                "#,
            )
            .bind(refund.payment_id)
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;
            if taken {
                tx.rollback().await?;
                return Err(AppError::Database(DatabaseError::Duplicate(
                    "transactions_refund_idempotency_key".to_string(),
                )));
            }
        }

        let committed: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM transactions
            WHERE payment_id = $1
              AND type = 'refund'
              AND status IN ($2, $3)
            "#,
        )
        .bind(refund.payment_id)
        .bind(refund_status::PENDING)
        .bind(refund_status::COMPLETED)
        .fetch_one(&mut *tx)
        .await?;

        if committed + refund.amount > amount {
            debug!(%committed, "Refund exceeds remaining balance, nothing written");
            tx.rollback().await?;
            return Ok(RefundInsert::ExceedsBalance { committed });
        }

        let inserted = Self::insert_transaction_with(&mut *tx, refund).await?;
        tx.commit().await?;
        Ok(RefundInsert::Inserted(inserted))
    }

    #[instrument(skip(self))]
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    #[instrument(skip(self))]
    async fn list_transactions(&self, payment_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE payment_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_transaction).collect()
    }

    #[instrument(skip(self, idempotency_key))]
    async fn find_refund_by_idempotency_key(
        &self,
        payment_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE payment_id = $1
              AND type = 'refund'
              AND raw_payload->>'idempotency_key' = $2
            "#
        ))
        .bind(payment_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    #[instrument(skip(self))]
    async fn resolve_refund(
        &self,
        transaction_id: Uuid,
        status: &str,
        provider_transaction_id: Option<&str>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $1,
                provider_transaction_id = COALESCE($2, provider_transaction_id),
                processed_at = NOW()
            WHERE id = $3 AND type = 'refund' AND status = $4
            "#,
        )
        .bind(status)
        .bind(provider_transaction_id)
        .bind(transaction_id)
        .bind(refund_status::PENDING)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, key_hash))]
    async fn find_consumer_by_key_hash(&self, key_hash: &str) -> Result<Option<Consumer>, AppError> {
        let row = sqlx::query("SELECT id, name FROM consumers WHERE api_key_hash = $1")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(Consumer {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }
}
