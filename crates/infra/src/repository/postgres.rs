//! Postgres-backed ledger store.
//!
//! Schema lives in `crates/infra/migrations/0001_vault.sql` and can be applied
//! with [`PostgresVaultRepository::ensure_schema`].
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | RepositoryError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / network / other | N/A | `Storage` |
//!
//! ## Atomicity
//!
//! Entry creation, guarded deletion, the paid compare-and-set and intent
//! insertion each run in one transaction. Entry reads load entries and splits
//! from one `REPEATABLE READ` snapshot. The paid transition is
//! `UPDATE vault_splits ... WHERE paid = FALSE`, so concurrent webhook
//! deliveries and manual overrides race on a single row.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use tripvault_core::{Currency, EntryId, IntentId, Money, SettlementId, SplitId, TripId, UserId};
use tripvault_vault::{
    CasOutcome, IntentStatus, PaymentIntentRecord, SettledVia, SettlementMethod, SettlementRecord,
    SplitKind, UnpaidSplit, VaultEntry, VaultSplit,
};

use super::{DeleteOutcome, RepositoryError, VaultRepository};

const SCHEMA: &str = include_str!("../../migrations/0001_vault.sql");

#[derive(Debug, Clone)]
pub struct PostgresVaultRepository {
    pool: Arc<PgPool>,
}

impl PostgresVaultRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply the vault schema (idempotent).
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, RepositoryError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    /// Read-only transaction at `REPEATABLE READ`, so entries and their
    /// splits come from one snapshot.
    async fn begin_snapshot(&self) -> Result<Transaction<'_, Postgres>, RepositoryError> {
        let mut tx = self.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;
        Ok(tx)
    }

    /// Run an entry query and load the matching splits in the same snapshot.
    async fn load_entries(
        &self,
        operation: &str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<VaultEntry>, RepositoryError> {
        let mut tx = self.begin_snapshot().await?;
        let rows = query
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        let entries = hydrate(&mut tx, rows).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(entries)
    }
}

/// Attach splits to entry rows (kept in the given order).
async fn hydrate(
    tx: &mut Transaction<'_, Postgres>,
    entry_rows: Vec<PgRow>,
) -> Result<Vec<VaultEntry>, RepositoryError> {
    let mut entries = entry_rows
        .iter()
        .map(entry_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    if entries.is_empty() {
        return Ok(entries);
    }

    let ids = entries.iter().map(|e| *e.id.as_uuid()).collect::<Vec<Uuid>>();
    let split_rows = sqlx::query(
        r#"
        SELECT id, entry_id, user_id, amount_minor, paid, paid_at, settled_via, processor_payable
        FROM vault_splits
        WHERE entry_id = ANY($1)
        ORDER BY entry_id, user_id
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("load_splits", e))?;

    let mut by_entry: HashMap<EntryId, Vec<VaultSplit>> = HashMap::new();
    for row in &split_rows {
        let split = split_from_row(row)?;
        by_entry.entry(split.entry_id).or_default().push(split);
    }
    for entry in &mut entries {
        entry.splits = by_entry.remove(&entry.id).unwrap_or_default();
    }
    Ok(entries)
}

const ENTRY_COLUMNS: &str = "id, trip_id, description, amount_minor, currency, paid_by, category, split_kind, occurred_at, created_at";

const INTENT_COLUMNS: &str = "id, split_id, trip_id, payer_id, recipient_id, amount_minor, currency, status, failure_message, created_at, completed_at";

#[async_trait::async_trait]
impl VaultRepository for PostgresVaultRepository {
    #[instrument(skip(self, entry), fields(entry_id = %entry.id, trip_id = %entry.trip_id), err)]
    async fn create_entry_with_splits(&self, entry: VaultEntry) -> Result<VaultEntry, RepositoryError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO vault_entries (
                id, trip_id, description, amount_minor, currency,
                paid_by, category, split_kind, occurred_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.trip_id.as_uuid())
        .bind(&entry.description)
        .bind(entry.amount.amount_minor)
        .bind(entry.amount.currency.as_str())
        .bind(entry.paid_by.as_uuid())
        .bind(&entry.category)
        .bind(entry.split_kind.as_str())
        .bind(entry.occurred_at)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_entry", e))?;

        for split in &entry.splits {
            sqlx::query(
                r#"
                INSERT INTO vault_splits (
                    id, entry_id, user_id, amount_minor, paid, paid_at, settled_via, processor_payable
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(split.id.as_uuid())
            .bind(entry.id.as_uuid())
            .bind(split.user_id.as_uuid())
            .bind(split.amount_minor)
            .bind(split.paid)
            .bind(split.paid_at)
            .bind(split.settled_via.map(|v| v.as_str()))
            .bind(split.processor_payable)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_split", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(entry)
    }

    #[instrument(skip(self), fields(entry_id = %id), err)]
    async fn get_entry(&self, id: EntryId) -> Result<Option<VaultEntry>, RepositoryError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM vault_entries WHERE id = $1");
        let query = sqlx::query(&sql).bind(id.as_uuid());
        Ok(self.load_entries("get_entry", query).await?.into_iter().next())
    }

    #[instrument(skip(self), fields(trip_id = %trip_id), err)]
    async fn list_entries(&self, trip_id: TripId) -> Result<Vec<VaultEntry>, RepositoryError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM vault_entries WHERE trip_id = $1 ORDER BY occurred_at DESC, id ASC"
        );
        let query = sqlx::query(&sql).bind(trip_id.as_uuid());
        self.load_entries("list_entries", query).await
    }

    #[instrument(skip(self), fields(entry_id = %id), err)]
    async fn delete_entry(&self, id: EntryId, live_after: DateTime<Utc>) -> Result<DeleteOutcome, RepositoryError> {
        let mut tx = self.begin().await?;

        let found = sqlx::query("SELECT id FROM vault_entries WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_entry", e))?;
        if found.is_none() {
            return rollback(tx, DeleteOutcome::Missing).await;
        }

        // Split row locks serialise against the paid CAS and intent insertion.
        let splits = sqlx::query("SELECT id, paid FROM vault_splits WHERE entry_id = $1 ORDER BY id FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_splits", e))?;
        let mut split_ids = Vec::with_capacity(splits.len());
        for row in &splits {
            if get::<bool>(row, "paid")? {
                return rollback(tx, DeleteOutcome::HasPaidSplits).await;
            }
            split_ids.push(get::<Uuid>(row, "id")?);
        }

        let in_flight = sqlx::query(
            r#"
            SELECT split_id, id FROM vault_payment_intents
            WHERE split_id = ANY($1) AND status = 'pending' AND created_at > $2
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(&split_ids)
        .bind(live_after)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("pending_intents", e))?;
        if let Some(row) = in_flight {
            let outcome = DeleteOutcome::PaymentInFlight {
                split_id: SplitId::from_uuid(get(&row, "split_id")?),
                intent_id: IntentId::new(get::<String>(&row, "id")?),
            };
            return rollback(tx, outcome).await;
        }

        // Splits and their intents go with the entry via ON DELETE CASCADE.
        sqlx::query("DELETE FROM vault_entries WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_entry", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(DeleteOutcome::Deleted)
    }

    #[instrument(skip(self), fields(split_id = %split_id), err)]
    async fn get_split(&self, split_id: SplitId) -> Result<Option<(VaultEntry, VaultSplit)>, RepositoryError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM vault_entries WHERE id = (SELECT entry_id FROM vault_splits WHERE id = $1)"
        );
        let query = sqlx::query(&sql).bind(split_id.as_uuid());

        Ok(self
            .load_entries("get_split", query)
            .await?
            .into_iter()
            .next()
            .and_then(|entry| entry.split(split_id).cloned().map(|s| (entry, s))))
    }

    #[instrument(skip(self, record), fields(split_id = %record.split_id, settlement_id = %record.id), err)]
    async fn set_split_paid_if_unpaid(&self, record: &SettlementRecord) -> Result<CasOutcome, RepositoryError> {
        let mut tx = self.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE vault_splits
            SET paid = TRUE, paid_at = $2, settled_via = $3
            WHERE id = $1 AND paid = FALSE
            "#,
        )
        .bind(record.split_id.as_uuid())
        .bind(record.recorded_at)
        .bind(record.method.settled_via().as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("mark_split_paid", e))?
        .rows_affected();

        let outcome = if updated == 1 {
            let (intent_id, marked_by) = match &record.method {
                SettlementMethod::Processor { intent_id } => (Some(intent_id.as_str()), None),
                SettlementMethod::Manual { marked_by } => (None, Some(*marked_by.as_uuid())),
            };
            sqlx::query(
                r#"
                INSERT INTO vault_settlements (
                    id, trip_id, entry_id, split_id, payer_id, recipient_id,
                    amount_minor, currency, method, intent_id, marked_by, recorded_at,
                    charge_id, fee_minor, net_minor
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
            )
            .bind(record.id.as_uuid())
            .bind(record.trip_id.as_uuid())
            .bind(record.entry_id.as_uuid())
            .bind(record.split_id.as_uuid())
            .bind(record.payer_id.as_uuid())
            .bind(record.recipient_id.as_uuid())
            .bind(record.amount.amount_minor)
            .bind(record.amount.currency.as_str())
            .bind(record.method.settled_via().as_str())
            .bind(intent_id)
            .bind(marked_by)
            .bind(record.recorded_at)
            .bind(record.charge_id.as_deref())
            .bind(record.fee_minor)
            .bind(record.net_minor)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_settlement", e))?;
            CasOutcome::Applied
        } else {
            let exists = sqlx::query("SELECT 1 FROM vault_splits WHERE id = $1")
                .bind(record.split_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("check_split", e))?
                .is_some();
            if !exists {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(RepositoryError::NotFound(format!("split {}", record.split_id)));
            }
            CasOutcome::AlreadyPaid
        };

        if let Some(intent_id) = record.method.intent_id() {
            close_intent(&mut tx, intent_id, IntentStatus::Succeeded, None, record.recorded_at).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(outcome)
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn list_unpaid_splits_for_user(
        &self,
        user: UserId,
        trip_id: Option<TripId>,
    ) -> Result<Vec<UnpaidSplit>, RepositoryError> {
        let trip_param: Option<Uuid> = trip_id.map(|t| *t.as_uuid());
        let rows = sqlx::query(
            r#"
            SELECT s.id AS split_id, e.id AS entry_id, e.trip_id, e.description,
                   s.amount_minor, e.currency, e.paid_by, e.occurred_at, s.processor_payable
            FROM vault_splits s
            JOIN vault_entries e ON e.id = s.entry_id
            WHERE s.user_id = $1
                AND s.paid = FALSE
                AND s.processor_payable
                AND s.user_id <> e.paid_by
                AND ($2::uuid IS NULL OR e.trip_id = $2)
            ORDER BY e.occurred_at DESC, e.id ASC
            "#,
        )
        .bind(user.as_uuid())
        .bind(trip_param)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_unpaid_splits", e))?;

        rows.iter()
            .map(|row| {
                Ok(UnpaidSplit {
                    split_id: SplitId::from_uuid(get(row, "split_id")?),
                    entry_id: EntryId::from_uuid(get(row, "entry_id")?),
                    trip_id: TripId::from_uuid(get(row, "trip_id")?),
                    description: get(row, "description")?,
                    amount: money(get(row, "amount_minor")?, &get::<String>(row, "currency")?)?,
                    owed_to: UserId::from_uuid(get(row, "paid_by")?),
                    occurred_at: get(row, "occurred_at")?,
                    processor_payable: get(row, "processor_payable")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, intent), fields(intent_id = %intent.id, split_id = %intent.split_id), err)]
    async fn insert_intent(
        &self,
        intent: &PaymentIntentRecord,
        observed_latest: Option<&IntentId>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.begin().await?;

        // Row lock on the split serialises concurrent intent creation for it.
        let split = sqlx::query("SELECT paid FROM vault_splits WHERE id = $1 FOR UPDATE")
            .bind(intent.split_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_split", e))?;
        let Some(split) = split else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(RepositoryError::NotFound(format!("split {}", intent.split_id)));
        };

        let latest: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM vault_payment_intents
            WHERE split_id = $1
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(intent.split_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("latest_intent", e))?;

        let paid: bool = get(&split, "paid")?;
        if paid || latest.as_deref() != observed_latest.map(|id| id.as_str()) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO vault_payment_intents (
                id, split_id, trip_id, payer_id, recipient_id, amount_minor, currency,
                status, failure_message, created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(intent.id.as_str())
        .bind(intent.split_id.as_uuid())
        .bind(intent.trip_id.as_uuid())
        .bind(intent.payer_id.as_uuid())
        .bind(intent.recipient_id.as_uuid())
        .bind(intent.amount.amount_minor)
        .bind(intent.amount.currency.as_str())
        .bind(intent.status.as_str())
        .bind(&intent.failure_message)
        .bind(intent.created_at)
        .bind(intent.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_intent", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(true)
    }

    #[instrument(skip(self), fields(intent_id = %id), err)]
    async fn get_intent(&self, id: &IntentId) -> Result<Option<PaymentIntentRecord>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {INTENT_COLUMNS} FROM vault_payment_intents WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_intent", e))?;
        row.as_ref().map(intent_from_row).transpose()
    }

    #[instrument(skip(self), fields(split_id = %split_id), err)]
    async fn latest_intent_for_split(
        &self,
        split_id: SplitId,
    ) -> Result<Option<PaymentIntentRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS} FROM vault_payment_intents WHERE split_id = $1 ORDER BY created_at DESC, seq DESC LIMIT 1"
        ))
        .bind(split_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_intent_for_split", e))?;
        row.as_ref().map(intent_from_row).transpose()
    }

    #[instrument(skip(self, failure_message), fields(intent_id = %id, status = status.as_str()), err)]
    async fn update_intent_status(
        &self,
        id: &IntentId,
        status: IntentStatus,
        failure_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.begin().await?;
        let closed = close_intent(&mut tx, id, status, failure_message.as_deref(), at).await?;
        if !closed {
            let exists = sqlx::query("SELECT 1 FROM vault_payment_intents WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("check_intent", e))?
                .is_some();
            if !exists {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(RepositoryError::NotFound(format!("payment intent {id}")));
            }
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(closed)
    }

    #[instrument(skip(self), fields(trip_id = %trip_id), err)]
    async fn list_settlements(&self, trip_id: TripId) -> Result<Vec<SettlementRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, trip_id, entry_id, split_id, payer_id, recipient_id,
                   amount_minor, currency, method, intent_id, marked_by, recorded_at,
                   charge_id, fee_minor, net_minor
            FROM vault_settlements
            WHERE trip_id = $1
            ORDER BY recorded_at DESC, id ASC
            "#,
        )
        .bind(trip_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_settlements", e))?;

        rows.iter().map(settlement_from_row).collect()
    }

    #[instrument(skip(self), fields(trip_id = %trip_id), err)]
    async fn vault_leader(&self, trip_id: TripId) -> Result<Option<UserId>, RepositoryError> {
        let leader: Option<Uuid> = sqlx::query_scalar("SELECT leader_id FROM vault_leaders WHERE trip_id = $1")
            .bind(trip_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("vault_leader", e))?;
        Ok(leader.map(UserId::from_uuid))
    }

    #[instrument(skip(self), fields(trip_id = %trip_id, new_leader = %new_leader), err)]
    async fn replace_vault_leader(
        &self,
        trip_id: TripId,
        expected: Option<UserId>,
        new_leader: UserId,
    ) -> Result<bool, RepositoryError> {
        let now = Utc::now();
        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO vault_leaders (trip_id, leader_id, updated_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (trip_id) DO NOTHING
                    "#,
                )
                .bind(trip_id.as_uuid())
                .bind(new_leader.as_uuid())
                .bind(now)
                .execute(&*self.pool)
                .await
            }
            Some(previous) => {
                sqlx::query(
                    r#"
                    UPDATE vault_leaders
                    SET leader_id = $3, updated_at = $4
                    WHERE trip_id = $1 AND leader_id = $2
                    "#,
                )
                .bind(trip_id.as_uuid())
                .bind(previous.as_uuid())
                .bind(new_leader.as_uuid())
                .bind(now)
                .execute(&*self.pool)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("replace_vault_leader", e))?;

        Ok(result.rows_affected() == 1)
    }
}

async fn rollback<T>(tx: Transaction<'_, Postgres>, value: T) -> Result<T, RepositoryError> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))?;
    Ok(value)
}

/// CAS an intent out of `pending`. Returns whether a row changed.
async fn close_intent(
    tx: &mut Transaction<'_, Postgres>,
    id: &IntentId,
    status: IntentStatus,
    failure_message: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r#"
        UPDATE vault_payment_intents
        SET status = $2, failure_message = $3, completed_at = $4
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id.as_str())
    .bind(status.as_str())
    .bind(failure_message)
    .bind(at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("close_intent", e))?;
    Ok(result.rows_affected() == 1)
}

// Row mapping

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| RepositoryError::Storage(format!("failed to read column '{column}': {e}")))
}

fn money(amount_minor: i64, currency: &str) -> Result<Money, RepositoryError> {
    let currency = Currency::new(currency).map_err(|e| RepositoryError::Storage(e.to_string()))?;
    Ok(Money::new(amount_minor, currency))
}

fn corrupt(e: tripvault_core::VaultError) -> RepositoryError {
    RepositoryError::Storage(format!("corrupt row: {e}"))
}

fn entry_from_row(row: &PgRow) -> Result<VaultEntry, RepositoryError> {
    Ok(VaultEntry {
        id: EntryId::from_uuid(get(row, "id")?),
        trip_id: TripId::from_uuid(get(row, "trip_id")?),
        description: get(row, "description")?,
        amount: money(get(row, "amount_minor")?, &get::<String>(row, "currency")?)?,
        paid_by: UserId::from_uuid(get(row, "paid_by")?),
        category: get(row, "category")?,
        split_kind: SplitKind::parse(&get::<String>(row, "split_kind")?).map_err(corrupt)?,
        occurred_at: get(row, "occurred_at")?,
        created_at: get(row, "created_at")?,
        splits: Vec::new(),
    })
}

fn split_from_row(row: &PgRow) -> Result<VaultSplit, RepositoryError> {
    let settled_via = get::<Option<String>>(row, "settled_via")?
        .map(|s| SettledVia::parse(&s))
        .transpose()
        .map_err(corrupt)?;
    Ok(VaultSplit {
        id: SplitId::from_uuid(get(row, "id")?),
        entry_id: EntryId::from_uuid(get(row, "entry_id")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        amount_minor: get(row, "amount_minor")?,
        paid: get(row, "paid")?,
        paid_at: get(row, "paid_at")?,
        settled_via,
        processor_payable: get(row, "processor_payable")?,
    })
}

fn intent_from_row(row: &PgRow) -> Result<PaymentIntentRecord, RepositoryError> {
    Ok(PaymentIntentRecord {
        id: IntentId::new(get::<String>(row, "id")?),
        split_id: SplitId::from_uuid(get(row, "split_id")?),
        trip_id: TripId::from_uuid(get(row, "trip_id")?),
        payer_id: UserId::from_uuid(get(row, "payer_id")?),
        recipient_id: UserId::from_uuid(get(row, "recipient_id")?),
        amount: money(get(row, "amount_minor")?, &get::<String>(row, "currency")?)?,
        status: IntentStatus::parse(&get::<String>(row, "status")?).map_err(corrupt)?,
        failure_message: get(row, "failure_message")?,
        created_at: get(row, "created_at")?,
        completed_at: get(row, "completed_at")?,
    })
}

fn settlement_from_row(row: &PgRow) -> Result<SettlementRecord, RepositoryError> {
    let method = match SettledVia::parse(&get::<String>(row, "method")?).map_err(corrupt)? {
        SettledVia::Processor => SettlementMethod::Processor {
            intent_id: IntentId::new(
                get::<Option<String>>(row, "intent_id")?
                    .ok_or_else(|| RepositoryError::Storage("processor settlement without intent_id".into()))?,
            ),
        },
        SettledVia::Manual => SettlementMethod::Manual {
            marked_by: UserId::from_uuid(
                get::<Option<Uuid>>(row, "marked_by")?
                    .ok_or_else(|| RepositoryError::Storage("manual settlement without marked_by".into()))?,
            ),
        },
    };

    Ok(SettlementRecord {
        id: SettlementId::from_uuid(get(row, "id")?),
        trip_id: TripId::from_uuid(get(row, "trip_id")?),
        entry_id: EntryId::from_uuid(get(row, "entry_id")?),
        split_id: SplitId::from_uuid(get(row, "split_id")?),
        payer_id: UserId::from_uuid(get(row, "payer_id")?),
        recipient_id: UserId::from_uuid(get(row, "recipient_id")?),
        amount: money(get(row, "amount_minor")?, &get::<String>(row, "currency")?)?,
        method,
        recorded_at: get(row, "recorded_at")?,
        charge_id: get(row, "charge_id")?,
        fee_minor: get(row, "fee_minor")?,
        net_minor: get(row, "net_minor")?,
    })
}

/// Map SQLx errors to `RepositoryError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => RepositoryError::Conflict(msg),
                Some("23503") => RepositoryError::NotFound(msg),
                _ => RepositoryError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => RepositoryError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripvault_vault::{ChargeDetails, NewEntry, SplitMode};

    /// Runs only when `TRIPVAULT_TEST_DATABASE_URL` points at a scratch database.
    async fn repository() -> Option<PostgresVaultRepository> {
        let url = std::env::var("TRIPVAULT_TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("connect to test database");
        let repo = PostgresVaultRepository::new(pool);
        repo.ensure_schema().await.expect("apply schema");
        Some(repo)
    }

    fn entry(trip_id: TripId, payer: UserId, other: UserId, processor_payable: bool) -> VaultEntry {
        NewEntry {
            trip_id,
            description: "Ferry".to_string(),
            amount: Money::new(6000, Currency::usd()),
            paid_by: payer,
            category: None,
            occurred_at: None,
            split: SplitMode::Equal {
                participants: vec![payer, other],
            },
            processor_payable,
        }
        .build(Utc::now())
        .unwrap()
    }

    #[tokio::test]
    async fn snapshot_reads_and_processor_columns_round_trip() {
        let Some(repo) = repository().await else {
            return;
        };
        let trip = TripId::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        let card = repo.create_entry_with_splits(entry(trip, alice, bob, true)).await.unwrap();
        let cash = repo.create_entry_with_splits(entry(trip, alice, bob, false)).await.unwrap();

        let listed = repo.list_entries(trip).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|e| e.splits.len() == 2));
        let listed_cash = listed.iter().find(|e| e.id == cash.id).unwrap();
        assert!(listed_cash.splits.iter().all(|s| !s.processor_payable));

        let unpaid = repo.list_unpaid_splits_for_user(bob, Some(trip)).await.unwrap();
        assert_eq!(unpaid.len(), 1);
        assert_eq!(unpaid[0].entry_id, card.id);

        let split = card.splits.iter().find(|s| s.user_id == bob).unwrap();
        let intent = PaymentIntentRecord {
            id: IntentId::new(format!("pi_{}", Uuid::now_v7())),
            split_id: split.id,
            trip_id: trip,
            payer_id: bob,
            recipient_id: alice,
            amount: card.split_amount(split),
            status: IntentStatus::Pending,
            failure_message: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        assert!(repo.insert_intent(&intent, None).await.unwrap());

        let charge = ChargeDetails {
            charge_id: Some("ch_pg_1".to_string()),
            fee_minor: Some(117),
        };
        let record = SettlementRecord::for_processor(&card, split, intent.id.clone(), &charge, Utc::now());
        assert_eq!(repo.set_split_paid_if_unpaid(&record).await.unwrap(), CasOutcome::Applied);

        let history = repo.list_settlements(trip).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].charge_id.as_deref(), Some("ch_pg_1"));
        assert_eq!(history[0].fee_minor, Some(117));
        assert_eq!(history[0].net_minor, Some(2883));

        assert_eq!(
            repo.delete_entry(card.id, Utc::now()).await.unwrap(),
            DeleteOutcome::HasPaidSplits
        );
        assert_eq!(repo.delete_entry(cash.id, Utc::now()).await.unwrap(), DeleteOutcome::Deleted);
    }
}
