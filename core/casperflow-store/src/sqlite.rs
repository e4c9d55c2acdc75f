//! SQLite-backed store.
//!
//! One connection behind a mutex; every read-check-write runs inside an
//! immediate transaction, so transitions are linearizable per record.

use crate::error::{StoreError, StoreResult};
use crate::transition::{
    RecordRef, Transition, apply_cancel_renewal, apply_extend, apply_renewal, check_pending,
};
use crate::SubscriptionStore;
use casperflow_types::{Identity, PlanId, SubscriptionRecord, SubscriptionState};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const COLUMNS: &str = "api_key, subscriber, plan_id, state, activated_at, expires_at, \
     transaction_id, renewal_transaction_id, failure_reason, created_at, updated_at";

/// Persistent subscription store backed by SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StoreError::Storage(format!("failed to open subscription store: {e}")))?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StoreError::Storage(format!("failed to open in-memory subscription store: {e}"))
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS subscriptions (
                api_key TEXT PRIMARY KEY,
                subscriber TEXT NOT NULL,
                plan_id TEXT NOT NULL,
                state TEXT NOT NULL,
                activated_at TEXT,
                expires_at TEXT,
                transaction_id TEXT UNIQUE,
                renewal_transaction_id TEXT UNIQUE,
                failure_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_subscriptions_state ON subscriptions(state);
            CREATE INDEX IF NOT EXISTS idx_subscriptions_subscriber ON subscriptions(subscriber);
            ",
        )
        .map_err(|e| StoreError::Storage(format!("failed to init subscription schema: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Storage("connection lock poisoned".to_string()))
    }

    /// Runs a read-check-write against one record inside a transaction.
    fn update(
        &self,
        target: RecordRef<'_>,
        change: impl FnOnce(&mut SubscriptionRecord) -> StoreResult<()>,
    ) -> StoreResult<SubscriptionRecord> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage("begin transaction"))?;

        let mut record =
            select_one(&tx, target)?.ok_or_else(|| StoreError::NotFound(target.to_string()))?;
        change(&mut record)?;
        write_back(&tx, &record)?;

        tx.commit().map_err(storage("commit transaction"))?;
        Ok(record)
    }

    fn select_many(
        &self,
        clause: &str,
        value: &str,
    ) -> StoreResult<Vec<SubscriptionRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM subscriptions WHERE {clause} = ?1 ORDER BY created_at, api_key"
        );
        let mut stmt = conn.prepare(&sql).map_err(storage("prepare list query"))?;
        let rows = stmt
            .query_map(params![value], record_from_row)
            .map_err(storage("list subscriptions"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(storage("read subscription row"))
    }
}

fn storage(context: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |e| StoreError::Storage(format!("failed to {context}: {e}"))
}

fn select_one(
    conn: &Connection,
    target: RecordRef<'_>,
) -> StoreResult<Option<SubscriptionRecord>> {
    let (sql, value) = match target {
        RecordRef::ApiKey(key) => (
            format!("SELECT {COLUMNS} FROM subscriptions WHERE api_key = ?1"),
            key,
        ),
        RecordRef::Transaction(tx) => (
            format!(
                "SELECT {COLUMNS} FROM subscriptions \
                 WHERE transaction_id = ?1 OR renewal_transaction_id = ?1"
            ),
            tx,
        ),
    };
    conn.query_row(&sql, params![value], record_from_row)
        .optional()
        .map_err(storage("load subscription"))
}

/// Whether a record other than `except_key` tracks `transaction_id`.
fn transaction_taken(
    conn: &Connection,
    transaction_id: &str,
    except_key: Option<&str>,
) -> StoreResult<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM subscriptions \
         WHERE (transaction_id = ?1 OR renewal_transaction_id = ?1) \
         AND (?2 IS NULL OR api_key != ?2))",
        params![transaction_id, except_key],
        |row| row.get(0),
    )
    .map_err(storage("check transaction"))
}

fn write_back(tx: &Transaction<'_>, record: &SubscriptionRecord) -> StoreResult<()> {
    tx.execute(
        "UPDATE subscriptions SET state = ?2, activated_at = ?3, expires_at = ?4, \
         renewal_transaction_id = ?5, failure_reason = ?6, updated_at = ?7 WHERE api_key = ?1",
        params![
            record.api_key,
            record.state.as_str(),
            record.activated_at.map(|t| t.to_rfc3339()),
            record.expires_at.map(|t| t.to_rfc3339()),
            record.renewal_transaction_id,
            record.failure_reason,
            record.updated_at.to_rfc3339(),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::DuplicateTransaction(
                record.renewal_transaction_id.clone().unwrap_or_default(),
            )
        }
        other => storage("update subscription")(other),
    })?;
    Ok(())
}

fn text<T, E>(idx: usize, value: String, parse: impl FnOnce(&str) -> Result<T, E>) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    parse(&value).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    text(idx, value, |s| {
        DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
    })
}

fn opt_timestamp(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| timestamp(idx, v)).transpose()
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SubscriptionRecord> {
    Ok(SubscriptionRecord {
        api_key: row.get(0)?,
        subscriber: text(1, row.get(1)?, Identity::parse)?,
        plan_id: text(2, row.get(2)?, PlanId::parse)?,
        state: text(3, row.get(3)?, SubscriptionState::from_str)?,
        activated_at: opt_timestamp(4, row.get(4)?)?,
        expires_at: opt_timestamp(5, row.get(5)?)?,
        transaction_id: row.get(6)?,
        renewal_transaction_id: row.get(7)?,
        failure_reason: row.get(8)?,
        created_at: timestamp(9, row.get(9)?)?,
        updated_at: timestamp(10, row.get(10)?)?,
    })
}

impl SubscriptionStore for SqliteStore {
    fn put_pending(&self, record: SubscriptionRecord) -> StoreResult<()> {
        check_pending(&record)?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage("begin transaction"))?;

        let key_taken: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE api_key = ?1)",
                params![record.api_key],
                |row| row.get(0),
            )
            .map_err(storage("check api key"))?;
        if key_taken {
            return Err(StoreError::DuplicateKey(record.redacted_key()));
        }
        if let Some(tx_id) = &record.transaction_id {
            if transaction_taken(&tx, tx_id, None)? {
                return Err(StoreError::DuplicateTransaction(tx_id.clone()));
            }
        }

        tx.execute(
            &format!(
                "INSERT INTO subscriptions ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                record.api_key,
                record.subscriber.to_hex(),
                record.plan_id.as_str(),
                record.state.as_str(),
                record.activated_at.map(|t| t.to_rfc3339()),
                record.expires_at.map(|t| t.to_rfc3339()),
                record.transaction_id,
                record.renewal_transaction_id,
                record.failure_reason,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .map_err(storage("insert subscription"))?;
        tx.commit().map_err(storage("commit transaction"))?;

        debug!(key = %record.redacted_key(), plan = %record.plan_id, "stored pending subscription");
        Ok(())
    }

    fn transition(
        &self,
        target: RecordRef<'_>,
        transition: Transition,
    ) -> StoreResult<SubscriptionRecord> {
        let record = self.update(target, |r| transition.apply(r))?;
        debug!(%target, to = %record.state, "subscription transitioned");
        Ok(record)
    }

    fn extend(
        &self,
        api_key: &str,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord> {
        self.update(RecordRef::ApiKey(api_key), |r| apply_extend(r, expires_at, at))
    }

    fn begin_renewal(
        &self,
        api_key: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage("begin transaction"))?;

        if transaction_taken(&tx, transaction_id, Some(api_key))? {
            return Err(StoreError::DuplicateTransaction(transaction_id.to_string()));
        }
        let target = RecordRef::ApiKey(api_key);
        let mut record =
            select_one(&tx, target)?.ok_or_else(|| StoreError::NotFound(target.to_string()))?;
        apply_renewal(&mut record, transaction_id, at)?;
        write_back(&tx, &record)?;

        tx.commit().map_err(storage("commit transaction"))?;
        Ok(record)
    }

    fn cancel_renewal(
        &self,
        api_key: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord> {
        self.update(RecordRef::ApiKey(api_key), |r| {
            apply_cancel_renewal(r, transaction_id, at)
        })
    }

    fn get(&self, api_key: &str) -> StoreResult<Option<SubscriptionRecord>> {
        let conn = self.lock()?;
        select_one(&conn, RecordRef::ApiKey(api_key))
    }

    fn find_by_transaction(&self, transaction_id: &str) -> StoreResult<Option<SubscriptionRecord>> {
        let conn = self.lock()?;
        select_one(&conn, RecordRef::Transaction(transaction_id))
    }

    fn list_by_state(&self, state: SubscriptionState) -> StoreResult<Vec<SubscriptionRecord>> {
        self.select_many("state", state.as_str())
    }

    fn list_by_subscriber(&self, subscriber: &Identity) -> StoreResult<Vec<SubscriptionRecord>> {
        self.select_many("subscriber", &subscriber.to_hex())
    }
}
