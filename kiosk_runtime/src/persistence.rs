//! Transaction and WAL persistence against SQLite via `sqlx`, standing in
//! for the source's `aiosqlite`/SQLAlchemy-async engine (§6).
//!
//! Uses the runtime-checked `sqlx::query`/`query_as` API rather than the
//! compile-time-checked `query!` family: the latter needs a live database or
//! a checked-in `.sqlx` metadata cache at build time, neither of which this
//! crate carries.

use chrono::{DateTime, Utc};
use kiosk_core::transaction::{DispensePlan, DispenseResult, TransactionRecord, TransactionType, TxState};
use kiosk_core::wal::{WalEntry, WalStatus};
use sqlx::sqlite::{SqlitePoolOptions, SqliteConnectOptions};
use sqlx::{FromRow, Row, SqlitePool};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("failed to decode persisted JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to decode persisted timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Owns the connection pool and both tables described in §6.
#[derive(Clone)]
pub struct PersistenceStore {
    pool: SqlitePool,
}

impl PersistenceStore {
    /// Open (creating if missing) the SQLite database at `db_url` and ensure
    /// both tables exist.
    pub async fn connect(db_url: &str) -> PersistenceResult<Self> {
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> PersistenceResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                tx_type TEXT NOT NULL,
                state TEXT NOT NULL,
                target_amount INTEGER NOT NULL,
                fee INTEGER NOT NULL,
                total_due INTEGER NOT NULL,
                inserted_amount INTEGER NOT NULL,
                dispensed_amount INTEGER NOT NULL,
                inserted_denominations TEXT NOT NULL,
                selected_dispense_denoms TEXT NOT NULL,
                dispense_plan TEXT,
                dispense_result TEXT,
                error_code TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS wal_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id TEXT NOT NULL,
                action TEXT NOT NULL,
                data TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_transaction(&self, record: &TransactionRecord) -> PersistenceResult<()> {
        let row = TransactionRow::try_from(record)?;
        sqlx::query(
            r"
            INSERT INTO transactions (
                id, tx_type, state, target_amount, fee, total_due, inserted_amount,
                dispensed_amount, inserted_denominations, selected_dispense_denoms,
                dispense_plan, dispense_result, error_code, error_message,
                created_at, updated_at, completed_at
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            ",
        )
        .bind(row.id)
        .bind(row.tx_type)
        .bind(row.state)
        .bind(row.target_amount)
        .bind(row.fee)
        .bind(row.total_due)
        .bind(row.inserted_amount)
        .bind(row.dispensed_amount)
        .bind(row.inserted_denominations)
        .bind(row.selected_dispense_denoms)
        .bind(row.dispense_plan)
        .bind(row.dispense_result)
        .bind(row.error_code)
        .bind(row.error_message)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_transaction(&self, record: &TransactionRecord) -> PersistenceResult<()> {
        let row = TransactionRow::try_from(record)?;
        sqlx::query(
            r"
            UPDATE transactions SET
                state=?, target_amount=?, fee=?, total_due=?, inserted_amount=?,
                dispensed_amount=?, inserted_denominations=?, selected_dispense_denoms=?,
                dispense_plan=?, dispense_result=?, error_code=?, error_message=?,
                updated_at=?, completed_at=?
            WHERE id=?
            ",
        )
        .bind(row.state)
        .bind(row.target_amount)
        .bind(row.fee)
        .bind(row.total_due)
        .bind(row.inserted_amount)
        .bind(row.dispensed_amount)
        .bind(row.inserted_denominations)
        .bind(row.selected_dispense_denoms)
        .bind(row.dispense_plan)
        .bind(row.dispense_result)
        .bind(row.error_code)
        .bind(row.error_message)
        .bind(row.updated_at)
        .bind(row.completed_at)
        .bind(row.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_transaction(&self, id: &str) -> PersistenceResult<Option<TransactionRecord>> {
        let row = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TransactionRecord::try_from).transpose()
    }

    /// Transactions currently in a non-terminal state; at most one is
    /// expected to exist given the single-active-transaction invariant, but
    /// this does not itself enforce that.
    pub async fn active_transactions(&self) -> PersistenceResult<Vec<TransactionRecord>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE state NOT IN (?, ?, ?)",
        )
        .bind(state_to_text(TxState::Complete))
        .bind(state_to_text(TxState::Cancelled))
        .bind(state_to_text(TxState::Error))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TransactionRecord::try_from).collect()
    }

    pub async fn append_wal(
        &self,
        transaction_id: &str,
        action: &str,
        data: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO wal_entries (transaction_id, action, data, status, created_at) VALUES (?,?,?,?,?)",
        )
        .bind(transaction_id)
        .bind(action)
        .bind(serde_json::to_string(data)?)
        .bind(status_to_text(WalStatus::Pending))
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn mark_wal_status(&self, id: i64, status: WalStatus) -> PersistenceResult<()> {
        sqlx::query("UPDATE wal_entries SET status = ? WHERE id = ?")
            .bind(status_to_text(status))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn pending_wal_entries(&self) -> PersistenceResult<Vec<WalEntry>> {
        let rows = sqlx::query("SELECT * FROM wal_entries WHERE status = ?")
            .bind(status_to_text(WalStatus::Pending))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(wal_entry_from_row).collect()
    }
}

fn state_to_text(state: TxState) -> String {
    serde_json::to_string(&state).unwrap_or_else(|_| "\"ERROR\"".to_string())
}

fn status_to_text(status: WalStatus) -> String {
    serde_json::to_string(&status).unwrap_or_else(|_| "\"PENDING\"".to_string())
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc))
}

fn wal_entry_from_row(row: sqlx::sqlite::SqliteRow) -> PersistenceResult<WalEntry> {
    let status_text: String = row.try_get("status")?;
    let created_at_text: String = row.try_get("created_at")?;
    let data_text: String = row.try_get("data")?;
    Ok(WalEntry {
        id: row.try_get("id")?,
        transaction_id: row.try_get("transaction_id")?,
        action: row.try_get("action")?,
        data: serde_json::from_str(&data_text)?,
        status: serde_json::from_str(&status_text)?,
        created_at: parse_timestamp(&created_at_text)?,
    })
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: String,
    tx_type: String,
    state: String,
    target_amount: i64,
    fee: i64,
    total_due: i64,
    inserted_amount: i64,
    dispensed_amount: i64,
    inserted_denominations: String,
    selected_dispense_denoms: String,
    dispense_plan: Option<String>,
    dispense_result: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TryFrom<&TransactionRecord> for TransactionRow {
    type Error = serde_json::Error;

    fn try_from(record: &TransactionRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id.clone(),
            tx_type: serde_json::to_string(&record.tx_type)?,
            state: serde_json::to_string(&record.state)?,
            target_amount: i64::from(record.target_amount),
            fee: i64::from(record.fee),
            total_due: i64::from(record.total_due),
            inserted_amount: i64::from(record.inserted_amount),
            dispensed_amount: i64::from(record.dispensed_amount),
            inserted_denominations: serde_json::to_string(&record.inserted_denominations)?,
            selected_dispense_denoms: serde_json::to_string(&record.selected_dispense_denoms)?,
            dispense_plan: record.dispense_plan.as_ref().map(serde_json::to_string).transpose()?,
            dispense_result: record.dispense_result.as_ref().map(serde_json::to_string).transpose()?,
            error_code: record.error_code.clone(),
            error_message: record.error_message.clone(),
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
            completed_at: record.completed_at.map(|dt| dt.to_rfc3339()),
        })
    }
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = PersistenceError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tx_type: serde_json::from_str::<TransactionType>(&row.tx_type)?,
            state: serde_json::from_str::<TxState>(&row.state)?,
            target_amount: u32::try_from(row.target_amount).unwrap_or(0),
            fee: u32::try_from(row.fee).unwrap_or(0),
            total_due: u32::try_from(row.total_due).unwrap_or(0),
            inserted_amount: u32::try_from(row.inserted_amount).unwrap_or(0),
            dispensed_amount: u32::try_from(row.dispensed_amount).unwrap_or(0),
            inserted_denominations: serde_json::from_str(&row.inserted_denominations)?,
            selected_dispense_denoms: serde_json::from_str(&row.selected_dispense_denoms)?,
            dispense_plan: row
                .dispense_plan
                .as_deref()
                .map(serde_json::from_str::<DispensePlan>)
                .transpose()?,
            dispense_result: row
                .dispense_result
                .as_deref()
                .map(serde_json::from_str::<DispenseResult>)
                .transpose()?,
            error_code: row.error_code,
            error_message: row.error_message,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            completed_at: row.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kiosk_core::wal::transition_action;

    async fn store() -> PersistenceStore {
        PersistenceStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn round_trips_a_transaction_record() {
        let store = store().await;
        let record = TransactionRecord::new(
            "tx-1".to_string(),
            TransactionType::BillToBill,
            200,
            0,
            vec![100],
            Utc::now(),
        );
        store.insert_transaction(&record).await.unwrap();
        let fetched = store.get_transaction("tx-1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "tx-1");
        assert_eq!(fetched.tx_type, TransactionType::BillToBill);
        assert_eq!(fetched.state, TxState::Idle);
        assert_eq!(fetched.total_due, 200);
    }

    #[tokio::test]
    async fn update_persists_state_transition() {
        let store = store().await;
        let mut record = TransactionRecord::new(
            "tx-2".to_string(),
            TransactionType::BillToBill,
            100,
            0,
            vec![],
            Utc::now(),
        );
        store.insert_transaction(&record).await.unwrap();
        record.state = TxState::WaitingForBill;
        record.updated_at = Utc::now();
        store.update_transaction(&record).await.unwrap();
        let fetched = store.get_transaction("tx-2").await.unwrap().unwrap();
        assert_eq!(fetched.state, TxState::WaitingForBill);
    }

    #[tokio::test]
    async fn wal_append_and_mark_round_trips() {
        let store = store().await;
        let action = transition_action(TxState::Dispensing, TxState::Complete);
        let id = store
            .append_wal("tx-3", &action, &serde_json::json!({}), Utc::now())
            .await
            .unwrap();
        let pending = store.pending_wal_entries().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);

        store.mark_wal_status(id, WalStatus::RolledBack).await.unwrap();
        let pending = store.pending_wal_entries().await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn active_transactions_excludes_terminal_states() {
        let store = store().await;
        let mut terminal = TransactionRecord::new(
            "tx-done".to_string(),
            TransactionType::BillToBill,
            100,
            0,
            vec![],
            Utc::now(),
        );
        terminal.state = TxState::Complete;
        store.insert_transaction(&terminal).await.unwrap();

        let active = TransactionRecord::new(
            "tx-active".to_string(),
            TransactionType::BillToBill,
            100,
            0,
            vec![],
            Utc::now(),
        );
        store.insert_transaction(&active).await.unwrap();

        let found = store.active_transactions().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "tx-active");
    }
}
