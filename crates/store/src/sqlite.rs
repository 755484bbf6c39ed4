use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tracing::info;

use common::{LedgerAction, LedgerEntry, LedgerSink, Result};

use crate::files::{format_timestamp, parse_timestamp};

/// Open (creating if needed) the database at `url` and apply migrations.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    // Each in-memory connection is a separate database.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(sqlx::Error::from)?;
    info!(url, "Database ready");
    Ok(pool)
}

#[derive(FromRow)]
struct LedgerRow {
    datetime: String,
    action: LedgerAction,
    buy_price: f64,
    sell_price: f64,
    quantity: f64,
    pnl_percent: f64,
    pnl_sum: f64,
    balance: f64,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = common::Error;

    fn try_from(row: LedgerRow) -> Result<Self> {
        Ok(LedgerEntry {
            timestamp: parse_timestamp(&row.datetime)?,
            action: row.action,
            buy_price: row.buy_price,
            sell_price: row.sell_price,
            quantity: row.quantity,
            pnl_percent: row.pnl_percent,
            pnl_sum: row.pnl_sum,
            balance: row.balance,
        })
    }
}

const INSERT: &str = r#"
    INSERT INTO ledger
        (run, datetime, action, buy_price, sell_price, quantity, pnl_percent, pnl_sum, balance)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
"#;

async fn insert<'e, E>(executor: E, run: &str, entry: &LedgerEntry) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(INSERT)
        .bind(run)
        .bind(format_timestamp(entry.timestamp))
        .bind(entry.action)
        .bind(entry.buy_price)
        .bind(entry.sell_price)
        .bind(entry.quantity)
        .bind(entry.pnl_percent)
        .bind(entry.pnl_sum)
        .bind(entry.balance)
        .execute(executor)
        .await?;
    Ok(())
}

/// Replace the stored rows of `run` with `entries` in one transaction.
pub async fn save_ledger(pool: &SqlitePool, run: &str, entries: &[LedgerEntry]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM ledger WHERE run = ?1")
        .bind(run)
        .execute(&mut *tx)
        .await?;
    for entry in entries {
        insert(&mut *tx, run, entry).await?;
    }
    tx.commit().await?;
    info!(run, rows = entries.len(), "Saved ledger");
    Ok(())
}

/// Rows of `run` in the order they were recorded.
pub async fn load_ledger(pool: &SqlitePool, run: &str) -> Result<Vec<LedgerEntry>> {
    let rows: Vec<LedgerRow> = sqlx::query_as(
        r#"
        SELECT datetime, action, buy_price, sell_price, quantity, pnl_percent, pnl_sum, balance
        FROM ledger
        WHERE run = ?1
        ORDER BY id
        "#,
    )
    .bind(run)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(LedgerEntry::try_from).collect()
}

/// Appends each ledger row to the `ledger` table under one run name.
#[derive(Clone)]
pub struct SqliteLedgerSink {
    pool: SqlitePool,
    run: String,
}

impl SqliteLedgerSink {
    pub fn new(pool: SqlitePool, run: impl Into<String>) -> Self {
        Self {
            pool,
            run: run.into(),
        }
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerSink for SqliteLedgerSink {
    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        insert(&self.pool, &self.run, entry).await
    }
}
