use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

use crate::errors::CoreError;
use crate::models::price::{PricePoint, SyncReport, SyncRun, SyncStatus};

use super::database::{decode, Database};

const PRICE_COLUMNS: &str = "symbol, date, open, high, low, close, volume";

/// Durable store of daily OHLCV points, unique per `(symbol, date)`.
#[derive(Debug, Clone)]
pub struct PriceRepository {
    db: Arc<Database>,
}

fn price_from_row(row: &Row<'_>) -> rusqlite::Result<PricePoint> {
    Ok(PricePoint {
        symbol: row.get(0)?,
        date: row.get(1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        volume: row.get(6)?,
    })
}

impl PriceRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or overwrite the point for `(symbol, date)`.
    ///
    /// Fails with `Database` when a CHECK constraint rejects the row
    /// (negative prices, `high < low`, negative volume).
    pub fn upsert(&self, point: &PricePoint) -> Result<(), CoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO price_points (symbol, date, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(symbol, date) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    updated_at = datetime('now')",
                params![
                    point.symbol,
                    point.date,
                    point.open,
                    point.high,
                    point.low,
                    point.close,
                    point.volume
                ],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, symbol: &str, date: NaiveDate) -> Result<Option<PricePoint>, CoreError> {
        self.db.with_conn(|conn| {
            let point = conn
                .query_row(
                    &format!("SELECT {PRICE_COLUMNS} FROM price_points WHERE symbol = ?1 AND date = ?2"),
                    params![symbol, date],
                    price_from_row,
                )
                .optional()?;
            Ok(point)
        })
    }

    /// Points for `symbol` with `from <= date <= to`, oldest first.
    pub fn range(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PricePoint>, CoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PRICE_COLUMNS} FROM price_points
                 WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date"
            ))?;
            let points = stmt
                .query_map(params![symbol, from, to], price_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(points)
        })
    }

    /// Most recent stored point for `symbol`.
    pub fn latest(&self, symbol: &str) -> Result<Option<PricePoint>, CoreError> {
        self.db.with_conn(|conn| {
            let point = conn
                .query_row(
                    &format!(
                        "SELECT {PRICE_COLUMNS} FROM price_points WHERE symbol = ?1
                         ORDER BY date DESC LIMIT 1"
                    ),
                    [symbol],
                    price_from_row,
                )
                .optional()?;
            Ok(point)
        })
    }

    pub fn count(&self, symbol: &str) -> Result<usize, CoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM price_points WHERE symbol = ?1",
                [symbol],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Highest high and lowest low over `[from, to]`, if any points exist.
    pub fn high_low(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Option<(f64, f64)>, CoreError> {
        self.db.with_conn(|conn| {
            let (high, low): (Option<f64>, Option<f64>) = conn.query_row(
                "SELECT MAX(high), MIN(low) FROM price_points
                 WHERE symbol = ?1 AND date >= ?2 AND date <= ?3",
                params![symbol, from, to],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(high.zip(low))
        })
    }

    /// Remove every point for `symbol`; returns the number of rows deleted.
    pub fn delete_symbol(&self, symbol: &str) -> Result<usize, CoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM price_points WHERE symbol = ?1", [symbol])?)
        })
    }

    // ── Sync history ────────────────────────────────────────────────

    /// Persist the outcome of a sync request.
    pub fn record_sync_run(&self, report: &SyncReport, error: Option<&str>) -> Result<i64, CoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_runs
                    (symbol, market, from_date, to_date, status, provider, rows_written, error, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    report.symbol,
                    report.market.as_str(),
                    report.from,
                    report.to,
                    report.status.as_str(),
                    report.provider,
                    report.written as i64,
                    error,
                    Utc::now()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Sync history for `symbol`, newest first.
    pub fn sync_runs(&self, symbol: &str, limit: usize) -> Result<Vec<SyncRun>, CoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, symbol, market, from_date, to_date, status, provider, rows_written,
                        error, finished_at
                 FROM sync_runs WHERE symbol = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let runs = stmt
                .query_map(params![symbol, limit as i64], |row| {
                    Ok(SyncRun {
                        id: row.get(0)?,
                        symbol: row.get(1)?,
                        market: decode(row, 2, str::parse)?,
                        from: row.get(3)?,
                        to: row.get(4)?,
                        status: decode(row, 5, SyncStatus::parse)?,
                        provider: row.get(6)?,
                        rows_written: row.get::<_, i64>(7)? as usize,
                        error: row.get(8)?,
                        finished_at: row.get(9)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
    }
}
