use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tracing::info;

use crate::errors::CoreError;
use crate::models::asset::{normalize_symbol, AssetMeta, Market, NewAsset};

use super::database::{decode, Database};

const ASSET_COLUMNS: &str =
    "id, symbol, market, asset_type, name, latest_price, price_updated_at";

/// Tracked instruments, unique per `(symbol, market)`.
#[derive(Debug, Clone)]
pub struct AssetRepository {
    db: Arc<Database>,
}

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<AssetMeta> {
    Ok(AssetMeta {
        id: row.get(0)?,
        symbol: row.get(1)?,
        market: decode(row, 2, str::parse)?,
        asset_type: decode(row, 3, str::parse)?,
        name: row.get(4)?,
        latest_price: row.get(5)?,
        price_updated_at: row.get(6)?,
    })
}

pub(crate) fn find_in(
    conn: &Connection,
    symbol: &str,
    market: Market,
) -> Result<Option<AssetMeta>, CoreError> {
    let asset = conn
        .query_row(
            &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE symbol = ?1 AND market = ?2"),
            params![normalize_symbol(symbol), market.as_str()],
            asset_from_row,
        )
        .optional()?;
    Ok(asset)
}

/// Insert the asset if `(symbol, market)` is new, then return the stored row.
pub(crate) fn ensure_in(conn: &Connection, asset: &NewAsset) -> Result<AssetMeta, CoreError> {
    let inserted = conn.execute(
        "INSERT INTO assets (symbol, market, asset_type, name) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(symbol, market) DO NOTHING",
        params![
            asset.symbol,
            asset.market.as_str(),
            asset.asset_type.as_str(),
            asset.name
        ],
    )?;
    if inserted > 0 {
        info!(symbol = %asset.symbol, market = %asset.market, "Tracking new asset");
    }
    find_in(conn, &asset.symbol, asset.market)?
        .ok_or_else(|| CoreError::NotFound(format!("asset {} ({})", asset.symbol, asset.market)))
}

impl AssetRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create-on-first-reference.
    pub fn ensure(&self, asset: &NewAsset) -> Result<AssetMeta, CoreError> {
        self.db.with_conn(|conn| ensure_in(conn, asset))
    }

    /// Insert the asset, or set type and name of the existing `(symbol, market)` row.
    ///
    /// Cached prices, positions and links are untouched.
    pub fn track(&self, asset: &NewAsset) -> Result<AssetMeta, CoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO assets (symbol, market, asset_type, name) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(symbol, market) DO UPDATE
                 SET asset_type = excluded.asset_type, name = excluded.name",
                params![
                    asset.symbol,
                    asset.market.as_str(),
                    asset.asset_type.as_str(),
                    asset.name
                ],
            )?;
            info!(symbol = %asset.symbol, market = %asset.market, asset_type = %asset.asset_type, "Tracking asset");
            find_in(conn, &asset.symbol, asset.market)?.ok_or_else(|| {
                CoreError::NotFound(format!("asset {} ({})", asset.symbol, asset.market))
            })
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<AssetMeta>, CoreError> {
        self.db.with_conn(|conn| {
            let asset = conn
                .query_row(
                    &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ?1"),
                    [id],
                    asset_from_row,
                )
                .optional()?;
            Ok(asset)
        })
    }

    pub fn find(&self, symbol: &str, market: Market) -> Result<Option<AssetMeta>, CoreError> {
        self.db.with_conn(|conn| find_in(conn, symbol, market))
    }

    /// Every market listing of `symbol`.
    pub fn find_by_symbol(&self, symbol: &str) -> Result<Vec<AssetMeta>, CoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ASSET_COLUMNS} FROM assets WHERE symbol = ?1 ORDER BY market"
            ))?;
            let assets = stmt
                .query_map([normalize_symbol(symbol)], asset_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(assets)
        })
    }

    /// Case-insensitive match on symbol prefix or name substring.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<AssetMeta>, CoreError> {
        let query = query.trim();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ASSET_COLUMNS} FROM assets
                 WHERE symbol LIKE ?1 || '%' OR name LIKE '%' || ?2 || '%'
                 ORDER BY symbol = ?1 DESC, symbol
                 LIMIT ?3"
            ))?;
            let assets = stmt
                .query_map(
                    params![normalize_symbol(query), query, limit as i64],
                    asset_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(assets)
        })
    }

    pub fn list(&self) -> Result<Vec<AssetMeta>, CoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {ASSET_COLUMNS} FROM assets ORDER BY symbol, market"))?;
            let assets = stmt
                .query_map([], asset_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(assets)
        })
    }

    pub fn rename(&self, id: i64, name: &str) -> Result<(), CoreError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute("UPDATE assets SET name = ?1 WHERE id = ?2", params![name, id])?;
            if updated == 0 {
                return Err(CoreError::NotFound(format!("asset {id}")));
            }
            Ok(())
        })
    }

    /// Cache a price observed at `at`. Older observations never overwrite newer ones.
    ///
    /// Returns whether the cached price changed.
    pub fn update_latest_price(&self, id: i64, price: f64, at: DateTime<Utc>) -> Result<bool, CoreError> {
        if !price.is_finite() || price < 0.0 {
            return Err(CoreError::ValidationError(format!("Invalid price {price}")));
        }
        self.db.with_conn(|conn| {
            let current: Option<Option<DateTime<Utc>>> = conn
                .query_row("SELECT price_updated_at FROM assets WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            match current {
                None => Err(CoreError::NotFound(format!("asset {id}"))),
                Some(Some(existing)) if existing > at => Ok(false),
                Some(_) => {
                    conn.execute(
                        "UPDATE assets SET latest_price = ?1, price_updated_at = ?2 WHERE id = ?3",
                        params![price, at, id],
                    )?;
                    Ok(true)
                }
            }
        })
    }

    /// Delete an asset. Refused while any position references it.
    pub fn delete(&self, id: i64) -> Result<(), CoreError> {
        self.db.with_conn(|conn| {
            let holders: i64 = conn.query_row(
                "SELECT COUNT(*) FROM positions WHERE asset_id = ?1",
                [id],
                |row| row.get(0),
            )?;
            if holders > 0 {
                return Err(CoreError::ValidationError(format!(
                    "Asset {id} is referenced by {holders} position(s) and cannot be deleted"
                )));
            }
            let deleted = conn.execute("DELETE FROM assets WHERE id = ?1", [id])?;
            if deleted == 0 {
                return Err(CoreError::NotFound(format!("asset {id}")));
            }
            info!(asset_id = id, "Deleted asset");
            Ok(())
        })
    }
}
