use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::portfolio::{Account, Position, Transaction, TransactionType};

use super::database::{decode, parse_uuid, Database};

/// Stored numbers of one position, keyed by account and asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionState {
    pub quantity: f64,
    pub average_cost: f64,
    pub current_price: f64,
}

/// Accounts, their positions and transaction history.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    db: Arc<Database>,
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: decode(row, 0, parse_uuid)?,
        name: row.get(1)?,
        currency: row.get(2)?,
        cash_balance: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn parse_transaction_type(raw: &str) -> Result<TransactionType, CoreError> {
    match raw {
        "BUY" => Ok(TransactionType::Buy),
        "SELL" => Ok(TransactionType::Sell),
        other => Err(CoreError::Deserialization(format!(
            "Unknown transaction type '{other}'"
        ))),
    }
}

impl AccountRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert_account(&self, account: &Account) -> Result<(), CoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (id, name, currency, cash_balance, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    account.id.to_string(),
                    account.name,
                    account.currency,
                    account.cash_balance,
                    account.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_account(&self, id: Uuid) -> Result<Option<Account>, CoreError> {
        self.db.with_conn(|conn| {
            let account = conn
                .query_row(
                    "SELECT id, name, currency, cash_balance, created_at FROM accounts WHERE id = ?1",
                    [id.to_string()],
                    account_from_row,
                )
                .optional()?;
            Ok(account)
        })
    }

    /// Like [`get_account`](Self::get_account) but `NotFound` when missing.
    pub fn require_account(&self, id: Uuid) -> Result<Account, CoreError> {
        self.get_account(id)?
            .ok_or_else(|| CoreError::NotFound(format!("account {id}")))
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, CoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, currency, cash_balance, created_at FROM accounts ORDER BY created_at",
            )?;
            let accounts = stmt
                .query_map([], account_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(accounts)
        })
    }

    pub fn set_cash_balance(&self, id: Uuid, balance: f64) -> Result<(), CoreError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE accounts SET cash_balance = ?1 WHERE id = ?2",
                params![balance, id.to_string()],
            )?;
            if updated == 0 {
                return Err(CoreError::NotFound(format!("account {id}")));
            }
            Ok(())
        })
    }

    /// Positions of an account, largest market value first.
    pub fn positions(&self, account_id: Uuid) -> Result<Vec<Position>, CoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.symbol, a.market, a.name, p.quantity, p.average_cost, p.current_price
                 FROM positions p JOIN assets a ON a.id = p.asset_id
                 WHERE p.account_id = ?1
                 ORDER BY p.quantity * p.current_price DESC, a.symbol",
            )?;
            let positions = stmt
                .query_map([account_id.to_string()], |row| {
                    Ok(Position {
                        symbol: row.get(0)?,
                        market: decode(row, 1, str::parse)?,
                        name: row.get(2)?,
                        quantity: row.get(3)?,
                        average_cost: row.get(4)?,
                        current_price: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(positions)
        })
    }

    /// Current state of one holding, if held.
    pub fn position_for_asset(
        &self,
        account_id: Uuid,
        asset_id: i64,
    ) -> Result<Option<PositionState>, CoreError> {
        self.db.with_conn(|conn| {
            let holding = conn
                .query_row(
                    "SELECT quantity, average_cost, current_price FROM positions
                     WHERE account_id = ?1 AND asset_id = ?2",
                    params![account_id.to_string(), asset_id],
                    |row| {
                        Ok(PositionState {
                            quantity: row.get(0)?,
                            average_cost: row.get(1)?,
                            current_price: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(holding)
        })
    }

    /// Atomically record a trade: new cash balance, new position state
    /// (`None` removes the position), and the transaction row.
    /// Either everything is written or nothing is.
    pub fn commit_trade(
        &self,
        account_id: Uuid,
        asset_id: i64,
        cash_balance: f64,
        position: Option<PositionState>,
        transaction: &Transaction,
    ) -> Result<(), CoreError> {
        let account_key = account_id.to_string();
        self.db.with_transaction(|tx| {
            tx.execute(
                "UPDATE accounts SET cash_balance = ?1 WHERE id = ?2",
                params![cash_balance, account_key],
            )?;
            match position {
                Some(update) => {
                    tx.execute(
                        "INSERT INTO positions (account_id, asset_id, quantity, average_cost, current_price)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(account_id, asset_id) DO UPDATE SET
                            quantity = excluded.quantity,
                            average_cost = excluded.average_cost,
                            current_price = excluded.current_price,
                            updated_at = datetime('now')",
                        params![
                            account_key,
                            asset_id,
                            update.quantity,
                            update.average_cost,
                            update.current_price
                        ],
                    )?;
                }
                None => {
                    tx.execute(
                        "DELETE FROM positions WHERE account_id = ?1 AND asset_id = ?2",
                        params![account_key, asset_id],
                    )?;
                }
            }
            tx.execute(
                "INSERT INTO transactions
                    (id, account_id, transaction_type, symbol, market, quantity, price, fee, date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    transaction.id.to_string(),
                    account_key,
                    transaction.transaction_type.as_str(),
                    transaction.symbol,
                    transaction.market.as_str(),
                    transaction.quantity,
                    transaction.price,
                    transaction.fee,
                    transaction.date
                ],
            )?;
            Ok(())
        })
    }

    /// Set `current_price` on every position holding `asset_id`.
    pub fn update_position_prices(&self, asset_id: i64, price: f64) -> Result<usize, CoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE positions SET current_price = ?1, updated_at = datetime('now')
                 WHERE asset_id = ?2",
                params![price, asset_id],
            )?)
        })
    }

    /// Transaction history of an account, oldest first.
    pub fn transactions(&self, account_id: Uuid) -> Result<Vec<Transaction>, CoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.transaction_type, t.symbol, t.market, t.quantity, t.price, t.fee,
                        t.date, COALESCE(a.asset_type, 'stock')
                 FROM transactions t
                 LEFT JOIN assets a ON a.symbol = t.symbol AND a.market = t.market
                 WHERE t.account_id = ?1
                 ORDER BY t.date, t.created_at, t.rowid",
            )?;
            let transactions = stmt
                .query_map([account_id.to_string()], |row| {
                    Ok(Transaction {
                        id: decode(row, 0, parse_uuid)?,
                        transaction_type: decode(row, 1, parse_transaction_type)?,
                        symbol: row.get(2)?,
                        market: decode(row, 3, str::parse)?,
                        asset_type: decode(row, 8, str::parse)?,
                        quantity: row.get(4)?,
                        price: row.get(5)?,
                        fee: row.get(6)?,
                        date: row.get(7)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(transactions)
        })
    }

    pub fn delete_account(&self, id: Uuid) -> Result<(), CoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM accounts WHERE id = ?1", [id.to_string()])?;
            if deleted == 0 {
                return Err(CoreError::NotFound(format!("account {id}")));
            }
            Ok(())
        })
    }
}
