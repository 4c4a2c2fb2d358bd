//! SQLite schema migrations

use rusqlite::Connection;

use crate::errors::CoreError;

/// Run all pending migrations.
pub(crate) fn run_migrations(conn: &Connection) -> Result<(), CoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    run_migration(conn, "001_assets", CREATE_ASSETS_TABLE)?;
    run_migration(conn, "002_price_points", CREATE_PRICE_POINTS_TABLE)?;
    run_migration(conn, "003_market_information", CREATE_MARKET_INFORMATION_TABLE)?;
    run_migration(conn, "004_market_information_assets", CREATE_MARKET_INFORMATION_ASSETS_TABLE)?;
    run_migration(conn, "005_accounts", CREATE_ACCOUNT_TABLES)?;
    run_migration(conn, "006_sync_runs", CREATE_SYNC_RUNS_TABLE)?;

    tracing::debug!("Database migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<(), CoreError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("Running migration: {}", name);
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    }

    Ok(())
}

const CREATE_ASSETS_TABLE: &str = r#"
CREATE TABLE assets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    market TEXT NOT NULL,
    asset_type TEXT NOT NULL,
    name TEXT NOT NULL,
    latest_price REAL CHECK (latest_price IS NULL OR latest_price >= 0),
    price_updated_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(symbol, market)
);
CREATE INDEX IF NOT EXISTS idx_assets_symbol ON assets(symbol);
"#;

const CREATE_PRICE_POINTS_TABLE: &str = r#"
CREATE TABLE price_points (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(symbol, date),
    CHECK (open >= 0 AND high >= 0 AND low >= 0 AND close >= 0),
    CHECK (high >= low),
    CHECK (volume >= 0)
);
"#;

const CREATE_MARKET_INFORMATION_TABLE: &str = r#"
CREATE TABLE market_information (
    id TEXT PRIMARY KEY,
    source_type TEXT NOT NULL,
    source_name TEXT NOT NULL,
    source_url TEXT,
    source_key TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    content_format TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'PROCESSED', 'FAILED')),
    summary TEXT,
    sentiment TEXT,
    sentiment_score REAL CHECK (sentiment_score IS NULL OR sentiment_score BETWEEN -1 AND 1),
    importance TEXT,
    market_impact TEXT,
    processed_at TEXT,
    failure_reason TEXT,
    attempt_of TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK ((status = 'PROCESSED') = (
        summary IS NOT NULL AND sentiment IS NOT NULL AND sentiment_score IS NOT NULL
        AND importance IS NOT NULL AND market_impact IS NOT NULL AND processed_at IS NOT NULL
    )),
    CHECK ((status = 'FAILED') = (failure_reason IS NOT NULL))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_market_information_dedup
    ON market_information(source_key, fingerprint) WHERE status != 'FAILED';
CREATE INDEX IF NOT EXISTS idx_market_information_status ON market_information(status);
CREATE INDEX IF NOT EXISTS idx_market_information_created ON market_information(created_at);
"#;

const CREATE_MARKET_INFORMATION_ASSETS_TABLE: &str = r#"
CREATE TABLE market_information_assets (
    info_id TEXT NOT NULL REFERENCES market_information(id) ON DELETE CASCADE,
    asset_id INTEGER NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    PRIMARY KEY (info_id, asset_id)
);
CREATE INDEX IF NOT EXISTS idx_market_information_assets_asset
    ON market_information_assets(asset_id);
"#;

const CREATE_ACCOUNT_TABLES: &str = r#"
CREATE TABLE accounts (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    currency TEXT NOT NULL,
    cash_balance REAL NOT NULL DEFAULT 0 CHECK (cash_balance >= 0),
    created_at TEXT NOT NULL
);

CREATE TABLE positions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    asset_id INTEGER NOT NULL REFERENCES assets(id) ON DELETE RESTRICT,
    quantity REAL NOT NULL CHECK (quantity > 0),
    average_cost REAL NOT NULL CHECK (average_cost > 0),
    current_price REAL NOT NULL CHECK (current_price > 0),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(account_id, asset_id)
);
CREATE INDEX IF NOT EXISTS idx_positions_asset ON positions(asset_id);

CREATE TABLE transactions (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    transaction_type TEXT NOT NULL CHECK (transaction_type IN ('BUY', 'SELL')),
    symbol TEXT NOT NULL,
    market TEXT NOT NULL,
    quantity REAL NOT NULL CHECK (quantity > 0),
    price REAL NOT NULL CHECK (price > 0),
    fee REAL NOT NULL DEFAULT 0 CHECK (fee >= 0),
    date TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id, date);
"#;

const CREATE_SYNC_RUNS_TABLE: &str = r#"
CREATE TABLE sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    market TEXT NOT NULL,
    from_date TEXT NOT NULL,
    to_date TEXT NOT NULL,
    status TEXT NOT NULL,
    provider TEXT,
    rows_written INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    finished_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sync_runs_symbol ON sync_runs(symbol, finished_at);
"#;
