//! Database schema for the SQLite catalog sink

use rusqlite::Connection;

/// SQL schema for the catalog database
pub const SCHEMA_SQL: &str = r#"
-- One row per identity key; newer captures supersede older ones
CREATE TABLE IF NOT EXISTS records (
    identity_key TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    brand TEXT,
    price REAL,
    currency TEXT NOT NULL,
    unit_price REAL,
    unit_price_uom TEXT,
    size TEXT,
    availability TEXT NOT NULL,
    category_path TEXT,
    site TEXT NOT NULL,
    store TEXT NOT NULL,
    source_id TEXT,
    query TEXT NOT NULL,
    url TEXT,
    captured_at TEXT NOT NULL,
    payload_ref TEXT NOT NULL,
    strategy TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_site ON records(site);
CREATE INDEX IF NOT EXISTS idx_records_store ON records(store);

-- Append-only price drift log
CREATE TABLE IF NOT EXISTS price_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_key TEXT NOT NULL,
    old_price REAL NOT NULL,
    new_price REAL NOT NULL,
    currency TEXT NOT NULL,
    previous_at TEXT NOT NULL,
    observed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_price_changes_key ON price_changes(identity_key);
"#;

/// Creates all tables that do not exist yet
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
