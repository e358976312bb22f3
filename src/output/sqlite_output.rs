//! SQLite catalog sink
//!
//! Records are written inside a transaction that stays open until the next
//! flush, so one checkpoint batch lands in the database as one commit.

use crate::catalog::{CanonicalRecord, IdentityKey, PriceChange};
use crate::output::traits::{OutputResult, OutputSink};
use crate::storage::schema::initialize_schema;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Sink that keeps one row per identity key in SQLite
pub struct SqliteSink {
    conn: Connection,
    in_batch: bool,
}

impl SqliteSink {
    /// Opens or creates a catalog database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteSink)` - Database opened and schema ready
    /// * `Err(OutputError)` - Failed to open or initialize the database
    pub fn new(path: &Path) -> OutputResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            in_batch: false,
        })
    }

    /// Creates an in-memory catalog (for testing)
    pub fn open_in_memory() -> OutputResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            in_batch: false,
        })
    }

    /// Number of distinct identity keys stored
    pub fn count_records(&self) -> OutputResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Number of recorded price changes
    pub fn count_price_changes(&self) -> OutputResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM price_changes", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Current price stored for a key
    pub fn record_price(&self, key: &IdentityKey) -> OutputResult<Option<f64>> {
        let price: Option<Option<f64>> = self
            .conn
            .query_row(
                "SELECT price FROM records WHERE identity_key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(price.flatten())
    }

    /// Record counts per site, largest first
    pub fn records_by_site(&self) -> OutputResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT site, COUNT(*) FROM records GROUP BY site ORDER BY COUNT(*) DESC, site",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn begin(&mut self) -> OutputResult<()> {
        if !self.in_batch {
            self.conn.execute_batch("BEGIN")?;
            self.in_batch = true;
        }
        Ok(())
    }
}

impl OutputSink for SqliteSink {
    fn record(&mut self, record: &CanonicalRecord) -> OutputResult<()> {
        self.begin()?;
        self.conn.execute(
            "INSERT INTO records (
                identity_key, name, brand, price, currency, unit_price, unit_price_uom,
                size, availability, category_path, site, store, source_id, query, url,
                captured_at, payload_ref, strategy
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT(identity_key) DO UPDATE SET
                name = excluded.name,
                brand = excluded.brand,
                price = excluded.price,
                currency = excluded.currency,
                unit_price = excluded.unit_price,
                unit_price_uom = excluded.unit_price_uom,
                size = excluded.size,
                availability = excluded.availability,
                category_path = excluded.category_path,
                site = excluded.site,
                store = excluded.store,
                source_id = excluded.source_id,
                query = excluded.query,
                url = excluded.url,
                captured_at = excluded.captured_at,
                payload_ref = excluded.payload_ref,
                strategy = excluded.strategy
            WHERE excluded.captured_at > records.captured_at",
            params![
                record.key.as_str(),
                record.name,
                record.brand,
                record.price,
                record.currency,
                record.unit_price,
                record.unit_price_uom,
                record.size,
                record.availability.as_str(),
                record.category_path,
                record.source.site,
                record.source.store,
                record.source.source_id,
                record.source.query,
                record.source.url,
                timestamp(&record.captured_at),
                record.payload_ref,
                record.strategy.as_str(),
            ],
        )?;
        Ok(())
    }

    fn price_change(&mut self, change: &PriceChange) -> OutputResult<()> {
        self.begin()?;
        self.conn.execute(
            "INSERT INTO price_changes
                (identity_key, old_price, new_price, currency, previous_at, observed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                change.key.as_str(),
                change.old_price,
                change.new_price,
                change.currency,
                timestamp(&change.previous_at),
                timestamp(&change.observed_at),
            ],
        )?;
        Ok(())
    }

    fn flush(&mut self) -> OutputResult<()> {
        if self.in_batch {
            self.conn.execute_batch("COMMIT")?;
            self.in_batch = false;
        }
        Ok(())
    }
}

impl Drop for SqliteSink {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!("Failed to commit catalog on close: {}", e);
        }
    }
}

/// Fixed-width UTC timestamps so text comparison orders them correctly
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
