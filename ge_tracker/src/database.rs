//! Database operations for the price tracker
//!
//! Uses parameterized queries exclusively (no SQL string concatenation).
//! Price history is append-only, keyed by `(item_id, timestamp)`.

use crate::error::{Result, TrackerError};
use crate::models::{from_millis, Item, PricePoint};
use crate::wiki::CatalogItem;
use chrono::{DateTime, Utc};
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Result type for raw database operations
pub type DbResult<T> = rusqlite::Result<T>;

/// Initialize the database schema
///
/// Creates tables if they don't exist:
/// - `items`: Item catalog (id, name and wiki metadata)
/// - `price_points`: Append-only price observations
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "
        -- Item catalog table
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            examine TEXT,
            members INTEGER NOT NULL DEFAULT 0,
            buy_limit INTEGER,
            value INTEGER NOT NULL DEFAULT 0,
            lowalch INTEGER,
            highalch INTEGER,
            icon TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_items_name ON items(name COLLATE NOCASE);

        -- Price observations
        -- Composite primary key: one entry per item per refresh timestamp (unix ms)
        CREATE TABLE IF NOT EXISTS price_points (
            item_id INTEGER NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            timestamp INTEGER NOT NULL,
            inserted_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (item_id, timestamp),
            FOREIGN KEY (item_id) REFERENCES items(id)
        );

        CREATE INDEX IF NOT EXISTS idx_price_points_timestamp ON price_points(timestamp);
        ",
    )?;

    log::info!("Database schema initialized");
    Ok(())
}

/// Upsert catalog items into the database
///
/// All operations are wrapped in a transaction for atomicity.
pub fn upsert_items(conn: &mut Connection, items: &[CatalogItem]) -> DbResult<usize> {
    let tx = conn.transaction()?;
    let count = upsert_items_tx(&tx, items)?;
    tx.commit()?;
    Ok(count)
}

fn upsert_items_tx(tx: &Transaction<'_>, items: &[CatalogItem]) -> DbResult<usize> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO items (id, name, examine, members, buy_limit, value, lowalch, highalch, icon, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             examine = excluded.examine,
             members = excluded.members,
             buy_limit = excluded.buy_limit,
             value = excluded.value,
             lowalch = excluded.lowalch,
             highalch = excluded.highalch,
             icon = excluded.icon,
             updated_at = excluded.updated_at",
    )?;

    let mut count = 0;
    for item in items {
        stmt.execute(params![
            item.id,
            &item.name,
            &item.examine,
            item.members,
            item.limit,
            item.value.unwrap_or(0),
            item.lowalch,
            item.highalch,
            &item.icon,
        ])?;
        count += 1;
    }

    log::info!("Upserted {} items into database", count);
    Ok(count)
}

fn item_from_row(row: &rusqlite::Row<'_>) -> DbResult<Item> {
    Ok(Item {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

/// Full catalog, ordered by id
pub fn find_all_items(conn: &Connection) -> DbResult<Vec<Item>> {
    let mut stmt = conn.prepare("SELECT id, name FROM items ORDER BY id")?;
    let items = stmt.query_map([], item_from_row)?.collect();
    items
}

/// Items for the given ids; unknown ids are skipped
pub fn find_items_by_ids(conn: &Connection, ids: &[i64]) -> DbResult<Vec<Item>> {
    let mut stmt = conn.prepare_cached("SELECT id, name FROM items WHERE id = ?1")?;
    let mut items = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(item) = stmt.query_row(params![id], item_from_row).optional()? {
            items.push(item);
        }
    }
    Ok(items)
}

pub fn find_item_by_id(conn: &Connection, id: i64) -> DbResult<Option<Item>> {
    conn.query_row(
        "SELECT id, name FROM items WHERE id = ?1",
        params![id],
        item_from_row,
    )
    .optional()
}

/// Case-insensitive exact name match
pub fn find_item_by_name(conn: &Connection, name: &str) -> DbResult<Option<Item>> {
    conn.query_row(
        "SELECT id, name FROM items WHERE name = ?1 COLLATE NOCASE ORDER BY id LIMIT 1",
        params![name],
        item_from_row,
    )
    .optional()
}

/// Insert a single price point
///
/// A primary-key collision is reported as [`TrackerError::DuplicateKey`] so callers
/// can tell the expected race apart from real failures.
pub fn insert_price_point(conn: &Connection, point: &PricePoint) -> Result<()> {
    let timestamp = point.timestamp.timestamp_millis();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO price_points (item_id, high, low, timestamp) VALUES (?1, ?2, ?3, ?4)",
    )?;

    match stmt.execute(params![point.item_id, point.high, point.low, timestamp]) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _)) if is_key_violation(&err) => {
            Err(TrackerError::DuplicateKey {
                item_id: point.item_id,
                timestamp,
            })
        }
        Err(e) => Err(TrackerError::StoreUnavailable(e)),
    }
}

/// Insert a batch inside one transaction, reporting each record's outcome
///
/// A failing record only aborts its own statement; the rest of the batch is
/// still committed.
pub fn insert_price_points(conn: &mut Connection, points: &[PricePoint]) -> Result<Vec<Result<()>>> {
    let tx = conn.transaction()?;
    let results = points
        .iter()
        .map(|point| insert_price_point(&tx, point))
        .collect();
    tx.commit()?;
    Ok(results)
}

fn is_key_violation(err: &ffi::Error) -> bool {
    err.code == ErrorCode::ConstraintViolation
        && (err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            || err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE)
}

fn price_point_from_row(row: &rusqlite::Row<'_>) -> DbResult<PricePoint> {
    Ok(PricePoint {
        item_id: row.get(0)?,
        high: row.get(1)?,
        low: row.get(2)?,
        timestamp: from_millis(row.get(3)?),
    })
}

/// Most recent price point for an item
pub fn latest_price(conn: &Connection, item_id: i64) -> DbResult<Option<PricePoint>> {
    conn.query_row(
        "SELECT item_id, high, low, timestamp
         FROM price_points
         WHERE item_id = ?1
         ORDER BY timestamp DESC
         LIMIT 1",
        params![item_id],
        price_point_from_row,
    )
    .optional()
}

/// All price points for an item at or after `from`, ordered chronologically
pub fn price_range(
    conn: &Connection,
    item_id: i64,
    from: DateTime<Utc>,
) -> DbResult<Vec<PricePoint>> {
    let mut stmt = conn.prepare(
        "SELECT item_id, high, low, timestamp
         FROM price_points
         WHERE item_id = ?1 AND timestamp >= ?2
         ORDER BY timestamp ASC",
    )?;

    let points = stmt
        .query_map(params![item_id, from.timestamp_millis()], price_point_from_row)?
        .collect();
    points
}

/// Get total count of items in database
pub fn count_items(conn: &Connection) -> DbResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
}

/// Get total count of price points
pub fn count_price_points(conn: &Connection) -> DbResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM price_points", [], |row| row.get(0))
}

// ── Shared connection handle ────────────────────────────────────────────────

/// Long-lived, shared database connection
///
/// Acquired once at start-up and released once by [`Store::close`]. Every
/// operation after `close` fails with [`TrackerError::StoreClosed`].
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl Store {
    /// Open (or create) the database file and initialize the schema
    ///
    /// Missing parent directories are created first.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                log::info!("Created directory: {}", parent.display());
            }
        }

        let conn = Connection::open(path)?;
        log::info!("Opened database: {}", path.display());
        Self::from_connection(conn)
    }

    /// In-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(TrackerError::StoreClosed),
        }
    }

    /// Release the connection. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match conn {
            Some(conn) => {
                conn.close().map_err(|(_, e)| TrackerError::StoreUnavailable(e))?;
                log::info!("Database connection closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub fn upsert_items(&self, items: &[CatalogItem]) -> Result<usize> {
        self.with_conn(|conn| Ok(upsert_items(conn, items)?))
    }

    pub fn find_all_items(&self) -> Result<Vec<Item>> {
        self.with_conn(|conn| Ok(find_all_items(conn)?))
    }

    pub fn find_items_by_ids(&self, ids: &[i64]) -> Result<Vec<Item>> {
        self.with_conn(|conn| Ok(find_items_by_ids(conn, ids)?))
    }

    pub fn find_item_by_id(&self, id: i64) -> Result<Option<Item>> {
        self.with_conn(|conn| Ok(find_item_by_id(conn, id)?))
    }

    pub fn find_item_by_name(&self, name: &str) -> Result<Option<Item>> {
        self.with_conn(|conn| Ok(find_item_by_name(conn, name)?))
    }

    pub fn insert_price_point(&self, point: &PricePoint) -> Result<()> {
        self.with_conn(|conn| insert_price_point(conn, point))
    }

    pub fn insert_price_points(&self, points: &[PricePoint]) -> Result<Vec<Result<()>>> {
        self.with_conn(|conn| insert_price_points(conn, points))
    }

    pub fn latest_price(&self, item_id: i64) -> Result<Option<PricePoint>> {
        self.with_conn(|conn| Ok(latest_price(conn, item_id)?))
    }

    pub fn price_range(&self, item_id: i64, from: DateTime<Utc>) -> Result<Vec<PricePoint>> {
        self.with_conn(|conn| Ok(price_range(conn, item_id, from)?))
    }

    pub fn count_items(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(count_items(conn)?))
    }

    pub fn count_price_points(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(count_price_points(conn)?))
    }

    /// Run arbitrary SQL against the connection (fixtures and maintenance)
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_conn(|conn| Ok(conn.execute_batch(sql)?))
    }
}

#[cfg(test)]
#[path = "database_tests.rs"]
mod tests;
