use log::warn;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard};

use crate::database::schema::{initialize_schema, run_migrations};
use crate::database::{Record, StoreError, SubscriptionStore, Updater};

/// SQLite-backed store. Subscription logs survive restarts; the scan
/// position does not live here.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and initialize the schema
    pub fn new(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory database for testing
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        initialize_schema(&conn)?;
        run_migrations(&conn)?;

        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Lock("Failed to acquire lock".to_string()))
    }
}

fn exists(conn: &Connection, key: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM subscriptions WHERE address = ?1",
            params![key],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn read_records(conn: &Connection, key: &str) -> Result<Vec<Record>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT record FROM subscription_records WHERE address = ?1 ORDER BY seq")?;
    let rows = stmt.query_map(params![key], |row| row.get::<_, Vec<u8>>(0))?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

fn write_records(conn: &Connection, key: &str, records: &[Record]) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM subscription_records WHERE address = ?1",
        params![key],
    )?;
    insert_records(conn, key, 0, records)
}

/// Insert `records` with sequence numbers starting at `first_seq`
fn insert_records(
    conn: &Connection,
    key: &str,
    first_seq: usize,
    records: &[Record],
) -> Result<(), StoreError> {
    let mut stmt = conn
        .prepare("INSERT INTO subscription_records (address, seq, record) VALUES (?1, ?2, ?3)")?;
    for (offset, record) in records.iter().enumerate() {
        stmt.execute(params![key, (first_seq + offset) as i64, record])?;
    }
    Ok(())
}

impl SubscriptionStore for SqliteStore {
    fn has(&self, key: &str) -> bool {
        let result = self.lock().and_then(|conn| exists(&conn, key));
        match result {
            Ok(found) => found,
            Err(e) => {
                warn!("Subscription lookup for {} failed: {}", key, e);
                false
            }
        }
    }

    fn get(&self, key: &str) -> Result<Vec<Record>, StoreError> {
        let conn = self.lock()?;
        if !exists(&conn, key)? {
            return Err(StoreError::NotFound(key.to_string()));
        }
        read_records(&conn, key)
    }

    fn put(&self, key: &str, value: Vec<Record>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO subscriptions (address) VALUES (?1)",
            params![key],
        )?;
        write_records(&tx, key, &value)?;

        tx.commit()?;
        Ok(())
    }

    fn put_if_absent(&self, key: &str, value: Vec<Record>) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO subscriptions (address) VALUES (?1)",
            params![key],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        write_records(&tx, key, &value)?;

        tx.commit()?;
        Ok(true)
    }

    fn update_many(&self, updates: Vec<(String, Updater<'_>)>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        // dropping the transaction on an early return rolls back every key
        let tx = conn.unchecked_transaction()?;

        for (key, updater) in updates {
            if !exists(&tx, &key)? {
                return Err(StoreError::NotFound(key));
            }
            let current = read_records(&tx, &key)?;
            let kept = current.len();
            let updated = updater(current.clone())?;

            if updated.len() >= kept && updated[..kept] == current[..] {
                insert_records(&tx, &key, kept, &updated[kept..])?;
            } else {
                write_records(&tx, &key, &updated)?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT address FROM subscriptions")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "DELETE FROM subscription_records WHERE address = ?1",
            params![key],
        )?;
        tx.execute("DELETE FROM subscriptions WHERE address = ?1", params![key])?;

        tx.commit()?;
        Ok(())
    }
}
