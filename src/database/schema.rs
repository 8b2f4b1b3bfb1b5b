use rusqlite::{Connection, Result};

/// Initialize the subscription schema
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    // One row per subscribed address; row existence is the subscription
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscriptions (
            address TEXT PRIMARY KEY,
            created_at INTEGER DEFAULT (strftime('%s', 'now'))
        )",
        [],
    )?;

    // Append-only log, ordered by seq within an address
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscription_records (
            address TEXT NOT NULL,
            seq INTEGER NOT NULL,
            record BLOB NOT NULL,
            PRIMARY KEY (address, seq)
        )",
        [],
    )?;

    Ok(())
}

/// Run database migrations (for future schema updates)
pub fn run_migrations(conn: &Connection) -> Result<()> {
    initialize_schema(conn)
}
