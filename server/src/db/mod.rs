pub mod migrations;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Type alias for the shared database connection.
/// rusqlite is synchronous: we wrap in Arc<Mutex> for thread safety
/// and run every statement inside tokio::task::spawn_blocking.
pub type DbPool = Arc<Mutex<Connection>>;

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error + Send + Sync>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("relay.db");
    let mut conn = Connection::open(&db_path)?;

    // WAL gives concurrent readers while the outbox is being appended to
    conn.pragma_update(None, "journal_mode", "WAL")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Open a migrated SQLite database that lives only in memory.
pub fn init_in_memory() -> Result<DbPool, Box<dyn std::error::Error + Send + Sync>> {
    let mut conn = Connection::open_in_memory()?;
    migrations::migrations().to_latest(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}
