use log::info;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::db_schema::initialize_schema;

pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

// Pool sizing: the import engine holds at most one connection per running
// session; the rest of the pool buffers API requests.
const API_REQUEST_BUFFER: usize = 10;

fn db_pool_size() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    cores + API_REQUEST_BUFFER
}

pub fn create_db_pool(database_path: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    if let Some(parent) = std::path::Path::new(database_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(database_path);
    let pool_size = db_pool_size();
    info!("Creating database pool: {} connections", pool_size);
    let pool = Pool::builder()
        .max_size(pool_size as u32)
        .connection_timeout(std::time::Duration::from_secs(30))
        .build(manager)?;

    {
        let conn = pool.get()?;
        // WAL keeps readers off the single writer's back; NORMAL sync is
        // durable enough for a WAL database.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;
        initialize_schema(&conn)?;
    }

    Ok(pool)
}

/// Single-connection in-memory pool for tests.
pub fn create_in_memory_pool() -> Result<DbPool, Box<dyn std::error::Error>> {
    let manager = SqliteConnectionManager::memory();
    // A single connection: SQLite in-memory databases are per-connection,
    // so a larger pool would hand out empty databases.
    let pool = Pool::builder()
        .max_size(1)
        .connection_timeout(std::time::Duration::from_secs(30))
        .build(manager)?;

    {
        let conn = pool.get()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
    }

    Ok(pool)
}
