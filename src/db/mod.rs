mod from_row;
mod ledger;
pub mod queries;
mod schema;

pub use ledger::PurchaseLedger;
pub use queries::PendingInsertResult;
pub use schema::init_db;

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::error::Result;

pub type DbPool = Pool<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a file-backed pool with WAL enabled and the schema applied.
///
/// WAL lets readers proceed while a `BEGIN IMMEDIATE` writer holds the lock;
/// the busy timeout makes competing writers queue instead of failing.
pub fn create_pool(path: &str, max_size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
    });
    let pool = Pool::builder().max_size(max_size).build(manager)?;

    let conn = pool.get()?;
    init_db(&conn)?;

    Ok(pool)
}
