use super::{ContractStore, DiscoveryRecord, StoreError, StoreResult, StoreStats};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::ffi::ErrorCode;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS contract_deploy_record (
    contract_address TEXT PRIMARY KEY,
    deployer         TEXT,
    code_hash        TEXT NOT NULL,
    creation_time    TEXT NOT NULL,
    tx_hash          TEXT NOT NULL,
    block_num        INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_contract_deploy_record_block_num
    ON contract_deploy_record (block_num);
CREATE TABLE IF NOT EXISTS hash_to_bytecode (
    code_hash TEXT PRIMARY KEY,
    bytecode  TEXT NOT NULL
);
";

const MAX_LOCKED_ATTEMPTS: u32 = 6;

type SqlitePool = Pool<SqliteConnectionManager>;

fn is_locked(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            )
        }
        _ => false,
    }
}

fn to_sql_height(height: u64) -> rusqlite::Result<i64> {
    i64::try_from(height).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// Runs `op` on a pooled connection, retrying while the database is locked.
fn run_pooled<T, F>(pool: &SqlitePool, context: &'static str, op: F) -> StoreResult<T>
where
    F: Fn(&Connection) -> rusqlite::Result<T>,
{
    let pooled = pool.get()?;
    let conn: &Connection = &pooled;
    let mut attempt = 1;
    loop {
        match op(conn) {
            Err(err) if is_locked(&err) && attempt < MAX_LOCKED_ATTEMPTS => {
                warn!(context, attempt, "sqlite database locked, retrying");
                attempt += 1;
            }
            other => return other.map_err(|source| StoreError::Sqlite { context, source }),
        }
    }
}

/// SQLite-backed [`ContractStore`] over an r2d2 pool of at most `max_connections`
/// connections. `close` takes the pool out once every in-flight call has returned.
pub struct SqliteStore {
    path: PathBuf,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteStore {
    pub async fn open(
        path: impl AsRef<Path>,
        max_connections: usize,
        busy_timeout: Duration,
    ) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let max_connections = u32::try_from(max_connections.max(1)).unwrap_or(u32::MAX);
        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "journal_mode", "WAL")
        });

        let pool = tokio::task::spawn_blocking(move || {
            Pool::builder()
                .max_size(max_connections)
                .min_idle(Some(1))
                .build(manager)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;

        let store = SqliteStore {
            path,
            pool: RwLock::new(Some(pool)),
        };
        store
            .with_connection("migrate", |conn| conn.execute_batch(SCHEMA))
            .await?;

        info!(path = %store.path.display(), max_connections, "contract store ready");
        Ok(store)
    }

    async fn with_connection<T, F>(&self, context: &'static str, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: Fn(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let guard = self.pool.read().await;
        let pool = guard.as_ref().ok_or(StoreError::Closed)?.clone();

        let result = tokio::task::spawn_blocking(move || run_pooled(&pool, context, op))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?;
        drop(guard);
        result
    }
}

#[async_trait]
impl ContractStore for SqliteStore {
    async fn insert_discovery(&self, record: &DiscoveryRecord) -> StoreResult<bool> {
        let owned = record.clone();
        let inserted = self
            .with_connection("insert_discovery", move |conn| {
                let inserted = conn.execute(
                    "INSERT INTO contract_deploy_record
                        (contract_address, deployer, code_hash, creation_time, tx_hash, block_num)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (contract_address) DO NOTHING",
                    params![
                        owned.contract_address,
                        owned.deployer,
                        owned.code_hash,
                        owned.creation_time.to_rfc3339(),
                        owned.tx_hash,
                        to_sql_height(owned.block_number)?,
                    ],
                )?;
                conn.execute(
                    "INSERT INTO hash_to_bytecode (code_hash, bytecode)
                     VALUES (?1, ?2)
                     ON CONFLICT (code_hash) DO NOTHING",
                    params![owned.code_hash, owned.bytecode],
                )?;
                Ok(inserted > 0)
            })
            .await?;

        if inserted {
            debug!(contract_address = %record.contract_address, "inserted discovery record");
        }
        Ok(inserted)
    }

    async fn resume_height(&self, default: u64) -> StoreResult<u64> {
        let last = self
            .with_connection("resume_height", |conn| {
                conn.query_row(
                    "SELECT MAX(block_num) FROM contract_deploy_record",
                    [],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()
                .map(Option::flatten)
            })
            .await?;

        Ok(match last {
            Some(height) => u64::try_from(height).map_or(default, |h| h + 1),
            None => default,
        })
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        self.with_connection("stats", |conn| {
            let records: i64 =
                conn.query_row("SELECT COUNT(*) FROM contract_deploy_record", [], |row| {
                    row.get(0)
                })?;
            let code_hashes: i64 =
                conn.query_row("SELECT COUNT(*) FROM hash_to_bytecode", [], |row| row.get(0))?;
            Ok(StoreStats {
                records: records.max(0) as u64,
                code_hashes: code_hashes.max(0) as u64,
            })
        })
        .await
    }

    async fn close(&self) {
        if self.pool.write().await.take().is_some() {
            info!(path = %self.path.display(), "contract store closed");
        }
    }
}
