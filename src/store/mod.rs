pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use web3::signing::keccak256;

pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error in {context}: {source}")]
    Sqlite {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Store is closed")]
    Closed,
    #[error("Store task failed: {0}")]
    Join(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One observed contract deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub contract_address: String,
    pub deployer: Option<String>,
    /// Hex without `0x`.
    pub bytecode: String,
    /// Keccak-256 of the raw code, hex without `0x`.
    pub code_hash: String,
    pub creation_time: DateTime<Utc>,
    pub tx_hash: String,
    pub block_number: u64,
}

impl DiscoveryRecord {
    pub fn from_code(
        contract_address: String,
        deployer: Option<String>,
        code: &[u8],
        creation_time: DateTime<Utc>,
        tx_hash: String,
        block_number: u64,
    ) -> Self {
        DiscoveryRecord {
            contract_address,
            deployer,
            bytecode: hex::encode(code),
            code_hash: code_hash(code),
            creation_time,
            tx_hash,
            block_number,
        }
    }
}

pub fn code_hash(code: &[u8]) -> String {
    hex::encode(keccak256(code))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub records: u64,
    pub code_hashes: u64,
}

/// Durable home of discovery records. Every write is idempotent.
#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Stores the deployment fact and its code body, each ignoring conflicts.
    /// Returns whether the deployment row was new.
    async fn insert_discovery(&self, record: &DiscoveryRecord) -> StoreResult<bool>;

    /// Height a scan should start at: one past the highest stored block, or `default`
    /// when nothing has been recorded yet.
    async fn resume_height(&self, default: u64) -> StoreResult<u64>;

    async fn stats(&self) -> StoreResult<StoreStats>;

    /// Waits for in-flight calls, then refuses new ones.
    async fn close(&self);
}
