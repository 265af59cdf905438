#![allow(dead_code)]

use async_trait::async_trait;
use contract_scanner::scanners::range::ScanOptions;
use contract_scanner::scanners::{LedgerBlock, LedgerClient, LedgerReceipt, LedgerTransaction};
use contract_scanner::store::{
    ContractStore, DiscoveryRecord, SqliteStore, StoreError, StoreResult, StoreStats,
};
use contract_scanner::utils::error::AppError;
use contract_scanner::utils::units::BigDecimal;
use num_bigint::BigUint;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use web3::types::{H160, H256, U256, U64};

/// Counts block units that are currently alive, from the start of their fetch to the
/// end of their last insert.
#[derive(Default)]
pub struct UnitGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl UnitGauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct Deployment {
    pub address: H160,
    pub code: Vec<u8>,
    pub balance: BigUint,
}

/// In-memory ledger that records which heights were fetched and how many block
/// fetches overlapped.
#[derive(Default)]
pub struct FakeLedger {
    pub height: u64,
    pub delay: Duration,
    pub failing_blocks: HashSet<u64>,
    pub fail_height: bool,
    creations: HashMap<u64, Vec<H256>>,
    deployments: HashMap<H256, Deployment>,
    fetched: Mutex<Vec<u64>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    units: Option<Arc<UnitGauge>>,
}

impl FakeLedger {
    pub fn new(height: u64) -> Self {
        FakeLedger {
            height,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_units(mut self, units: Arc<UnitGauge>) -> Self {
        self.units = Some(units);
        self
    }

    /// Adds a creation transaction in `block` deploying `code` at address `contract`.
    pub fn deploy(mut self, block: u64, contract: u64, code: &[u8], balance_wei: u64) -> Self {
        let tx_hash = H256::from_low_u64_be((block << 32) | contract);
        self.creations.entry(block).or_default().push(tx_hash);
        self.deployments.insert(
            tx_hash,
            Deployment {
                address: H160::from_low_u64_be(contract),
                code: code.to_vec(),
                balance: BigUint::from(balance_wei),
            },
        );
        self
    }

    pub fn fetched(&self) -> Vec<u64> {
        let mut heights = self.fetched.lock().unwrap().clone();
        heights.sort_unstable();
        heights
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    fn chain_name(&self) -> &str {
        "fake"
    }

    async fn current_height(&self) -> Result<u64, AppError> {
        if self.fail_height {
            return Err(AppError::NetworkError("connection refused".to_string()));
        }
        Ok(self.height)
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<LedgerBlock>, AppError> {
        if let Some(units) = &self.units {
            units.enter();
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(number);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_blocks.contains(&number) {
            return Err(AppError::NetworkError(format!("block {} timed out", number)));
        }
        if number > self.height {
            return Ok(None);
        }

        let transactions = self
            .creations
            .get(&number)
            .map(|hashes| {
                hashes
                    .iter()
                    .map(|hash| LedgerTransaction {
                        hash: *hash,
                        from: Some(H160::from_low_u64_be(0xdead)),
                        to: None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(LedgerBlock {
            number: U64::from(number),
            timestamp: U256::from(1_600_000_000 + number * 12),
            transactions,
        }))
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<LedgerReceipt>, AppError> {
        Ok(self.deployments.get(&hash).map(|d| LedgerReceipt {
            transaction_hash: hash,
            contract_address: Some(d.address),
            status: Some(U64::from(1)),
        }))
    }

    async fn code_at(&self, address: H160) -> Result<Vec<u8>, AppError> {
        Ok(self
            .deployments
            .values()
            .find(|d| d.address == address)
            .map(|d| d.code.clone())
            .unwrap_or_default())
    }

    async fn balance_at(&self, address: H160) -> Result<BigUint, AppError> {
        Ok(self
            .deployments
            .values()
            .find(|d| d.address == address)
            .map(|d| d.balance.clone())
            .unwrap_or_default())
    }
}

pub fn address(contract: u64) -> String {
    format!("0x{:040x}", contract)
}

pub fn options(start: u64, end: u64, concurrency: usize, output_dir: &Path) -> ScanOptions {
    ScanOptions {
        start_block: start,
        end_block: end,
        balance_threshold: BigDecimal::from(0),
        concurrency,
        print_only: true,
        output_dir: output_dir.to_path_buf(),
        progress_interval: 100_000,
    }
}

pub fn db_path(dir: &Path) -> PathBuf {
    dir.join("contracts.db")
}

pub async fn open_store(dir: &Path) -> SqliteStore {
    SqliteStore::open(db_path(dir), 8, Duration::from_secs(5))
        .await
        .unwrap()
}

/// Wraps a real store with a slow insert, a stats counter and optional stats failure.
pub struct InstrumentedStore {
    pub inner: SqliteStore,
    pub insert_delay: Duration,
    pub fail_stats: bool,
    units: Option<Arc<UnitGauge>>,
    stats_calls: AtomicUsize,
    closed: AtomicBool,
}

impl InstrumentedStore {
    pub fn new(inner: SqliteStore) -> Self {
        InstrumentedStore {
            inner,
            insert_delay: Duration::ZERO,
            fail_stats: false,
            units: None,
            stats_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_units(mut self, units: Arc<UnitGauge>) -> Self {
        self.units = Some(units);
        self
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractStore for InstrumentedStore {
    async fn insert_discovery(&self, record: &DiscoveryRecord) -> StoreResult<bool> {
        if !self.insert_delay.is_zero() {
            tokio::time::sleep(self.insert_delay).await;
        }
        let inserted = self.inner.insert_discovery(record).await;
        if let Some(units) = &self.units {
            units.exit();
        }
        inserted
    }

    async fn resume_height(&self, default: u64) -> StoreResult<u64> {
        self.inner.resume_height(default).await
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stats {
            return Err(StoreError::Join("stats unavailable".to_string()));
        }
        self.inner.stats().await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.close().await;
    }
}
