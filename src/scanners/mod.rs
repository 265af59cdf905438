pub mod evm;
pub mod extractor;
pub mod range;

use crate::utils::error::AppError;
use async_trait::async_trait;
use num_bigint::BigUint;
use serde::Deserialize;
use web3::types::{H160, H256, U256, U64};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    pub hash: H256,
    #[serde(default)]
    pub from: Option<H160>,
    /// Absent for contract creations.
    #[serde(default)]
    pub to: Option<H160>,
}

impl LedgerTransaction {
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerBlock {
    pub number: U64,
    pub timestamp: U256,
    #[serde(default)]
    pub transactions: Vec<LedgerTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceipt {
    pub transaction_hash: H256,
    #[serde(default)]
    pub contract_address: Option<H160>,
    #[serde(default)]
    pub status: Option<U64>,
}

/// Read-only view of the ledger. Code and balance are read at `latest`.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn chain_name(&self) -> &str;
    async fn current_height(&self) -> Result<u64, AppError>;
    async fn block_by_number(&self, number: u64) -> Result<Option<LedgerBlock>, AppError>;
    async fn transaction_receipt(&self, hash: H256) -> Result<Option<LedgerReceipt>, AppError>;
    async fn code_at(&self, address: H160) -> Result<Vec<u8>, AppError>;
    async fn balance_at(&self, address: H160) -> Result<BigUint, AppError>;
}

/// `0x`-prefixed lowercase hex, the canonical form stored for addresses and hashes.
pub fn hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
