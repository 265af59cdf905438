use crate::scanners::{hex_prefixed, LedgerBlock, LedgerClient, LedgerTransaction};
use crate::store::DiscoveryRecord;
use crate::utils::error::AppError;
use crate::utils::units::{to_ether, BigDecimal};
use chrono::{DateTime, Utc};
use num_traits::Zero;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use web3::types::U256;

/// A discovered contract that passed the balance filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub contract_address: String,
    pub block_number: u64,
    pub balance: BigDecimal,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<DiscoveryRecord>,
    pub hits: Vec<Hit>,
}

/// Threshold `<= 0` accepts everything; otherwise the balance must be strictly greater.
/// Both sides are compared at full precision.
pub fn is_hit(balance: &BigDecimal, threshold: &BigDecimal) -> bool {
    *threshold <= BigDecimal::zero() || balance > threshold
}

pub struct ContractExtractor {
    ledger: Arc<dyn LedgerClient>,
    print_only: bool,
    output_dir: PathBuf,
}

impl ContractExtractor {
    pub fn new(ledger: Arc<dyn LedgerClient>, print_only: bool, output_dir: PathBuf) -> Self {
        ContractExtractor {
            ledger,
            print_only,
            output_dir,
        }
    }

    /// Collects one record per contract-creation transaction in `block`. Candidates
    /// whose receipt, code or balance cannot be fetched are skipped.
    pub async fn extract(&self, block: &LedgerBlock, threshold: &BigDecimal) -> Extraction {
        let block_number = block.number.as_u64();
        let mut extraction = Extraction::default();
        let creation_time = match block_time(block) {
            Some(time) => time,
            None => {
                warn!(
                    block_number,
                    timestamp = %block.timestamp,
                    "block timestamp out of range, skipping its contract creations"
                );
                return extraction;
            }
        };

        for tx in block.transactions.iter().filter(|tx| tx.is_contract_creation()) {
            let (record, balance) = match self
                .inspect_candidate(tx, block_number, creation_time)
                .await
            {
                Ok(Some(found)) => found,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        block_number,
                        tx_hash = %hex_prefixed(tx.hash.as_bytes()),
                        error = %e,
                        "skipping contract creation"
                    );
                    continue;
                }
            };

            if is_hit(&balance, threshold) {
                info!(
                    block_number,
                    contract_address = %record.contract_address,
                    balance = %balance,
                    "contract hit"
                );
                debug!(bytecode = %record.bytecode);
                if !self.print_only {
                    self.write_bytecode(&record).await;
                }
                extraction.hits.push(Hit {
                    contract_address: record.contract_address.clone(),
                    block_number,
                    balance,
                });
            }
            extraction.records.push(record);
        }

        extraction
    }

    async fn inspect_candidate(
        &self,
        tx: &LedgerTransaction,
        block_number: u64,
        creation_time: DateTime<Utc>,
    ) -> Result<Option<(DiscoveryRecord, BigDecimal)>, AppError> {
        let tx_hash = hex_prefixed(tx.hash.as_bytes());

        let receipt = match self.ledger.transaction_receipt(tx.hash).await? {
            Some(receipt) => receipt,
            None => {
                warn!(block_number, %tx_hash, "receipt not found, skipping");
                return Ok(None);
            }
        };
        let address = match receipt.contract_address {
            Some(address) => address,
            None => {
                warn!(block_number, %tx_hash, "receipt has no contract address, skipping");
                return Ok(None);
            }
        };

        let code = self.ledger.code_at(address).await?;
        let balance = to_ether(&self.ledger.balance_at(address).await?);

        let record = DiscoveryRecord::from_code(
            hex_prefixed(address.as_bytes()),
            tx.from.map(|from| hex_prefixed(from.as_bytes())),
            &code,
            creation_time,
            tx_hash,
            block_number,
        );
        debug!(contract_address = %record.contract_address, code_hash = %record.code_hash);
        Ok(Some((record, balance)))
    }

    /// Side file named by address; a write failure only loses the file, not the record.
    async fn write_bytecode(&self, record: &DiscoveryRecord) {
        let path = self.output_dir.join(&record.contract_address);
        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            warn!(dir = %self.output_dir.display(), error = %e, "cannot create output dir");
            return;
        }
        if let Err(e) = tokio::fs::write(&path, record.bytecode.as_bytes()).await {
            warn!(path = %path.display(), error = %e, "failed to write bytecode file");
        }
    }
}

fn block_time(block: &LedgerBlock) -> Option<DateTime<Utc>> {
    if block.timestamp > U256::from(i64::MAX as u64) {
        return None;
    }
    DateTime::from_timestamp(block.timestamp.low_u64() as i64, 0)
}
