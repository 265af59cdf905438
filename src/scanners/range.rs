//! Bounded, resumable block-range scanner.
//!
//! Heights are dispatched in increasing order, one task per block, with at most
//! `concurrency` tasks alive. A task keeps its slot until its block has been fetched,
//! extracted and persisted. Resuming relies on the store: the next run starts one
//! past the highest recorded block, and every write ignores duplicates.

use crate::scanners::extractor::ContractExtractor;
use crate::scanners::LedgerClient;
use crate::store::ContractStore;
use crate::utils::config::ScanConfig;
use crate::utils::error::{AppError, AppResult};
use crate::utils::units::BigDecimal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub start_block: u64,
    pub end_block: u64,
    pub balance_threshold: BigDecimal,
    pub concurrency: usize,
    pub print_only: bool,
    pub output_dir: PathBuf,
    pub progress_interval: u64,
}

impl ScanOptions {
    pub fn from_config(config: &ScanConfig) -> AppResult<Self> {
        Ok(ScanOptions {
            start_block: config.start_block,
            end_block: config.end_block,
            balance_threshold: config.threshold()?,
            concurrency: config.concurrency,
            print_only: config.print_only,
            output_dir: PathBuf::from(&config.output_dir),
            progress_interval: config.progress_interval,
        })
    }
}

/// Half-open `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    pub start: u64,
    pub end: u64,
}

impl ScanRange {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub range: ScanRange,
    pub dispatched: u64,
    pub scanned: u64,
    pub skipped: u64,
    pub records_found: u64,
    pub records_written: u64,
    pub hits: u64,
    pub cancelled: bool,
}

impl ScanSummary {
    fn new(range: ScanRange) -> Self {
        ScanSummary {
            range,
            dispatched: 0,
            scanned: 0,
            skipped: 0,
            records_found: 0,
            records_written: 0,
            hits: 0,
            cancelled: false,
        }
    }

    fn absorb(&mut self, outcome: BlockOutcome) {
        match outcome {
            BlockOutcome::Skipped => self.skipped += 1,
            BlockOutcome::Scanned {
                records_found,
                records_written,
                hits,
            } => {
                self.scanned += 1;
                self.records_found += records_found;
                self.records_written += records_written;
                self.hits += hits;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockOutcome {
    Scanned {
        records_found: u64,
        records_written: u64,
        hits: u64,
    },
    Skipped,
}

/// Everything one block task needs; cloned into each task.
#[derive(Clone)]
struct BlockWorker {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn ContractStore>,
    extractor: Arc<ContractExtractor>,
    threshold: BigDecimal,
}

impl BlockWorker {
    /// Fetch failures skip the block; store failures are returned as fatal.
    #[instrument(skip(self))]
    async fn process_block(self, height: u64) -> AppResult<BlockOutcome> {
        let block = match self.ledger.block_by_number(height).await {
            Ok(Some(block)) => block,
            Ok(None) => {
                warn!("block not available, skipping");
                return Ok(BlockOutcome::Skipped);
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch block, skipping");
                return Ok(BlockOutcome::Skipped);
            }
        };

        let extraction = self.extractor.extract(&block, &self.threshold).await;

        let mut records_written = 0;
        for record in &extraction.records {
            if self.store.insert_discovery(record).await? {
                records_written += 1;
            }
        }

        Ok(BlockOutcome::Scanned {
            records_found: extraction.records.len() as u64,
            records_written,
            hits: extraction.hits.len() as u64,
        })
    }
}

pub struct BlockRangeScanner {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn ContractStore>,
    options: ScanOptions,
}

impl BlockRangeScanner {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn ContractStore>,
        options: ScanOptions,
    ) -> Self {
        BlockRangeScanner {
            ledger,
            store,
            options,
        }
    }

    /// Clamps the end to the current height and replaces the start with the store's
    /// resume point whenever records already exist.
    pub async fn resolve_range(&self) -> AppResult<ScanRange> {
        let current = self.ledger.current_height().await?;
        info!(chain = self.ledger.chain_name(), current, "current block");

        let end = self.options.end_block.min(current);
        let start = self.store.resume_height(self.options.start_block).await?;
        if start != self.options.start_block {
            info!(
                requested = self.options.start_block,
                resume = start,
                "resuming after last recorded block"
            );
        }
        Ok(ScanRange { start, end })
    }

    /// Scans the resolved range until it is exhausted, `shutdown` flips to `true`, or a
    /// store call fails. In-flight blocks are always drained and the store is closed
    /// on every exit path.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> AppResult<ScanSummary> {
        let result = self.scan(shutdown).await;
        if let Err(e) = &result {
            error!(error = %e, "scan aborted");
        }
        self.store.close().await;
        result
    }

    async fn scan(&self, mut shutdown: watch::Receiver<bool>) -> AppResult<ScanSummary> {
        if self.options.concurrency == 0 {
            return Err(AppError::InvalidConfig(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        let range = self.resolve_range().await?;
        info!(start = range.start, end = range.end, blocks = range.len(), "scan range");

        let worker = BlockWorker {
            ledger: Arc::clone(&self.ledger),
            store: Arc::clone(&self.store),
            extractor: Arc::new(ContractExtractor::new(
                Arc::clone(&self.ledger),
                self.options.print_only,
                self.options.output_dir.clone(),
            )),
            threshold: self.options.balance_threshold.clone(),
        };
        let slots = Arc::new(Semaphore::new(self.options.concurrency));
        let mut in_flight: JoinSet<AppResult<BlockOutcome>> = JoinSet::new();
        let mut summary = ScanSummary::new(range);
        let mut fatal: Option<AppError> = None;
        let progress_interval = self.options.progress_interval.max(1);

        for height in range.start..range.end {
            if height % progress_interval == 0 {
                if let Err(e) = self.report_progress(height).await {
                    fatal = Some(e);
                    break;
                }
            }

            let permit = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    summary.cancelled = true;
                    break;
                }
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            while let Some(joined) = in_flight.try_join_next() {
                collect(joined, &mut summary, &mut fatal);
            }
            if fatal.is_some() {
                break;
            }

            let worker = worker.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                worker.process_block(height).await
            });
            summary.dispatched += 1;
        }

        if summary.cancelled {
            info!(in_flight = in_flight.len(), "shutdown requested, draining in-flight blocks");
        }
        while let Some(joined) = in_flight.join_next().await {
            collect(joined, &mut summary, &mut fatal);
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let stats = self.store.stats().await?;
        info!(
            records = stats.records,
            code_hashes = stats.code_hashes,
            "store totals"
        );

        info!(
            dispatched = summary.dispatched,
            scanned = summary.scanned,
            skipped = summary.skipped,
            records_written = summary.records_written,
            hits = summary.hits,
            cancelled = summary.cancelled,
            "scan finished"
        );
        Ok(summary)
    }

    async fn report_progress(&self, height: u64) -> AppResult<()> {
        let stats = self.store.stats().await?;
        info!(
            height,
            records = stats.records,
            code_hashes = stats.code_hashes,
            "progress"
        );
        Ok(())
    }
}

fn collect(
    joined: Result<AppResult<BlockOutcome>, tokio::task::JoinError>,
    summary: &mut ScanSummary,
    fatal: &mut Option<AppError>,
) {
    match joined {
        Ok(Ok(outcome)) => summary.absorb(outcome),
        Ok(Err(e)) => {
            error!(error = %e, "block task failed");
            fatal.get_or_insert(e);
        }
        Err(e) => {
            error!(error = %e, "block task panicked");
            fatal.get_or_insert(AppError::TaskError(e.to_string()));
        }
    }
}

/// Resolves once the flag is `true`; never resolves if the sender goes away first.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
