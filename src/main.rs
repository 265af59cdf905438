use contract_scanner::disasm::BatchDisassembler;
use contract_scanner::scanners::evm::EvmRpcClient;
use contract_scanner::scanners::range::{BlockRangeScanner, ScanOptions};
use contract_scanner::store::SqliteStore;
use contract_scanner::utils::config::AppConfig;
use contract_scanner::utils::error::{AppError, AppResult};
use contract_scanner::utils::log::Logger;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let config = match AppConfig::new() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let _guard = match Logger::init(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logger: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let command = std::env::args().nth(1).unwrap_or_else(|| "scan".to_string());
    let result = match command.as_str() {
        "scan" => scan(&config).await,
        "disasm" => disasm(&config).await,
        other => Err(AppError::InvalidConfig(format!(
            "unknown command {:?}, expected `scan` or `disasm`",
            other
        ))),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "{} failed", command);
            ExitCode::FAILURE
        }
    }
}

async fn scan(config: &AppConfig) -> AppResult<()> {
    info!("Starting contract scanner...");

    let options = ScanOptions::from_config(&config.scan)?;
    let ledger = EvmRpcClient::new(
        &config.ledger.rpc_url,
        Duration::from_secs(config.ledger.request_timeout_secs),
    )?;
    let store = SqliteStore::open(
        &config.database.path,
        config.database.max_connections,
        Duration::from_millis(config.database.busy_timeout_ms),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing in-flight blocks");
            let _ = shutdown_tx.send(true);
        }
    });

    let scanner = BlockRangeScanner::new(Arc::new(ledger), Arc::new(store), options);
    let summary = scanner.run(shutdown_rx).await?;

    info!(
        start = summary.range.start,
        end = summary.range.end,
        scanned = summary.scanned,
        skipped = summary.skipped,
        records_written = summary.records_written,
        hits = summary.hits,
        cancelled = summary.cancelled,
        "Scan complete"
    );
    Ok(())
}

async fn disasm(config: &AppConfig) -> AppResult<()> {
    info!(input = %config.disasm.input_dir, "Starting batch disassembly...");
    let summary = BatchDisassembler::new(&config.disasm).run().await?;
    info!(
        processed = summary.processed,
        failed = summary.failed,
        "Disassembly complete"
    );
    Ok(())
}
