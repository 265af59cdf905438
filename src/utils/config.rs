use crate::utils::error::{AppError, AppResult};
use crate::utils::units::BigDecimal;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub rpc_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    pub start_block: u64,
    pub end_block: u64,
    /// Ether-denominated threshold; `0` records every contract as a hit.
    pub balance_threshold: String,
    pub concurrency: usize,
    #[serde(default)]
    pub print_only: bool,
    pub output_dir: String,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisasmConfig {
    pub evm_path: String,
    pub input_dir: String,
    pub output_dir: String,
    #[serde(default = "default_disasm_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub output: String,
    pub format: String,
    pub file_path: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub database: DatabaseConfig,
    pub scan: ScanConfig,
    pub disasm: DisasmConfig,
    pub log: LogConfig,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_connections() -> usize {
    32
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_progress_interval() -> u64 {
    100_000
}

fn default_disasm_timeout_secs() -> u64 {
    600
}

impl AppConfig {
    pub fn new() -> AppResult<Self> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false));

        Self::build(builder)
    }

    /// Loads a config from an in-memory TOML document, still honouring `SCANNER__*` overrides.
    pub fn from_toml(contents: &str) -> AppResult<Self> {
        let builder = Config::builder().add_source(File::from_str(contents, FileFormat::Toml));
        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> AppResult<Self> {
        let s = builder
            .add_source(Environment::with_prefix("SCANNER").separator("__"))
            .build()?;
        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.scan.concurrency == 0 {
            return Err(AppError::InvalidConfig(
                "scan.concurrency must be greater than 0".to_string(),
            ));
        }
        if self.scan.progress_interval == 0 {
            return Err(AppError::InvalidConfig(
                "scan.progress_interval must be greater than 0".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(AppError::InvalidConfig(
                "database.max_connections must be greater than 0".to_string(),
            ));
        }
        self.scan.threshold()?;
        Ok(())
    }
}

impl ScanConfig {
    pub fn threshold(&self) -> AppResult<BigDecimal> {
        self.balance_threshold.trim().parse::<BigDecimal>().map_err(|e| {
            AppError::InvalidConfig(format!(
                "scan.balance_threshold {:?}: {}",
                self.balance_threshold, e
            ))
        })
    }
}
