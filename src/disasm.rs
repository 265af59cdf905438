//! Feeds previously written bytecode files to an external `evm disasm`.

use crate::utils::config::DisasmConfig;
use crate::utils::error::{AppError, AppResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisasmSummary {
    pub processed: u64,
    pub failed: u64,
}

pub struct BatchDisassembler {
    evm_path: PathBuf,
    input_dir: PathBuf,
    output_dir: PathBuf,
    timeout: Duration,
}

impl BatchDisassembler {
    pub fn new(config: &DisasmConfig) -> Self {
        BatchDisassembler {
            evm_path: PathBuf::from(&config.evm_path),
            input_dir: PathBuf::from(&config.input_dir),
            output_dir: PathBuf::from(&config.output_dir),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Disassembles every `0x*` file in the input directory into `<name>_opcode`.
    /// Only an unreadable input directory is fatal.
    pub async fn run(&self) -> AppResult<DisasmSummary> {
        let mut entries = tokio::fs::read_dir(&self.input_dir).await?;
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let mut summary = DisasmSummary::default();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("0x") {
                continue;
            }

            match self.disassemble(&entry.path(), &name).await {
                Ok(()) => summary.processed += 1,
                Err(e) => {
                    warn!(file = %name, error = %e, "failed to disassemble");
                    summary.failed += 1;
                }
            }
        }

        info!(
            processed = summary.processed,
            failed = summary.failed,
            "disassembly finished"
        );
        Ok(summary)
    }

    async fn disassemble(&self, input: &Path, name: &str) -> AppResult<()> {
        let input = tokio::fs::canonicalize(input).await?;
        let mut command = Command::new(&self.evm_path);
        command.arg("disasm").arg(&input).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| AppError::TaskError(format!("timed out after {:?}", self.timeout)))??;

        if !output.status.success() {
            return Err(AppError::TaskError(format!(
                "{} exited with {}: {}",
                self.evm_path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let target = self.output_dir.join(format!("{}_opcode", name));
        tokio::fs::write(&target, &output.stdout).await?;
        Ok(())
    }
}
