//! Scans EVM block ranges for contract deployments and records each one exactly once.

pub mod disasm;
pub mod scanners;
pub mod store;
pub mod utils;
