//! Configuration for the signing vault
//!
//! Every component takes its settings from [`VaultConfig`] at construction
//! time; nothing reads global state after startup.

pub mod rpc;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::keystore::cipher::MAX_KDF_ITERATIONS;
use crate::{Error, Result};

// Re-export RPC config
pub use rpc::RpcConfig;

/// PBKDF2 iteration count written into new keystore records
pub const DEFAULT_KDF_ITERATIONS: u32 = 262_144;

const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// Batch signing settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum concurrent signing workers (None = available parallelism)
    #[serde(default)]
    pub workers: Option<usize>,
}

impl BatchConfig {
    /// Resolve the worker limit, never less than one
    pub fn worker_limit(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }
}

/// Transaction monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Receipt polling interval (milliseconds)
    pub poll_interval_ms: u64,
    /// Consecutive query failures tolerated before a hash moves to `Error`
    #[serde(default)]
    pub max_query_retries: u32,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000, // 5 seconds
            max_query_retries: 0,
        }
    }
}

/// Limits enforced by the transaction validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationLimits {
    /// Minimum gas price (wei)
    pub min_gas_price: u128,
    /// Maximum gas price (wei)
    pub max_gas_price: u128,
    /// Maximum gas limit
    pub max_gas_limit: u64,
    /// Maximum transferred value (wei)
    pub max_value: U256,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            min_gas_price: 1,                 // 1 wei
            max_gas_price: 1_000_000_000_000, // 1000 gwei
            max_gas_limit: 10_000_000,        // 10M gas
            max_value: U256::from(1_000_000u64) * U256::from(WEI_PER_ETHER), // 1M ETH
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory holding one encrypted record per identity
    pub keystore_dir: PathBuf,
    /// Transaction history document
    pub history_path: PathBuf,
    /// PBKDF2 iterations for newly encrypted secrets
    pub kdf_iterations: u32,
    /// Chain used when a transaction does not name one
    pub default_chain_id: u64,
    /// Batch signing settings
    #[serde(default)]
    pub batch: BatchConfig,
    /// Monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Validation limits
    #[serde(default)]
    pub validation: ValidationLimits,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            keystore_dir: PathBuf::from(".keystore"),
            history_path: PathBuf::from(".vault/history.json"),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            default_chain_id: rpc::chains::ETHEREUM,
            batch: BatchConfig::default(),
            monitor: MonitorConfig::default(),
            validation: ValidationLimits::default(),
        }
    }
}

impl VaultConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.kdf_iterations == 0 {
            return Err(Error::Config("kdf_iterations must be positive".to_string()));
        }
        if self.kdf_iterations > MAX_KDF_ITERATIONS {
            return Err(Error::Config(format!(
                "kdf_iterations must not exceed {}",
                MAX_KDF_ITERATIONS
            )));
        }
        if self.batch.workers == Some(0) {
            return Err(Error::Config("batch.workers must be positive".to_string()));
        }
        Ok(())
    }
}
