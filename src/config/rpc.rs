//! RPC endpoint configuration for the ledger collaborator
//!
//! Per-chain env vars (ETH_RPC_URL, POLYGON_RPC_URL, ...) take priority;
//! chains without one fall back to public endpoints, which are rate limited
//! and meant for testing only.
//!
//! ```bash
//! export ETH_RPC_URL="https://eth-mainnet.g.alchemy.com/v2/YOUR_KEY"
//! ```

use std::collections::HashMap;

/// RPC configuration for multiple chains
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// RPC URLs indexed by chain ID
    urls: HashMap<u64, String>,
}

/// Chain ID constants
pub mod chains {
    pub const ETHEREUM: u64 = 1;
    pub const POLYGON: u64 = 137;
    pub const BSC: u64 = 56;
    pub const AVALANCHE: u64 = 43114;
}

/// Environment variable names
mod env_vars {
    pub const ETH_RPC_URL: &str = "ETH_RPC_URL";
    pub const POLYGON_RPC_URL: &str = "POLYGON_RPC_URL";
    pub const BSC_RPC_URL: &str = "BSC_RPC_URL";
    pub const AVALANCHE_RPC_URL: &str = "AVALANCHE_RPC_URL";
}

/// Public RPC endpoints (rate limited, for testing only)
mod public_rpcs {
    pub const ETHEREUM: &str = "https://eth.llamarpc.com";
    pub const POLYGON: &str = "https://polygon-rpc.com";
    pub const BSC: &str = "https://bsc-dataseed.binance.org";
    pub const AVALANCHE: &str = "https://api.avax.network/ext/bc/C/rpc";
}

const KNOWN: [(u64, &str, &str); 4] = [
    (chains::ETHEREUM, env_vars::ETH_RPC_URL, public_rpcs::ETHEREUM),
    (chains::POLYGON, env_vars::POLYGON_RPC_URL, public_rpcs::POLYGON),
    (chains::BSC, env_vars::BSC_RPC_URL, public_rpcs::BSC),
    (chains::AVALANCHE, env_vars::AVALANCHE_RPC_URL, public_rpcs::AVALANCHE),
];

impl RpcConfig {
    /// Create RPC config from environment variables, with public fallbacks
    pub fn from_env() -> Self {
        let mut urls = HashMap::new();

        for (chain_id, var, fallback) in KNOWN {
            match std::env::var(var) {
                Ok(url) => {
                    tracing::debug!(chain_id, var, "Using RPC URL from environment");
                    urls.insert(chain_id, url);
                }
                Err(_) => {
                    if chain_id == chains::ETHEREUM {
                        tracing::warn!(
                            "No RPC configured for Ethereum, using public RPC (rate limited)"
                        );
                    }
                    urls.insert(chain_id, fallback.to_string());
                }
            }
        }

        Self { urls }
    }

    /// Create with explicit RPC URLs
    pub fn with_urls(urls: HashMap<u64, String>) -> Self {
        Self { urls }
    }

    /// Get RPC URL for a chain
    pub fn get(&self, chain_id: u64) -> Option<&str> {
        self.urls.get(&chain_id).map(|s| s.as_str())
    }

    /// Check if a chain is configured
    pub fn has_chain(&self, chain_id: u64) -> bool {
        self.urls.contains_key(&chain_id)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
