//! Ledger queries for transaction receipts
//!
//! The monitor only needs one question answered: has this hash been mined,
//! and did it succeed? [`LedgerQuery`] is that seam; [`RpcLedger`] answers
//! it with `eth_getTransactionReceipt` over HTTP.

use alloy::network::ReceiptResponse;
use alloy::primitives::B256;
use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RpcConfig;
use crate::Error;

/// A mined transaction's outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub success: bool,
    pub block_number: u64,
    pub gas_used: u64,
    /// Price actually paid per gas unit (wei)
    pub effective_gas_price: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The ledger has no receipt for the hash (yet)
    #[error("receipt not found yet")]
    NotFoundYet,

    #[error("{0}")]
    Query(String),
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFoundYet => Error::NotFound("transaction receipt".to_string()),
            LedgerError::Query(reason) => Error::Query(reason),
        }
    }
}

/// Source of transaction receipts
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    async fn receipt(&self, hash: B256) -> Result<Receipt, LedgerError>;
}

/// Receipt lookups against a JSON-RPC node
pub struct RpcLedger {
    rpc_url: String,
    chain_id: u64,
}

impl RpcLedger {
    pub fn new(rpc_url: String, chain_id: u64) -> Self {
        Self { rpc_url, chain_id }
    }

    pub fn from_rpc_config(rpc_config: &RpcConfig, chain_id: u64) -> crate::Result<Self> {
        let rpc_url = rpc_config
            .get(chain_id)
            .ok_or_else(|| Error::Config(format!("RPC URL not configured for chain {}", chain_id)))?
            .to_string();
        Ok(Self::new(rpc_url, chain_id))
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl LedgerQuery for RpcLedger {
    async fn receipt(&self, hash: B256) -> Result<Receipt, LedgerError> {
        let url: url::Url = self
            .rpc_url
            .parse()
            .map_err(|e| LedgerError::Query(format!("invalid RPC URL: {}", e)))?;
        let provider = ProviderBuilder::new().connect_http(url);

        let receipt = provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| LedgerError::Query(e.to_string()))?
            .ok_or(LedgerError::NotFoundYet)?;

        // A receipt without a block is still pending on some nodes
        let block_number = receipt.block_number().ok_or(LedgerError::NotFoundYet)?;

        Ok(Receipt {
            success: receipt.status(),
            block_number,
            gas_used: receipt.gas_used(),
            effective_gas_price: receipt.effective_gas_price(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays canned answers per hash; the last answer repeats forever.
    /// Unknown hashes are never found.
    #[derive(Default)]
    pub(crate) struct ScriptedLedger {
        answers: Mutex<HashMap<B256, VecDeque<Result<Receipt, LedgerError>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedLedger {
        pub(crate) fn script(
            self,
            hash: B256,
            answers: Vec<Result<Receipt, LedgerError>>,
        ) -> Self {
            self.answers.lock().unwrap().insert(hash, answers.into());
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LedgerQuery for ScriptedLedger {
        async fn receipt(&self, hash: B256) -> Result<Receipt, LedgerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut answers = self.answers.lock().unwrap();
            match answers.get_mut(&hash) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue.front().cloned().unwrap_or(Err(LedgerError::NotFoundYet)),
                None => Err(LedgerError::NotFoundYet),
            }
        }
    }

    pub(crate) fn mined(success: bool) -> Receipt {
        Receipt {
            success,
            block_number: 19_000_000,
            gas_used: 21_000,
            effective_gas_price: 30_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_scripted_answers_repeat_last() {
        let hash = B256::repeat_byte(0x11);
        let ledger = ScriptedLedger::default().script(
            hash,
            vec![Err(LedgerError::NotFoundYet), Ok(mined(true))],
        );

        assert_eq!(ledger.receipt(hash).await, Err(LedgerError::NotFoundYet));
        assert_eq!(ledger.receipt(hash).await, Ok(mined(true)));
        assert_eq!(ledger.receipt(hash).await, Ok(mined(true)));
        assert_eq!(
            ledger.receipt(B256::ZERO).await,
            Err(LedgerError::NotFoundYet)
        );
        assert_eq!(ledger.calls(), 4);
    }

    #[test]
    fn test_ledger_error_maps_into_crate_error() {
        assert!(matches!(
            Error::from(LedgerError::Query("timeout".to_string())),
            Error::Query(ref r) if r == "timeout"
        ));
        assert!(matches!(
            Error::from(LedgerError::NotFoundYet),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_from_rpc_config_requires_chain() {
        let config = RpcConfig::with_urls(HashMap::from([(1u64, "http://localhost:8545".to_string())]));
        assert_eq!(RpcLedger::from_rpc_config(&config, 1).unwrap().chain_id(), 1);
        assert!(matches!(
            RpcLedger::from_rpc_config(&config, 999),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_a_query_error() {
        let ledger = RpcLedger::new("http://127.0.0.1:1".to_string(), 1);
        assert!(matches!(
            ledger.receipt(B256::ZERO).await,
            Err(LedgerError::Query(_))
        ));
    }
}
