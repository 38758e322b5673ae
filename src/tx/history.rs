//! Transaction history
//!
//! A map of hash to [`TransactionRecord`], kept in memory behind a
//! reader/writer lock and persisted as one JSON document after every append.

use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::monitor::{TransactionState, TransactionStatus};
use crate::persist;
use crate::{Error, Result};

/// One settled transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas_used: u64,
    /// Wei per gas
    pub gas_price: u128,
    pub block_number: u64,
    pub status: TransactionState,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the caller knows about a transaction that the ledger receipt doesn't carry
#[derive(Debug, Clone, Default)]
pub struct TransferDetails {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    /// Used when the receipt reports no effective price
    pub gas_price: u128,
    pub data: Option<Bytes>,
}

impl TransactionRecord {
    /// Build a history entry from a settled monitor snapshot
    pub fn from_status(status: &TransactionStatus, details: TransferDetails) -> Result<Self> {
        if !status.state.is_terminal() {
            return Err(Error::InvalidArgument(format!(
                "transaction {} is still pending",
                status.hash
            )));
        }
        Ok(Self {
            hash: status.hash,
            from: details.from,
            to: details.to,
            value: details.value,
            gas_used: status.gas_used.unwrap_or_default(),
            gas_price: status.effective_gas_price.unwrap_or(details.gas_price),
            block_number: status.block_number.unwrap_or_default(),
            status: status.state,
            timestamp: status.last_updated,
            data: details.data.filter(|d| !d.is_empty()),
            error: status.error.clone(),
        })
    }

    fn involves(&self, address: Address) -> bool {
        self.from == address || self.to == Some(address)
    }
}

/// Concurrently readable, file-backed transaction history
pub struct HistoryStore {
    path: PathBuf,
    records: RwLock<HashMap<B256, TransactionRecord>>,
}

impl HistoryStore {
    /// Load the history at `path`; a missing file is an empty history
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let stored: BTreeMap<String, TransactionRecord> = serde_json::from_str(&content)?;
                stored.into_values().map(|r| (r.hash, r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), records = records.len(), "History loaded");

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the record for its hash and persist the whole history.
    ///
    /// Returns the record previously stored under the hash. If the write
    /// fails the in-memory history is left as it was.
    pub async fn append(&self, record: TransactionRecord) -> Result<Option<TransactionRecord>> {
        let mut records = self.records.write().await;
        let hash = record.hash;
        let previous = records.insert(hash, record);

        if let Err(e) = self.persist(&records).await {
            match &previous {
                Some(old) => records.insert(hash, old.clone()),
                None => records.remove(&hash),
            };
            tracing::warn!(hash = %hash, error = %e, "History write failed");
            return Err(e);
        }

        tracing::info!(hash = %hash, replaced = previous.is_some(), "History record appended");
        Ok(previous)
    }

    /// The record stored under `hash`, or [`Error::NotFound`]
    pub async fn get(&self, hash: &B256) -> Result<TransactionRecord> {
        self.records
            .read()
            .await
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("transaction {}", hash)))
    }

    /// Records sent from or to `address`, newest first
    pub async fn query_by_address(&self, address: Address) -> Vec<TransactionRecord> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| r.involves(address))
            .cloned()
            .collect();
        newest_first(&mut matching);
        matching
    }

    /// The `limit` newest records; `limit <= 0` returns all of them
    pub async fn recent(&self, limit: i64) -> Vec<TransactionRecord> {
        let mut all: Vec<_> = self.records.read().await.values().cloned().collect();
        newest_first(&mut all);
        if limit > 0 {
            all.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        all
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn persist(&self, records: &HashMap<B256, TransactionRecord>) -> Result<()> {
        let document: BTreeMap<String, &TransactionRecord> =
            records.iter().map(|(h, r)| (h.to_string(), r)).collect();
        let json = serde_json::to_vec_pretty(&document)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || persist::write_atomic(&path, &json))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        Ok(())
    }
}

fn newest_first(records: &mut [TransactionRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.hash.cmp(&b.hash)));
}
