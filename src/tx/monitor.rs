//! Transaction monitor
//!
//! Every watched hash gets its own polling task and a tiny state machine:
//!
//! ```text
//! Pending --receipt ok------> Success
//! Pending --receipt failed--> Failed
//! Pending --query error-----> Error
//! Pending --not found yet---> Pending (poll again)
//! ```
//!
//! Success, Failed and Error are terminal: the task dispatches callbacks for
//! the transition and exits. Cancelling a hash stops its task without any
//! further state change; its last snapshot stays readable. A terminal state
//! that was recorded before the cancel still has its callbacks dispatched.

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::ledger::{LedgerError, LedgerQuery, Receipt};
use crate::config::MonitorConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Success,
    Failed,
    Error,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of one watched transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatus {
    pub hash: B256,
    pub state: TransactionState,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub effective_gas_price: Option<u128>,
    /// Query failure that moved the hash to `Error`
    pub error: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl TransactionStatus {
    fn pending(hash: B256) -> Self {
        Self {
            hash,
            state: TransactionState::Pending,
            block_number: None,
            gas_used: None,
            effective_gas_price: None,
            error: None,
            last_updated: Utc::now(),
        }
    }

    fn mined(hash: B256, receipt: &Receipt) -> Self {
        Self {
            hash,
            state: if receipt.success {
                TransactionState::Success
            } else {
                TransactionState::Failed
            },
            block_number: Some(receipt.block_number),
            gas_used: Some(receipt.gas_used),
            effective_gas_price: Some(receipt.effective_gas_price),
            error: None,
            last_updated: Utc::now(),
        }
    }

    fn errored(hash: B256, reason: String) -> Self {
        Self {
            error: Some(reason),
            state: TransactionState::Error,
            ..Self::pending(hash)
        }
    }
}

/// Opaque token returned by [`TransactionMonitor::add_callback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u64);

pub type StatusCallback = Arc<dyn Fn(&TransactionStatus) + Send + Sync>;

struct Watched {
    status: TransactionStatus,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

type WatchMap = Arc<RwLock<HashMap<B256, Watched>>>;
type CallbackMap = Arc<RwLock<HashMap<B256, Vec<(CallbackHandle, StatusCallback)>>>>;

/// Polls the ledger for each watched hash until it settles
pub struct TransactionMonitor {
    ledger: Arc<dyn LedgerQuery>,
    poll_interval: Duration,
    max_query_retries: u32,
    watched: WatchMap,
    callbacks: CallbackMap,
    next_handle: AtomicU64,
}

impl TransactionMonitor {
    pub fn new(ledger: Arc<dyn LedgerQuery>, config: &MonitorConfig) -> Self {
        Self {
            ledger,
            poll_interval: config.poll_interval(),
            max_query_retries: config.max_query_retries,
            watched: Arc::new(RwLock::new(HashMap::new())),
            callbacks: Arc::new(RwLock::new(HashMap::new())),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Start watching `hash`. Fails if it is already tracked.
    pub async fn monitor(&self, hash: B256) -> Result<()> {
        let mut watched = self.watched.write().await;
        if watched.contains_key(&hash) {
            return Err(Error::AlreadyMonitored(hash));
        }

        let (cancel, cancelled) = watch::channel(false);
        let poller = Poller {
            hash,
            ledger: Arc::clone(&self.ledger),
            poll_interval: self.poll_interval,
            max_query_retries: self.max_query_retries,
            watched: Arc::clone(&self.watched),
            callbacks: Arc::clone(&self.callbacks),
        };
        let task = tokio::spawn(poller.run(cancelled));

        watched.insert(
            hash,
            Watched {
                status: TransactionStatus::pending(hash),
                cancel,
                task: Some(task),
            },
        );
        tracing::info!(
            hash = %hash,
            interval_ms = self.poll_interval.as_millis() as u64,
            "Monitoring transaction"
        );
        Ok(())
    }

    /// Current snapshot for a tracked hash
    pub async fn get_status(&self, hash: B256) -> Result<TransactionStatus> {
        self.watched
            .read()
            .await
            .get(&hash)
            .map(|w| w.status.clone())
            .ok_or(Error::NotMonitored(hash))
    }

    /// Every tracked hash with its snapshot
    pub async fn statuses(&self) -> Vec<TransactionStatus> {
        self.watched
            .read()
            .await
            .values()
            .map(|w| w.status.clone())
            .collect()
    }

    /// Register a callback for state changes of `hash`.
    ///
    /// Registration does not require the hash to be tracked yet, so a caller
    /// can subscribe before [`monitor`](Self::monitor) starts polling.
    pub async fn add_callback<F>(&self, hash: B256, callback: F) -> CallbackHandle
    where
        F: Fn(&TransactionStatus) + Send + Sync + 'static,
    {
        let handle = CallbackHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let callback: StatusCallback = Arc::new(callback);
        self.callbacks
            .write()
            .await
            .entry(hash)
            .or_default()
            .push((handle, callback));
        handle
    }

    /// Remove one registration. Returns false for an unknown handle.
    ///
    /// A dispatch already in flight still sees the callback.
    pub async fn remove_callback(&self, handle: CallbackHandle) -> bool {
        let mut callbacks = self.callbacks.write().await;
        let mut emptied = None;
        let mut removed = false;
        for (hash, registered) in callbacks.iter_mut() {
            if let Some(pos) = registered.iter().position(|(h, _)| *h == handle) {
                registered.remove(pos);
                removed = true;
                if registered.is_empty() {
                    emptied = Some(*hash);
                }
                break;
            }
        }
        if let Some(hash) = emptied {
            callbacks.remove(&hash);
        }
        removed
    }

    /// Stop polling `hash`, keeping its last snapshot
    pub async fn cancel(&self, hash: B256) -> Result<()> {
        let task = {
            let mut watched = self.watched.write().await;
            let entry = watched.get_mut(&hash).ok_or(Error::NotMonitored(hash))?;
            entry.cancel.send_replace(true);
            entry.task.take()
        };
        if let Some(task) = task {
            join(hash, task).await;
            tracing::info!(hash = %hash, "Monitoring cancelled");
        }
        Ok(())
    }

    /// Cancel and forget `hash` along with its callbacks, so it can be monitored again
    pub async fn remove(&self, hash: B256) -> Result<TransactionStatus> {
        let entry = self
            .watched
            .write()
            .await
            .remove(&hash)
            .ok_or(Error::NotMonitored(hash))?;
        entry.cancel.send_replace(true);
        if let Some(task) = entry.task {
            join(hash, task).await;
        }
        self.callbacks.write().await.remove(&hash);
        Ok(entry.status)
    }

    /// Cancel every polling task and drop all callback registrations.
    /// Snapshots stay readable.
    pub async fn shutdown(&self) {
        let tasks: Vec<(B256, JoinHandle<()>)> = {
            let mut watched = self.watched.write().await;
            watched
                .iter_mut()
                .filter_map(|(hash, w)| {
                    w.cancel.send_replace(true);
                    w.task.take().map(|task| (*hash, task))
                })
                .collect()
        };
        let count = tasks.len();
        for (hash, task) in tasks {
            join(hash, task).await;
        }
        self.callbacks.write().await.clear();
        tracing::info!(cancelled = count, "Transaction monitor shut down");
    }
}

impl Drop for TransactionMonitor {
    fn drop(&mut self) {
        if let Ok(watched) = self.watched.try_read() {
            for w in watched.values() {
                w.cancel.send_replace(true);
            }
        }
    }
}

async fn join(hash: B256, task: JoinHandle<()>) {
    if let Err(err) = task.await {
        tracing::debug!(hash = %hash, ?err, "Monitor task exited with error");
    }
}

/// Everything one polling task needs
struct Poller {
    hash: B256,
    ledger: Arc<dyn LedgerQuery>,
    poll_interval: Duration,
    max_query_retries: u32,
    watched: WatchMap,
    callbacks: CallbackMap,
}

impl Poller {
    async fn run(self, mut cancelled: watch::Receiver<bool>) {
        let hash = self.hash;
        let mut ticker = time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                biased;
                changed = cancelled.changed() => {
                    if changed.is_err() || *cancelled.borrow() {
                        return;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                changed = cancelled.changed() => {
                    if changed.is_err() || *cancelled.borrow() {
                        return;
                    }
                    continue;
                }
                outcome = self.ledger.receipt(hash) => outcome,
            };

            let next = match outcome {
                Ok(receipt) => TransactionStatus::mined(hash, &receipt),
                Err(LedgerError::NotFoundYet) => {
                    tracing::debug!(hash = %hash, "Receipt not found yet");
                    failures = 0;
                    continue;
                }
                Err(LedgerError::Query(reason)) => {
                    failures += 1;
                    if failures <= self.max_query_retries {
                        tracing::warn!(
                            hash = %hash,
                            attempt = failures,
                            error = %reason,
                            "Receipt query failed, retrying"
                        );
                        continue;
                    }
                    TransactionStatus::errored(hash, reason)
                }
            };

            if !self.settle(&next, &cancelled).await {
                return;
            }
            tracing::info!(
                hash = %hash,
                state = %next.state,
                block = ?next.block_number,
                "Transaction settled"
            );
            self.dispatch(&next).await;
            return;
        }
    }

    /// Store the terminal snapshot unless the hash was cancelled or removed meanwhile
    async fn settle(&self, next: &TransactionStatus, cancelled: &watch::Receiver<bool>) -> bool {
        let mut watched = self.watched.write().await;
        if *cancelled.borrow() {
            return false;
        }
        match watched.get_mut(&self.hash) {
            Some(entry) => {
                entry.status = next.clone();
                true
            }
            None => false,
        }
    }

    /// Invoke every callback registered for the hash, in registration order
    async fn dispatch(&self, status: &TransactionStatus) {
        let registered: Vec<StatusCallback> = self
            .callbacks
            .read()
            .await
            .get(&self.hash)
            .map(|cbs| cbs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        for callback in &registered {
            callback(status);
        }
        tracing::debug!(hash = %self.hash, callbacks = registered.len(), "Callbacks dispatched");
    }
}
