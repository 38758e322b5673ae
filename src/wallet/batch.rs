//! Concurrent batch signing
//!
//! Each request is signed on its own blocking task, at most `workers` at a
//! time. Every task carries its request index, so results are placed by
//! index rather than completion order. A failing request only affects its
//! own slot.

use alloy::primitives::{Bytes, B256};
use alloy::signers::Signature;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::wallet::{SigningProvider, SigningSecret, TransactionValidator, UnsignedTransaction};
use crate::Result;

/// Why one request in a batch produced no signature
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum BatchItemError {
    #[error("malformed transaction: {0}")]
    Malformed(String),

    #[error("rejected by validation: {0}")]
    Invalid(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("signing worker failed: {0}")]
    Worker(String),
}

/// Outcome for one request. Exactly one of `signature` / `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSignResult {
    pub index: usize,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<B256>,
    /// 65-byte `r || s || v` signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchItemError>,
}

impl BatchSignResult {
    fn signed(index: usize, digest: B256, signature: Signature) -> Self {
        Self {
            index,
            transaction_id: format!("tx_{}", index),
            digest: Some(digest),
            signature: Some(Bytes::copy_from_slice(&signature.as_bytes())),
            error: None,
        }
    }

    fn failed(index: usize, error: BatchItemError) -> Self {
        Self {
            index,
            transaction_id: format!("tx_{}", index),
            digest: None,
            signature: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Parse the stored signature bytes
    pub fn parsed_signature(&self) -> Option<Signature> {
        let bytes = self.signature.as_ref()?;
        Signature::try_from(&bytes[..]).ok()
    }
}

/// Signs many transactions with one secret over a bounded worker pool
pub struct BatchSigner {
    provider: Arc<dyn SigningProvider>,
    workers: usize,
    validator: Option<Arc<TransactionValidator>>,
}

impl BatchSigner {
    /// Create a batch signer with a worker limit (clamped to at least one)
    pub fn new(provider: Arc<dyn SigningProvider>, workers: usize) -> Self {
        Self {
            provider,
            workers: workers.max(1),
            validator: None,
        }
    }

    /// Reject requests that violate the validator's limits
    pub fn with_validator(mut self, validator: TransactionValidator) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Sign one transaction exactly as a batch item would be signed
    pub fn sign_single(
        &self,
        secret: &SigningSecret,
        tx: &UnsignedTransaction,
    ) -> std::result::Result<(B256, Signature), BatchItemError> {
        sign_one(self.provider.as_ref(), self.validator.as_deref(), secret, tx)
    }

    /// Sign every request; returns one result per request, in request order.
    ///
    /// The secret is shared read-only by all workers and cleared once the
    /// last of them finishes.
    pub async fn sign_batch(
        &self,
        secret: SigningSecret,
        requests: Vec<UnsignedTransaction>,
    ) -> Vec<BatchSignResult> {
        let total = requests.len();
        let started = Instant::now();
        let secret = Arc::new(secret);

        let outcomes: Vec<(usize, std::result::Result<(B256, Signature), BatchItemError>)> =
            stream::iter(requests.into_iter().enumerate())
                .map(|(index, tx)| {
                    let secret = Arc::clone(&secret);
                    let provider = Arc::clone(&self.provider);
                    let validator = self.validator.clone();
                    async move {
                        let outcome = tokio::task::spawn_blocking(move || {
                            sign_one(provider.as_ref(), validator.as_deref(), &secret, &tx)
                        })
                        .await
                        .unwrap_or_else(|e| Err(BatchItemError::Worker(e.to_string())));
                        (index, outcome)
                    }
                })
                .buffer_unordered(self.workers)
                .collect()
                .await;

        match Arc::try_unwrap(secret) {
            Ok(mut secret) => secret.clear(),
            Err(_) => tracing::warn!("Signing secret still shared after batch; cleared on drop"),
        }

        let mut slots: Vec<Option<BatchSignResult>> = vec![None; total];
        for (index, outcome) in outcomes {
            let result = match outcome {
                Ok((digest, signature)) => BatchSignResult::signed(index, digest, signature),
                Err(error) => {
                    tracing::warn!(index, error = %error, "Batch item failed");
                    BatchSignResult::failed(index, error)
                }
            };
            slots[index] = Some(result);
        }

        let results: Vec<BatchSignResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    BatchSignResult::failed(
                        index,
                        BatchItemError::Worker("no result produced".to_string()),
                    )
                })
            })
            .collect();

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        tracing::info!(
            total,
            signed = total - failed,
            failed,
            workers = self.workers,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch signing finished"
        );

        results
    }
}

fn sign_one(
    provider: &dyn SigningProvider,
    validator: Option<&TransactionValidator>,
    secret: &SigningSecret,
    tx: &UnsignedTransaction,
) -> std::result::Result<(B256, Signature), BatchItemError> {
    if let Some(validator) = validator {
        let issues = validator.validate(tx);
        if !issues.is_empty() {
            let joined: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
            return Err(BatchItemError::Invalid(joined.join("; ")));
        }
    }

    let digest = tx
        .signing_digest()
        .map_err(|e| BatchItemError::Malformed(e.to_string()))?;
    let signature = provider
        .sign_digest(&digest, secret)
        .map_err(|e| BatchItemError::Signing(e.0))?;
    Ok((digest, signature))
}

/// Serialize batch results as pretty JSON
pub fn batch_results_to_json(results: &[BatchSignResult]) -> Result<String> {
    Ok(serde_json::to_string_pretty(results)?)
}

/// Parse batch results from JSON
pub fn batch_results_from_json(json: &str) -> Result<Vec<BatchSignResult>> {
    Ok(serde_json::from_str(json)?)
}
