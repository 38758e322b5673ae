//! Signing: secrets, the provider seam, transactions and batch signing
//!
//! Decrypted key material exists only inside [`SigningSecret`], and only
//! for the duration of a signing call.

pub mod batch;
pub(crate) mod signer;
pub mod transaction;
mod validator;

pub use batch::{
    batch_results_from_json, batch_results_to_json, BatchItemError, BatchSignResult, BatchSigner,
};
pub use signer::{LocalSigner, RecoveryError, SigningError, SigningProvider, SigningSecret};
pub use transaction::{MalformedTransaction, UnsignedTransaction};
pub use validator::{TransactionValidator, ValidationIssue};
