//! After signing: watching transactions settle and recording them
//!
//! - [`ledger`]: receipt lookups
//! - [`monitor`]: per-hash polling state machines with callbacks
//! - [`history`]: the persisted record of settled transactions

pub mod history;
pub mod ledger;
pub mod monitor;

pub use history::{HistoryStore, TransactionRecord, TransferDetails};
pub use ledger::{LedgerError, LedgerQuery, Receipt, RpcLedger};
pub use monitor::{
    CallbackHandle, StatusCallback, TransactionMonitor, TransactionState, TransactionStatus,
};
