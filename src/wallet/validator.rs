//! Policy validation of unsigned transactions
//!
//! Unlike [`UnsignedTransaction::check_well_formed`], which rejects
//! transactions that cannot be signed at all, these checks enforce operator
//! limits on gas and value. All violations are reported, not just the first.

use serde::Serialize;

use crate::config::ValidationLimits;
use crate::wallet::UnsignedTransaction;

/// One violated limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Checks transactions against configured limits
#[derive(Debug, Clone, Default)]
pub struct TransactionValidator {
    limits: ValidationLimits,
}

impl TransactionValidator {
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Return every limit the transaction violates (empty = valid)
    pub fn validate(&self, tx: &UnsignedTransaction) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let limits = &self.limits;

        if tx.gas_price < limits.min_gas_price {
            issues.push(ValidationIssue {
                field: "gasPrice",
                message: format!(
                    "gas price too low: {} < {}",
                    tx.gas_price, limits.min_gas_price
                ),
            });
        }
        if tx.gas_price > limits.max_gas_price {
            issues.push(ValidationIssue {
                field: "gasPrice",
                message: format!(
                    "gas price too high: {} > {}",
                    tx.gas_price, limits.max_gas_price
                ),
            });
        }

        if tx.gas_limit > limits.max_gas_limit {
            issues.push(ValidationIssue {
                field: "gasLimit",
                message: format!(
                    "gas limit too high: {} > {}",
                    tx.gas_limit, limits.max_gas_limit
                ),
            });
        }

        if tx.value > limits.max_value {
            issues.push(ValidationIssue {
                field: "value",
                message: format!("value too high: {} > {}", tx.value, limits.max_value),
            });
        }

        if tx.to.is_none() && tx.data.is_empty() {
            issues.push(ValidationIssue {
                field: "to",
                message: "recipient address is required".to_string(),
            });
        }

        if tx.chain_id == 0 {
            issues.push(ValidationIssue {
                field: "chainId",
                message: "valid chain ID is required".to_string(),
            });
        }

        issues
    }
}
