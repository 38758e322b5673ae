//! Unsigned transactions and their signing digests

use alloy::consensus::{SignableTransaction, TxLegacy};
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use serde::{Deserialize, Serialize};

/// An EIP-155 legacy transaction awaiting a signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub nonce: u64,
    /// Gas price in wei
    pub gas_price: u128,
    pub gas_limit: u64,
    /// Recipient; `None` deploys a contract
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
    pub chain_id: u64,
}

/// Why a transaction cannot be turned into a digest
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MalformedTransaction {
    #[error("chain id must be non-zero")]
    MissingChainId,
    #[error("gas limit must be non-zero")]
    ZeroGasLimit,
    #[error("contract creation requires init code")]
    EmptyCreation,
}

impl UnsignedTransaction {
    /// Structural checks that make a transaction unsignable regardless of policy
    pub fn check_well_formed(&self) -> Result<(), MalformedTransaction> {
        if self.chain_id == 0 {
            return Err(MalformedTransaction::MissingChainId);
        }
        if self.gas_limit == 0 {
            return Err(MalformedTransaction::ZeroGasLimit);
        }
        if self.to.is_none() && self.data.is_empty() {
            return Err(MalformedTransaction::EmptyCreation);
        }
        Ok(())
    }

    /// The 32-byte digest a signer must sign (EIP-155 replay protected)
    pub fn signing_digest(&self) -> Result<B256, MalformedTransaction> {
        self.check_well_formed()?;
        Ok(self.to_legacy().signature_hash())
    }

    fn to_legacy(&self) -> TxLegacy {
        TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: match self.to {
                Some(address) => TxKind::Call(address),
                None => TxKind::Create,
            },
            value: self.value,
            input: self.data.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy::primitives::address;

    pub(crate) fn transfer(nonce: u64) -> UnsignedTransaction {
        UnsignedTransaction {
            nonce,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Some(address!("3535353535353535353535353535353535353535")),
            value: U256::from(1_000_000_000_000_000_000u128),
            data: Bytes::new(),
            chain_id: 1,
        }
    }

    #[test]
    fn test_eip155_reference_digest() {
        // Reference vector published with EIP-155
        let tx = UnsignedTransaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Some(address!("3535353535353535353535353535353535353535")),
            value: U256::from(1_000_000_000_000_000_000u128),
            data: Bytes::new(),
            chain_id: 1,
        };

        let digest = tx.signing_digest().unwrap();
        assert_eq!(
            format!("{:x}", digest),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn test_digest_depends_on_nonce() {
        assert_ne!(
            transfer(1).signing_digest().unwrap(),
            transfer(2).signing_digest().unwrap()
        );
    }

    #[test]
    fn test_malformed_transactions() {
        let mut tx = transfer(0);
        tx.chain_id = 0;
        assert_eq!(
            tx.signing_digest(),
            Err(MalformedTransaction::MissingChainId)
        );

        let mut tx = transfer(0);
        tx.gas_limit = 0;
        assert_eq!(tx.signing_digest(), Err(MalformedTransaction::ZeroGasLimit));

        let mut tx = transfer(0);
        tx.to = None;
        assert_eq!(tx.signing_digest(), Err(MalformedTransaction::EmptyCreation));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::json!({
            "nonce": 3,
            "gasPrice": 1000,
            "gasLimit": 21000,
            "to": "0x3535353535353535353535353535353535353535",
            "value": "0x10",
            "chainId": 137
        });
        let tx: UnsignedTransaction = serde_json::from_value(json).unwrap();
        assert_eq!(tx.chain_id, 137);
        assert_eq!(tx.value, U256::from(16));
        assert!(tx.data.is_empty());
    }
}
