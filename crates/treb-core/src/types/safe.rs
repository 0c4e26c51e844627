//! Multisig (Safe) batches awaiting co-signatures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChainId, same_address};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTransaction {
    pub safe_tx_hash: String,
    pub safe_address: String,
    pub chain_id: ChainId,
    pub status: SafeTxStatus,
    pub nonce: u64,
    #[serde(default)]
    pub transactions: Vec<SafeBatchEntry>,
    /// Registry transaction ids backed by this batch, in batch order.
    #[serde(default)]
    pub transaction_ids: Vec<String>,
    #[serde(default)]
    pub proposed_by: String,
    pub proposed_at: DateTime<Utc>,
    #[serde(default)]
    pub confirmations: Vec<Confirmation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_tx_hash: Option<String>,
}

impl SafeTransaction {
    pub fn is_queued(&self) -> bool {
        self.status == SafeTxStatus::Queued
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_queued()
    }

    pub fn has_confirmation_from(&self, signer: &str) -> bool {
        self.confirmations
            .iter()
            .any(|c| same_address(&c.signer, signer))
    }

    /// Add confirmations from signers not seen before. Returns how many were added.
    ///
    /// Previously recorded confirmations are never dropped.
    pub fn merge_confirmations<I>(&mut self, observed: I) -> usize
    where
        I: IntoIterator<Item = Confirmation>,
    {
        let mut added = 0;
        for confirmation in observed {
            if !self.has_confirmation_from(&confirmation.signer) {
                self.confirmations.push(confirmation);
                added += 1;
            }
        }
        added
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafeTxStatus {
    Queued,
    Executed,
    Failed,
}

impl std::fmt::Display for SafeTxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Executed => write!(f, "executed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeBatchEntry {
    pub to: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub data: String,
    /// 0 = call, 1 = delegatecall
    #[serde(default)]
    pub operation: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub signer: String,
    #[serde(default)]
    pub signature: String,
    pub confirmed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmation(signer: &str) -> Confirmation {
        Confirmation {
            signer: signer.to_string(),
            signature: format!("sig-{}", signer),
            confirmed_at: Utc::now(),
        }
    }

    #[test]
    fn merge_keeps_union_of_signers() {
        let mut safe_tx = SafeTransaction {
            safe_tx_hash: "0xsafe".to_string(),
            safe_address: "0x5afe".to_string(),
            chain_id: 1,
            status: SafeTxStatus::Queued,
            nonce: 0,
            transactions: Vec::new(),
            transaction_ids: Vec::new(),
            proposed_by: "0x01".to_string(),
            proposed_at: Utc::now(),
            confirmations: vec![confirmation("0xA1")],
            executed_at: None,
            execution_tx_hash: None,
        };

        let added = safe_tx.merge_confirmations(vec![confirmation("0xa1"), confirmation("0xB2")]);
        assert_eq!(added, 1);
        assert_eq!(safe_tx.confirmations.len(), 2);

        // Observing fewer signers never removes existing ones.
        let added = safe_tx.merge_confirmations(Vec::new());
        assert_eq!(added, 0);
        assert_eq!(safe_tx.confirmations.len(), 2);
    }
}
