//! Transaction records: one broadcast (or queued) transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ChainId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub chain_id: ChainId,
    /// On-chain hash. Empty while a multisig proposal is still queued.
    #[serde(default)]
    pub hash: String,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    /// Deployment ids created by this transaction, in creation order.
    #[serde(default)]
    pub deployments: Vec<String>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_context: Option<SafeContext>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Id for a broadcast transaction.
    pub fn id_for_hash(hash: &str) -> String {
        format!("tx-{}", super::normalize_hex(hash))
    }

    /// Id for an entry of a queued multisig batch (no on-chain hash yet).
    pub fn id_for_safe_entry(safe_tx_hash: &str, batch_index: usize) -> String {
        format!("tx-{}-{}", super::normalize_hex(safe_tx_hash), batch_index)
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Executed,
    Failed,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executed => write!(f, "executed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(rename = "type")]
    pub operation_type: String,
    pub target: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeContext {
    pub safe_address: String,
    pub safe_tx_hash: String,
    pub batch_index: usize,
    pub proposer: String,
}
