//! Safe API collaborator: execution state of queued multisig batches.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::error::{Result, TrebError};
use crate::types::{ChainId, Confirmation};

/// What the Safe service knows about one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeTxState {
    pub confirmations: Vec<Confirmation>,
    pub confirmations_required: u32,
    pub executed: bool,
    pub execution_tx_hash: Option<String>,
    /// `Some(false)` when the execution transaction reverted.
    pub is_successful: Option<bool>,
    pub executed_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait SafeApiClient: Send + Sync {
    async fn get_transaction(&self, chain_id: ChainId, safe_tx_hash: &str) -> Result<SafeTxState>;
}

/// Safe Transaction Service base URL for well-known chains.
pub fn default_service_url(chain_id: ChainId) -> Option<&'static str> {
    match chain_id {
        1 => Some("https://safe-transaction-mainnet.safe.global"),
        10 => Some("https://safe-transaction-optimism.safe.global"),
        56 => Some("https://safe-transaction-bsc.safe.global"),
        100 => Some("https://safe-transaction-gnosis-chain.safe.global"),
        137 => Some("https://safe-transaction-polygon.safe.global"),
        8453 => Some("https://safe-transaction-base.safe.global"),
        42161 => Some("https://safe-transaction-arbitrum.safe.global"),
        84532 => Some("https://safe-transaction-base-sepolia.safe.global"),
        11155111 => Some("https://safe-transaction-sepolia.safe.global"),
        _ => None,
    }
}

/// REST client for the Safe Transaction Service.
#[derive(Debug, Clone)]
pub struct SafeServiceClient {
    http: reqwest::Client,
    overrides: BTreeMap<ChainId, Url>,
}

impl SafeServiceClient {
    /// `overrides` take precedence over [`default_service_url`].
    pub fn new(overrides: BTreeMap<ChainId, Url>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrebError::external("safe-api", e.to_string()))?;
        Ok(Self { http, overrides })
    }

    fn base_url(&self, chain_id: ChainId) -> Result<Url> {
        if let Some(url) = self.overrides.get(&chain_id) {
            return Ok(url.clone());
        }
        let raw = default_service_url(chain_id).ok_or_else(|| {
            TrebError::external(
                "safe-api",
                format!("no Safe Transaction Service known for chain {}", chain_id),
            )
        })?;
        Url::parse(raw).map_err(|e| TrebError::external("safe-api", e.to_string()))
    }

    /// `Url::join` replaces the last path segment unless the base ends in `/`.
    fn transaction_url(&self, chain_id: ChainId, safe_tx_hash: &str) -> Result<Url> {
        let mut base = self.base_url(chain_id)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(&format!("api/v1/multisig-transactions/{}/", safe_tx_hash))
            .map_err(|e| TrebError::external("safe-api", e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultisigTransactionResponse {
    #[serde(default)]
    confirmations: Vec<ConfirmationResponse>,
    #[serde(default)]
    confirmations_required: Option<u32>,
    #[serde(default)]
    is_executed: bool,
    #[serde(default)]
    is_successful: Option<bool>,
    #[serde(default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    execution_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmationResponse {
    owner: String,
    #[serde(default)]
    signature: Option<String>,
    submission_date: DateTime<Utc>,
}

impl From<MultisigTransactionResponse> for SafeTxState {
    fn from(response: MultisigTransactionResponse) -> Self {
        Self {
            confirmations: response
                .confirmations
                .into_iter()
                .map(|c| Confirmation {
                    signer: c.owner,
                    signature: c.signature.unwrap_or_default(),
                    confirmed_at: c.submission_date,
                })
                .collect(),
            confirmations_required: response.confirmations_required.unwrap_or_default(),
            executed: response.is_executed,
            execution_tx_hash: response.transaction_hash,
            is_successful: response.is_successful,
            executed_at: response.execution_date,
        }
    }
}

#[async_trait]
impl SafeApiClient for SafeServiceClient {
    async fn get_transaction(&self, chain_id: ChainId, safe_tx_hash: &str) -> Result<SafeTxState> {
        let url = self.transaction_url(chain_id, safe_tx_hash)?;

        let response: MultisigTransactionResponse = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| TrebError::external("safe-api", format!("{}: {}", safe_tx_hash, e)))?
            .error_for_status()
            .map_err(|e| TrebError::external("safe-api", format!("{}: {}", safe_tx_hash, e)))?
            .json()
            .await
            .map_err(|e| TrebError::external("safe-api", format!("{}: {}", safe_tx_hash, e)))?;

        Ok(response.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_maps_to_state() {
        let raw = r#"{
            "confirmations": [
                {"owner": "0xA1", "signature": "0xsig", "submissionDate": "2024-01-01T00:00:00Z"}
            ],
            "confirmationsRequired": 2,
            "isExecuted": true,
            "isSuccessful": true,
            "transactionHash": "0xexec",
            "executionDate": "2024-01-02T00:00:00Z"
        }"#;
        let response: MultisigTransactionResponse =
            serde_json::from_str(raw).expect("response should parse");
        let state = SafeTxState::from(response);

        assert_eq!(state.confirmations.len(), 1);
        assert_eq!(state.confirmations[0].signer, "0xA1");
        assert_eq!(state.confirmations_required, 2);
        assert!(state.executed);
        assert_eq!(state.execution_tx_hash.as_deref(), Some("0xexec"));
    }

    #[test]
    fn base_url_prefers_override() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            31337,
            Url::parse("http://localhost:8000/").expect("valid url"),
        );
        let client = SafeServiceClient::new(overrides, Duration::from_secs(5))
            .expect("client should build");

        assert_eq!(
            client.base_url(31337).expect("override").as_str(),
            "http://localhost:8000/"
        );
        assert!(client.base_url(1).is_ok());
        assert!(client.base_url(999_999).is_err());
    }

    #[test]
    fn transaction_url_keeps_override_path() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            31337,
            Url::parse("http://localhost:8000/tx-service").expect("valid url"),
        );
        let client = SafeServiceClient::new(overrides, Duration::from_secs(5))
            .expect("client should build");

        assert_eq!(
            client
                .transaction_url(31337, "0xabc")
                .expect("url should build")
                .as_str(),
            "http://localhost:8000/tx-service/api/v1/multisig-transactions/0xabc/"
        );
        assert_eq!(
            client
                .transaction_url(1, "0xabc")
                .expect("url should build")
                .as_str(),
            "https://safe-transaction-mainnet.safe.global/api/v1/multisig-transactions/0xabc/"
        );
    }
}
