//! Chain client collaborator: receipts and code presence over JSON-RPC.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use url::Url;

use crate::error::{Result, TrebError};
use crate::types::ChainId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success { block_number: Option<u64> },
    Reverted { block_number: Option<u64> },
    /// No receipt (unknown or not yet mined).
    NotFound,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_receipt(&self, chain_id: ChainId, tx_hash: &str) -> Result<ReceiptStatus>;

    async fn address_exists(&self, chain_id: ChainId, address: &str) -> Result<bool>;
}

/// Plain JSON-RPC client, one endpoint per chain.
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    http: reqwest::Client,
    endpoints: BTreeMap<ChainId, Url>,
}

impl RpcChainClient {
    pub fn new(endpoints: BTreeMap<ChainId, Url>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrebError::external("rpc", e.to_string()))?;
        Ok(Self { http, endpoints })
    }

    async fn call(&self, chain_id: ChainId, method: &str, params: Value) -> Result<Value> {
        let endpoint = self.endpoints.get(&chain_id).ok_or_else(|| {
            TrebError::external("rpc", format!("no RPC endpoint configured for chain {}", chain_id))
        })?;

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: Value = self
            .http
            .post(endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| TrebError::external("rpc", format!("{} on chain {}: {}", method, chain_id, e)))?
            .error_for_status()
            .map_err(|e| TrebError::external("rpc", format!("{} on chain {}: {}", method, chain_id, e)))?
            .json()
            .await
            .map_err(|e| TrebError::external("rpc", format!("{} on chain {}: {}", method, chain_id, e)))?;

        if let Some(error) = response.get("error") {
            return Err(TrebError::external(
                "rpc",
                format!("{} on chain {} returned {}", method, chain_id, error),
            ));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_receipt(&self, chain_id: ChainId, tx_hash: &str) -> Result<ReceiptStatus> {
        let result = self
            .call(chain_id, "eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        Ok(parse_receipt(&result))
    }

    async fn address_exists(&self, chain_id: ChainId, address: &str) -> Result<bool> {
        let result = self
            .call(chain_id, "eth_getCode", json!([address, "latest"]))
            .await?;
        Ok(has_code(&result))
    }
}

fn parse_receipt(result: &Value) -> ReceiptStatus {
    if result.is_null() {
        return ReceiptStatus::NotFound;
    }
    let block_number = result
        .get("blockNumber")
        .and_then(Value::as_str)
        .and_then(parse_quantity);
    match result.get("status").and_then(Value::as_str) {
        Some("0x0") => ReceiptStatus::Reverted { block_number },
        _ => ReceiptStatus::Success { block_number },
    }
}

fn has_code(result: &Value) -> bool {
    result
        .as_str()
        .map(|code| {
            let hex = code.trim_start_matches("0x");
            !hex.is_empty() && hex.chars().any(|c| c != '0')
        })
        .unwrap_or(false)
}

fn parse_quantity(hex: &str) -> Option<u64> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok()
}
