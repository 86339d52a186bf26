//! JSON-RPC 2.0 chain client: build a request, send it with bounded
//! exponential-backoff retries, surface a stable error taxonomy instead of
//! a raw transport error.

use super::abi::ContractCall;
use super::events::RawEvent;
use crate::config::{backoff_delay, DEFAULT_CHAIN_RETRIES};
use crate::crypto::SignerKey;
use crate::stake::StakeRecord;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainClientError {
    #[error("chain RPC transport error: {0}")]
    Transport(String),
    #[error("chain RPC returned an error: code {code}, {message}")]
    Rpc { code: i64, message: String },
    #[error("chain RPC response did not match the expected shape: {0}")]
    Decode(String),
    #[error("chain is unavailable after {attempts} attempts")]
    Unavailable { attempts: u32 },
}

#[derive(Debug, Clone, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    result: Option<Value>,
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

/// A page of chain events returned by `queryEvents`, paginated and ordered
/// by the chain.
#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<RawEvent>,
    pub next_cursor: Option<String>,
}

/// The outcome of submitting a signed transaction.
#[derive(Debug, Clone)]
pub struct TxResult {
    pub digest: String,
}

/// The chain operations this system needs: event querying/subscription,
/// transaction submission, and owned-object lookup for stake validation
/// Abstracted behind a trait so the gateway, listener and
/// stake validator can be exercised against an in-memory fake in tests.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn query_events(&self, module: &str, cursor: Option<&str>) -> Result<EventPage, ChainClientError>;

    /// Submit a signed transaction invoking `call`, signed by `signer`.
    async fn execute_transaction_block(&self, call: ContractCall, signer: &SignerKey) -> Result<TxResult, ChainClientError>;

    /// Enumerate the stake-pool objects owned by `wallet_hex`.
    async fn get_owned_objects(&self, wallet_hex: &str) -> Result<Vec<StakeRecord>, ChainClientError>;
}

/// A [`ChainClient`] backed by JSON-RPC 2.0 over HTTP, with the chain's
/// `subscribeEvent` websocket handled separately by the listener's push
/// path (see `bridge::listener`).
pub struct JsonRpcChainClient {
    http: Client,
    rpc_url: String,
    contract_package: String,
    max_retries: u32,
    request_counter: std::sync::atomic::AtomicU64,
}

impl JsonRpcChainClient {
    pub fn new(rpc_url: impl Into<String>, contract_package: impl Into<String>) -> Self {
        Self::with_timeout(rpc_url, contract_package, Duration::from_secs(10))
    }

    pub fn with_timeout(rpc_url: impl Into<String>, contract_package: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is valid");
        Self {
            http,
            rpc_url: rpc_url.into(),
            contract_package: contract_package.into(),
            max_retries: DEFAULT_CHAIN_RETRIES,
            request_counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> u64 {
        self.request_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    async fn call(&self, method: &'static str, params: Value) -> Result<Value, ChainClientError> {
        let request = JsonRpcRequest { jsonrpc: "2.0", id: self.next_id(), method, params };

        let mut last_error = None;
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1);
                warn!("retrying chain RPC {method} (attempt {}/{}) after {delay:?}", attempt + 1, self.max_retries);
                tokio::time::sleep(delay).await;
            }

            match self.call_once(&request).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    debug!("chain RPC {method} attempt {} failed: {err}", attempt + 1);
                    last_error = Some(err);
                }
            }
        }

        warn!("chain RPC {method} unavailable after {} attempts", self.max_retries);
        Err(last_error.unwrap_or(ChainClientError::Unavailable { attempts: self.max_retries }))
    }

    async fn call_once(&self, request: &JsonRpcRequest) -> Result<Value, ChainClientError> {
        let response = self
            .http
            .post(&self.rpc_url)
            .json(request)
            .send()
            .await
            .map_err(|e| ChainClientError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChainClientError::Transport(format!("HTTP {}", response.status())));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ChainClientError::Decode(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(ChainClientError::Rpc { code: error.code, message: error.message });
        }

        body.result.ok_or_else(|| ChainClientError::Decode("missing result field".to_string()))
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn query_events(&self, module: &str, cursor: Option<&str>) -> Result<EventPage, ChainClientError> {
        let params = json!({
            "filter": { "Package": self.contract_package, "Module": module },
            "cursor": cursor,
        });
        let result = self.call("queryEvents", params).await?;

        let events: Vec<RawEvent> = serde_json::from_value(
            result.get("data").cloned().unwrap_or(Value::Array(vec![])),
        )
        .map_err(|e| ChainClientError::Decode(e.to_string()))?;
        let next_cursor = result.get("nextCursor").and_then(Value::as_str).map(str::to_string);

        Ok(EventPage { events, next_cursor })
    }

    async fn execute_transaction_block(&self, call: ContractCall, signer: &SignerKey) -> Result<TxResult, ChainClientError> {
        let message = serde_json::to_vec(&call.arguments).map_err(|e| ChainClientError::Decode(e.to_string()))?;
        let signature = signer.sign(&message);

        let params = json!({
            "package": self.contract_package,
            "function": call.function,
            "arguments": call.arguments,
            "signer": signer.wallet().to_hex(),
            "signature": signature.to_hex(),
        });
        let result = self.call("executeTransactionBlock", params).await?;
        let digest = result
            .get("digest")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainClientError::Decode("missing digest field".to_string()))?
            .to_string();
        Ok(TxResult { digest })
    }

    async fn get_owned_objects(&self, wallet_hex: &str) -> Result<Vec<StakeRecord>, ChainClientError> {
        let params = json!({ "owner": wallet_hex, "filter": { "Package": self.contract_package } });
        let result = self.call("getOwnedObjects", params).await?;
        let records: Vec<StakeRecord> = serde_json::from_value(
            result.get("data").cloned().unwrap_or(Value::Array(vec![])),
        )
        .map_err(|e| ChainClientError::Decode(e.to_string()))?;
        Ok(records)
    }
}
