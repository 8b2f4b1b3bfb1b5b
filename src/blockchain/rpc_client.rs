use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::blockchain::ChainClient;
use crate::error::{DecodeError, IndexerError, NetworkError, Result};
use crate::logging::{LogContext, MetricsLogger, PerformanceMonitor};
use crate::models::{format_quantity, parse_quantity, Block};

pub const JSONRPC_VERSION: &str = "2.0";
pub const METHOD_BLOCK_NUMBER: &str = "eth_blockNumber";
pub const METHOD_GET_BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

// Matched by shape only; the echoed id is not checked.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// JSON-RPC client for an Ethereum-compatible node
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    endpoint: String,
    timeout_seconds: u64,
}

impl RpcClient {
    pub fn new(endpoint: String) -> Result<Self> {
        Self::new_with_config(endpoint, 30)
    }

    pub fn new_with_config(endpoint: String, timeout_seconds: u64) -> Result<Self> {
        LogContext::new("rpc_client", "initialization")
            .with_metadata("endpoint", serde_json::json!(endpoint))
            .with_metadata("timeout_seconds", serde_json::json!(timeout_seconds))
            .info("Initializing RPC client");

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(NetworkError::Http)?;

        Ok(Self {
            client,
            endpoint,
            timeout_seconds,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one request, racing it against `cancel`
    async fn call<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T> {
        let monitor = PerformanceMonitor::new(&format!("rpc_{}", method));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IndexerError::Network(NetworkError::Cancelled)),
            result = self.send(method, params) => result,
        };

        let duration = monitor.finish_with_result(&result);
        MetricsLogger::log_rpc_call(method, duration, result.is_ok());

        serde_json::from_value(result?).map_err(|e| IndexerError::Decode(DecodeError::Json(e)))
    }

    async fn send(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: rand::random::<u32>() as u64,
            method,
            params,
        };

        LogContext::new("rpc_client", "send")
            .with_metadata("method", serde_json::json!(method))
            .with_metadata("id", serde_json::json!(request.id))
            .trace(&format!("Sending RPC request: {}", method));

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                status: status.as_u16(),
            }
            .into());
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        let rpc_response: JsonRpcResponse = serde_json::from_slice(&body).map_err(DecodeError::Json)?;

        if let Some(error) = rpc_response.error {
            return Err(NetworkError::Rpc {
                code: error.code,
                message: error.message,
            }
            .into());
        }

        match rpc_response.result {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(DecodeError::MissingResult {
                method: method.to_string(),
            }
            .into()),
        }
    }

    fn classify(&self, error: reqwest::Error) -> IndexerError {
        let network = if error.is_timeout() {
            NetworkError::Timeout {
                seconds: self.timeout_seconds,
            }
        } else if error.is_connect() {
            NetworkError::Connection(error.to_string())
        } else {
            NetworkError::Http(error)
        };
        IndexerError::Network(network)
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn get_current_block_number(&self, cancel: &CancellationToken) -> Result<u64> {
        let hex: String = self.call(cancel, METHOD_BLOCK_NUMBER, Vec::new()).await?;
        Ok(parse_quantity(&hex)?)
    }

    async fn get_block_by_number(&self, cancel: &CancellationToken, number: u64) -> Result<Block> {
        let params = vec![
            Value::String(format_quantity(number)),
            Value::Bool(true), // full transaction objects
        ];
        let block: Block = self.call(cancel, METHOD_GET_BLOCK_BY_NUMBER, params).await?;

        LogContext::new("rpc_client", "get_block_by_number")
            .with_block_number(number)
            .with_metadata("transaction_count", serde_json::json!(block.transactions.len()))
            .debug(&format!(
                "Retrieved block {} with {} transactions",
                number,
                block.transactions.len()
            ));

        Ok(block)
    }
}
