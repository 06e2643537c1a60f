//! HTTP JSON-RPC implementation of the chain client capability.
//!
//! Uses `eth_blockNumber`, `eth_getLogs`, and `eth_getBlockByNumber` over
//! `reqwest`. Live subscriptions are served by a head-polling task: each
//! new head triggers a ranged log query, so the same capability works
//! against providers without WebSocket support.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use contestindex_core::error::IndexerError;

use crate::client::{parse_hex_u64, BlockHeader, ChainClient, LogFilter, RawLog};

/// Configuration for [`HttpChainClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
    /// Head-poll interval for emulated subscriptions.
    pub poll_interval: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// HTTP JSON-RPC chain client.
pub struct HttpChainClient {
    url: String,
    http: reqwest::Client,
    config: HttpClientConfig,
}

impl HttpChainClient {
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexerError::Rpc(format!("build http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            config,
        })
    }

    pub fn default_for(url: impl Into<String>) -> Result<Self, IndexerError> {
        Self::new(url, HttpClientConfig::default())
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, IndexerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(IndexerError::Rpc(format!("{method}: HTTP {status}")));
        }

        let resp: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{method}: {e}")))?;

        if let Some(err) = resp.error {
            return Err(IndexerError::Rpc(format!(
                "{method}: RPC {}: {}",
                err.code, err.message
            )));
        }
        resp.result
            .ok_or_else(|| IndexerError::Rpc(format!("{method}: empty result")))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn head_height(&self) -> Result<u64, IndexerError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| IndexerError::Rpc("eth_blockNumber: non-string result".into()))?;
        Ok(parse_hex_u64(hex))
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        let params = json!([{
            "address": filter.address,
            "topics": [filter.topic0],
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
        }]);
        let result = self.call("eth_getLogs", params).await?;
        serde_json::from_value(result).map_err(|e| IndexerError::Rpc(format!("eth_getLogs: {e}")))
    }

    async fn block(&self, number: u64) -> Result<BlockHeader, IndexerError> {
        let params = json!([format!("0x{number:x}"), false]);
        let result = match self.call("eth_getBlockByNumber", params).await {
            Ok(result) => result,
            // Providers refuse blocks past their finalized view with an
            // RPC error rather than a null result.
            Err(IndexerError::Rpc(msg))
                if msg.contains("unfinalized") || msg.contains("not finalized") =>
            {
                return Err(IndexerError::NotFinalized(number));
            }
            Err(e) => return Err(e),
        };
        if result.is_null() {
            return Err(IndexerError::BlockNotFound(number));
        }
        let timestamp = result["timestamp"]
            .as_str()
            .map(parse_hex_u64)
            .ok_or_else(|| IndexerError::Rpc("eth_getBlockByNumber: missing timestamp".into()))?;
        Ok(BlockHeader { number, timestamp })
    }

    /// Emulated push subscription: a background task polls the head height
    /// and forwards matching logs from each newly seen block range. The
    /// task exits when the receiver is dropped.
    async fn subscribe_logs(
        &self,
        address: &str,
        topic0: &str,
    ) -> Result<mpsc::UnboundedReceiver<RawLog>, IndexerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(
            HttpChainClient::new(self.url.clone(), self.config.clone())?,
        );
        let address = address.to_string();
        let topic0 = topic0.to_string();
        let poll_interval = self.config.poll_interval;

        tokio::spawn(async move {
            let mut last = match client.head_height().await {
                Ok(head) => head,
                Err(e) => {
                    tracing::warn!(error = %e, "log poll could not read head, closing stream");
                    return;
                }
            };
            loop {
                tokio::time::sleep(poll_interval).await;
                if tx.is_closed() {
                    return;
                }
                let head = match client.head_height().await {
                    Ok(head) => head,
                    Err(e) => {
                        tracing::warn!(error = %e, "log poll head lookup failed, closing stream");
                        return;
                    }
                };
                if head <= last {
                    continue;
                }
                let filter = LogFilter::new(address.clone(), topic0.clone()).range(last + 1, head);
                match client.logs(&filter).await {
                    Ok(logs) => {
                        for log in logs {
                            if tx.send(log).is_err() {
                                return;
                            }
                        }
                        last = head;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "log poll query failed, closing stream");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = HttpClientConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn rpc_response_parses_error_envelope() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"cannot query unfinalized data"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32005);
        assert!(err.message.contains("unfinalized"));
    }

    #[test]
    fn rpc_response_parses_result_envelope() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#;
        let resp: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.result.unwrap().as_str(), Some("0x10"));
        assert!(resp.error.is_none());
    }
}
