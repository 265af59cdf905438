use crate::scanners::{LedgerBlock, LedgerClient, LedgerReceipt};
use crate::utils::error::AppError;
use async_trait::async_trait;
use num_bigint::BigUint;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use web3::types::{Bytes, H160, H256, U256, U64};

/// JSON-RPC 2.0 client for an EVM node.
pub struct EvmRpcClient {
    api_url: String,
    client: Client,
}

impl EvmRpcClient {
    pub fn new(api_url: &str, request_timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AppError::NetworkError(e.to_string()))?;

        Ok(EvmRpcClient {
            api_url: api_url.to_string(),
            client,
        })
    }

    async fn make_request(&self, method: &str, params: Value) -> Result<Value, AppError> {
        debug!(method, %params, "rpc request");
        let response = self
            .client
            .post(&self.api_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params
            }))
            .send()
            .await
            .map_err(|e| AppError::NetworkError(e.to_string()))?
            .json::<Value>()
            .await
            .map_err(|e| AppError::JsonParseError(e.to_string()))?;

        if let Some(error) = response.get("error") {
            return Err(AppError::ApiError(format!("{}: {}", method, error)));
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, AppError> {
        let result = self.make_request(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| AppError::ParseError(format!("{} result: {}", method, e)))
    }
}

#[async_trait]
impl LedgerClient for EvmRpcClient {
    fn chain_name(&self) -> &str {
        "EVM"
    }

    async fn current_height(&self) -> Result<u64, AppError> {
        let height: U64 = self.call("eth_blockNumber", json!([])).await?;
        Ok(height.as_u64())
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<LedgerBlock>, AppError> {
        let block_hex = format!("0x{:x}", number);
        self.call("eth_getBlockByNumber", json!([block_hex, true]))
            .await
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<LedgerReceipt>, AppError> {
        self.call("eth_getTransactionReceipt", json!([hash])).await
    }

    async fn code_at(&self, address: H160) -> Result<Vec<u8>, AppError> {
        let code: Bytes = self.call("eth_getCode", json!([address, "latest"])).await?;
        Ok(code.0)
    }

    async fn balance_at(&self, address: H160) -> Result<BigUint, AppError> {
        let balance: U256 = self
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        let mut buf = [0u8; 32];
        balance.to_big_endian(&mut buf);
        Ok(BigUint::from_bytes_be(&buf))
    }
}
