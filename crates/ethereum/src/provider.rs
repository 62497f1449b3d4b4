use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quarry_common::{hex, BlockHash, BlockNumber, ContractAddress, TransactionHash};
use reqwest::Url;
use serde_json::{json, Map, Value};

/// Error returned by [EthereumApi] calls.
#[derive(Debug, thiserror::Error)]
pub enum EthereumError {
    /// The HTTP round-trip failed: connect, timeout or body decode.
    #[error("transport error")]
    Transport(#[from] reqwest::Error),
    /// The endpoint answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// The response carried no usable `result` for the method.
    #[error("malformed {method} response")]
    MalformedResponse { method: &'static str },
}

/// Contains only those JSON-RPC methods the ingestion pipeline uses.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait::async_trait]
pub trait EthereumApi {
    /// The chain-tip height (`eth_blockNumber`).
    async fn block_number(&self) -> Result<BlockNumber, EthereumError>;

    /// The raw block at `number` with full transaction bodies
    /// (`eth_getBlockByNumber`).
    async fn block_by_number(
        &self,
        number: BlockNumber,
    ) -> Result<Map<String, Value>, EthereumError>;

    /// The raw uncle block at `index` of the block identified by
    /// `block_hash` (`eth_getUncleByBlockHashAndIndex`).
    async fn uncle_by_block_hash_and_index(
        &self,
        block_hash: &BlockHash,
        index: usize,
    ) -> Result<Map<String, Value>, EthereumError>;

    /// The raw receipt of `transaction` (`eth_getTransactionReceipt`).
    async fn transaction_receipt(
        &self,
        transaction: &TransactionHash,
    ) -> Result<Map<String, Value>, EthereumError>;

    /// The deployed bytecode at `address`, read at the `latest` tag
    /// (`eth_getCode`).
    async fn code(&self, address: &ContractAddress) -> Result<String, EthereumError>;
}

/// Correlation id stamped into each request; unique within the process.
static REQUEST_ID: AtomicU64 = AtomicU64::new(0);

/// Ethereum JSON-RPC 2.0 client over HTTP.
///
/// No retries happen at this layer; failure policy belongs to the batch
/// coordinator driving the calls.
#[derive(Clone, Debug)]
pub struct EthereumClient {
    /// This client is internally refcounted.
    inner: reqwest::Client,
    url: Url,
}

impl EthereumClient {
    /// Creates a client for the given endpoint.
    pub fn new(url: Url) -> Result<Self, EthereumError> {
        Ok(Self {
            inner: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .user_agent(quarry_common::consts::USER_AGENT)
                .build()?,
            url,
        })
    }

    /// Posts one JSON-RPC 2.0 request and unwraps its `result`.
    ///
    /// A `null` result is treated the same as an absent one: every method
    /// the pipeline uses expects a value, and `null` is how the endpoint
    /// spells "no such block/receipt".
    async fn call(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<Value, EthereumError> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": REQUEST_ID.fetch_add(1, Ordering::Relaxed),
        });

        let mut response: Value = self
            .inner
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error").filter(|error| !error.is_null()) {
            return Err(EthereumError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            });
        }

        match response.get_mut("result") {
            Some(result) if !result.is_null() => Ok(result.take()),
            _ => Err(EthereumError::MalformedResponse { method }),
        }
    }

    /// Like [call](Self::call) but for methods whose result is an object.
    async fn call_object(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<Map<String, Value>, EthereumError> {
        match self.call(method, params).await? {
            Value::Object(object) => Ok(object),
            _ => Err(EthereumError::MalformedResponse { method }),
        }
    }
}

#[async_trait::async_trait]
impl EthereumApi for EthereumClient {
    #[tracing::instrument(skip(self))]
    async fn block_number(&self) -> Result<BlockNumber, EthereumError> {
        const METHOD: &str = "eth_blockNumber";
        let malformed = || EthereumError::MalformedResponse { method: METHOD };

        let result = self.call(METHOD, json!([])).await?;
        let number = result
            .as_str()
            .and_then(|raw| hex::parse_quantity(raw).ok())
            .ok_or_else(malformed)?;

        BlockNumber::new(number).ok_or_else(malformed)
    }

    #[tracing::instrument(skip(self))]
    async fn block_by_number(
        &self,
        number: BlockNumber,
    ) -> Result<Map<String, Value>, EthereumError> {
        self.call_object(
            "eth_getBlockByNumber",
            json!([hex::encode_quantity(number.get()), true]),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn uncle_by_block_hash_and_index(
        &self,
        block_hash: &BlockHash,
        index: usize,
    ) -> Result<Map<String, Value>, EthereumError> {
        self.call_object(
            "eth_getUncleByBlockHashAndIndex",
            json!([block_hash.as_str(), hex::encode_quantity(index as u64)]),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn transaction_receipt(
        &self,
        transaction: &TransactionHash,
    ) -> Result<Map<String, Value>, EthereumError> {
        self.call_object("eth_getTransactionReceipt", json!([transaction.as_str()]))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn code(&self, address: &ContractAddress) -> Result<String, EthereumError> {
        const METHOD: &str = "eth_getCode";

        let result = self.call(METHOD, json!([address.as_str(), "latest"])).await?;
        result
            .as_str()
            .map(str::to_owned)
            .ok_or(EthereumError::MalformedResponse { method: METHOD })
    }
}
