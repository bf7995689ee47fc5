/// Chain-client binding layer.
///
/// `ChainClient` is the seam between the engine and the JSON-RPC node. The ethers-backed
/// implementation is the only code that looks at raw node error text; everything above it
/// works with the typed `ChainError`.
use anyhow::Result;
use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use log::debug;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::common::constants::RPC_REQUEST_TIMEOUT_SECS;

pub type ChainResult<T> = Result<T, ChainError>;

/// Typed classification of everything a node call can fail with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// A transaction with the same nonce is pending and pays more.
    #[error("replacement transaction underpriced")]
    Underpriced,
    /// The nonce was already used.
    #[error("nonce too low")]
    NonceTooLow,
    /// Execution ran out of gas or the intrinsic gas was too low.
    #[error("out of gas")]
    OutOfGas,
    /// Contract execution reverted.
    #[error("execution reverted: {0}")]
    Reverted(String),
    /// The node could not be reached, or answered as if it were out of sync.
    #[error("node unavailable: {0}")]
    Unavailable(String),
    /// The node answered with something that could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Any other node-side rejection.
    #[error("{0}")]
    Other(String),
}

impl ChainError {
    /// Maps a JSON-RPC error message onto a typed error.
    pub fn from_rpc_message(message: &str) -> Self {
        let msg = message.to_ascii_lowercase().replace('_', " ");
        if msg.contains("underpriced") {
            ChainError::Underpriced
        } else if msg.contains("nonce too low") {
            ChainError::NonceTooLow
        } else if msg.contains("out of gas") || msg.contains("intrinsic gas too low") {
            ChainError::OutOfGas
        } else if msg.contains("revert") {
            ChainError::Reverted(message.to_string())
        } else if msg.contains("header not found") || msg.contains("missing trie node") {
            ChainError::Unavailable(message.to_string())
        } else {
            ChainError::Other(message.to_string())
        }
    }

    /// Node desync or unreachable node, worth retrying the whole account.
    pub fn is_transient_infrastructure(&self) -> bool {
        matches!(self, ChainError::Unavailable(_))
    }
}

impl From<ProviderError> for ChainError {
    fn from(err: ProviderError) -> Self {
        if let Some(rpc) = RpcError::as_error_response(&err) {
            return ChainError::from_rpc_message(&rpc.message);
        }
        if RpcError::as_serde_error(&err).is_some() {
            return ChainError::Malformed(err.to_string());
        }
        match err {
            ProviderError::JsonRpcClientError(_) | ProviderError::HTTPError(_) => {
                ChainError::Unavailable(err.to_string())
            }
            ProviderError::SerdeJson(_) | ProviderError::HexError(_) => {
                ChainError::Malformed(err.to_string())
            }
            other => ChainError::Other(other.to_string()),
        }
    }
}

/// Read and write access to the chain, as consumed by the submission engine.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current network gas price in wei.
    async fn gas_price(&self) -> ChainResult<U256>;

    /// Native balance of `owner` in wei.
    async fn balance(&self, owner: H160) -> ChainResult<U256>;

    /// Timestamp of the latest block.
    async fn latest_timestamp(&self) -> ChainResult<U256>;

    /// Transaction count of `owner` including not-yet-mined transactions.
    async fn pending_nonce(&self, owner: H160) -> ChainResult<U256>;

    /// Read-only contract call; returns the raw return data.
    async fn call(&self, to: H160, data: Bytes) -> ChainResult<Bytes>;

    /// Broadcasts a signed, RLP-encoded transaction.
    async fn send_raw_transaction(&self, raw: Bytes) -> ChainResult<H256>;

    /// Receipt of `hash`, or `None` while it is not yet included.
    async fn receipt(&self, hash: H256) -> ChainResult<Option<TransactionReceipt>>;
}

/// `ChainClient` over an ethers HTTP provider.
#[derive(Debug, Clone)]
pub struct EthersClient {
    pub provider: Arc<Provider<Http>>,
}

impl EthersClient {
    /// Creates a client for the given JSON-RPC endpoint.
    ///
    /// Every request is bounded by `RPC_REQUEST_TIMEOUT_SECS`; a node that stops answering
    /// surfaces as a transport error instead of a hang.
    ///
    /// # Parameters
    /// * `rpc_url`: Url - The HTTPS endpoint.
    ///
    /// # Returns
    /// * `Result<Self>` - The new client, or why the HTTP client could not be built.
    pub fn new(rpc_url: Url) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(RPC_REQUEST_TIMEOUT_SECS))
            .build()?;
        let provider = Provider::new(Http::new_with_client(rpc_url, http_client));
        Ok(Self {
            provider: Arc::new(provider),
        })
    }
}

#[async_trait]
impl ChainClient for EthersClient {
    async fn gas_price(&self) -> ChainResult<U256> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn balance(&self, owner: H160) -> ChainResult<U256> {
        Ok(self.provider.get_balance(owner, None).await?)
    }

    async fn latest_timestamp(&self) -> ChainResult<U256> {
        match self.provider.get_block(BlockNumber::Latest).await? {
            Some(block) => Ok(block.timestamp),
            None => Err(ChainError::Unavailable(
                "node returned no latest block".to_string(),
            )),
        }
    }

    async fn pending_nonce(&self, owner: H160) -> ChainResult<U256> {
        Ok(self
            .provider
            .get_transaction_count(owner, Some(BlockNumber::Pending.into()))
            .await?)
    }

    async fn call(&self, to: H160, data: Bytes) -> ChainResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        let output = self.provider.call(&tx, None).await?;
        if output.is_empty() {
            // An empty result means there is no code at `to` from the node's point of view.
            return Err(ChainError::Unavailable(format!(
                "call to {:?} returned no data, contract missing or node out of sync",
                to
            )));
        }
        Ok(output)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> ChainResult<H256> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        let hash = pending.tx_hash();
        debug!("eth_sendRawTransaction accepted: {:?}", hash);
        Ok(hash)
    }

    async fn receipt(&self, hash: H256) -> ChainResult<Option<TransactionReceipt>> {
        Ok(self.provider.get_transaction_receipt(hash).await?)
    }
}
