//! Collaborator interfaces: JSON-RPC read clients and wallet providers.
//!
//! Neither is implemented here. Applications plug in their HTTP client and
//! wallet bridge; tests plug in in-memory mocks.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use chain_eth::transaction::TransactionRequest;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::WalletFlavor;

/// A JSON-RPC failure as reported by a node or wallet.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RpcError {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    fn unsupported(method: &str) -> Self {
        Self::with_code(-32601, format!("method not supported: {method}"))
    }
}

/// Parameters for `eth_call` / `eth_estimateGas`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

/// Block selector for reads; `0` means "latest".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockTag {
    #[default]
    Latest,
    Number(u64),
}

impl From<Option<u64>> for BlockTag {
    fn from(block: Option<u64>) -> Self {
        match block {
            None | Some(0) => BlockTag::Latest,
            Some(n) => BlockTag::Number(n),
        }
    }
}

impl BlockTag {
    pub fn to_rpc(self) -> String {
        match self {
            BlockTag::Latest => "latest".to_string(),
            BlockTag::Number(n) => format!("{n:#x}"),
        }
    }
}

/// Filter for `eth_getLogs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Option<Address>,
    pub topics: Vec<Option<B256>>,
    pub from_block: BlockTag,
    pub to_block: BlockTag,
}

/// A log entry returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
}

/// A read client bound to one network's RPC endpoint.
///
/// Only the calls the submit path depends on are required; the rest default
/// to a "method not supported" error.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, RpcError>;

    async fn get_transaction_count(&self, address: Address) -> Result<u64, RpcError>;

    async fn call(&self, request: &CallRequest, block: BlockTag) -> Result<Bytes, RpcError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError>;

    async fn get_past_logs(&self, _filter: &LogFilter) -> Result<Vec<Log>, RpcError> {
        Err(RpcError::unsupported("eth_getLogs"))
    }

    async fn get_balance(&self, _address: Address) -> Result<U256, RpcError> {
        Err(RpcError::unsupported("eth_getBalance"))
    }

    async fn get_block_number(&self) -> Result<u64, RpcError> {
        Err(RpcError::unsupported("eth_blockNumber"))
    }

    async fn get_transaction(&self, _hash: B256) -> Result<Option<Value>, RpcError> {
        Err(RpcError::unsupported("eth_getTransactionByHash"))
    }

    async fn get_transaction_receipt(&self, _hash: B256) -> Result<Option<Value>, RpcError> {
        Err(RpcError::unsupported("eth_getTransactionReceipt"))
    }
}

/// Builds read clients for RPC endpoints.
pub trait RpcConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RpcClient>, RpcError>;
}

/// Notifications a wallet pushes on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    /// The new chain id, as the wallet reports it (usually hex).
    ChainChanged(String),
}

/// A wallet's EIP-1193 style request interface.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Opens the wallet's connect handshake and returns the authorised
    /// accounts.
    async fn enable(&self) -> Result<Vec<String>, RpcError> {
        let accounts = self.request("eth_requestAccounts", json!([])).await?;
        parse_accounts(accounts)
    }

    fn flavor(&self) -> WalletFlavor {
        WalletFlavor::Other
    }

    /// Subscribes to account and chain changes, if the wallet emits them.
    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        None
    }
}

pub(crate) fn parse_accounts(value: Value) -> Result<Vec<String>, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::new(format!("bad accounts response: {e}")))
}

/// Renders a transaction request as `eth_sendTransaction` params with hex
/// quantities.
pub fn to_rpc_json(tx: &TransactionRequest) -> Value {
    let mut obj = serde_json::Map::new();
    if let Some(from) = tx.from {
        obj.insert("from".into(), json!(from));
    }
    if let Some(to) = tx.to.as_deref().filter(|to| !to.is_empty() && *to != "0x") {
        obj.insert("to".into(), json!(to));
    }
    if let Some(gas) = tx.gas.or(tx.gas_limit) {
        obj.insert("gas".into(), json!(format!("{gas:#x}")));
    }
    if let Some(price) = tx.gas_price {
        obj.insert("gasPrice".into(), json!(format!("{price:#x}")));
    }
    if let Some(fee) = tx.max_fee_per_gas {
        obj.insert("maxFeePerGas".into(), json!(format!("{fee:#x}")));
    }
    if let Some(tip) = tx.max_priority_fee_per_gas {
        obj.insert("maxPriorityFeePerGas".into(), json!(format!("{tip:#x}")));
    }
    if let Some(nonce) = tx.nonce {
        obj.insert("nonce".into(), json!(format!("{nonce:#x}")));
    }
    if let Some(value) = tx.value {
        obj.insert("value".into(), json!(value));
    }
    if let Some(data) = &tx.data {
        obj.insert("data".into(), json!(data));
    }
    if let Some(chain_id) = tx.chain_id {
        obj.insert("chainId".into(), json!(format!("{chain_id:#x}")));
    }
    Value::Object(obj)
}
