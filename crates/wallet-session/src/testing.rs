//! In-memory collaborators: a scripted read client, a browser-style wallet
//! and a hardware device signing with a software key.
//!
//! Compiled for this crate's unit tests and, behind the `test-utils`
//! feature, for integration tests elsewhere in the workspace.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use chain_eth::networks::NetworkId;
use chain_eth::transaction::{decode_signed, decode_unsigned, keccak256, Signature, TxType, UnsignedTransaction};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::config::{NetworkRegistry, SessionConfig};
use crate::connect::WalletFactory;
use crate::ledger::{AppConfiguration, HardwareTransport, TransportError};
use crate::provider::{
    BlockTag, CallRequest, Log, LogFilter, ProviderEvent, RpcClient, RpcConnector, RpcError,
    WalletProvider,
};
use crate::types::WalletFlavor;

pub const MAINNET_RPC: &str = "https://mainnet.test/rpc";
pub const ROPSTEN_RPC: &str = "https://ropsten.test/rpc";

const CTOKEN_ABI: &str = r#"[
    {"type":"function","name":"balanceOf","stateMutability":"view",
     "inputs":[{"name":"owner","type":"address"}],
     "outputs":[{"name":"","type":"uint256"}]},
    {"type":"function","name":"totalSupply","stateMutability":"view",
     "inputs":[],"outputs":[{"name":"","type":"uint256"}]},
    {"type":"function","name":"mint","stateMutability":"nonpayable",
     "inputs":[{"name":"mintAmount","type":"uint256"}],
     "outputs":[{"name":"","type":"uint256"}]},
    {"type":"event","name":"Transfer","anonymous":false,
     "inputs":[{"name":"from","type":"address","indexed":true},
               {"name":"to","type":"address","indexed":true},
               {"name":"amount","type":"uint256","indexed":false}]}
]"#;

pub fn ctoken_address() -> Address {
    Address::repeat_byte(0xcd)
}

/// Mainnet with the CToken ABI and a `cDAI` deployment; ropsten with neither.
/// Legacy sends default to 9 gwei.
pub fn test_config() -> SessionConfig {
    let config = format!(
        r#"{{
            "default_network": "mainnet",
            "default_gas_price": 9000000000,
            "networks": {{
                "mainnet": {{
                    "rpc_url": "{MAINNET_RPC}",
                    "abis": {{ "CToken": {CTOKEN_ABI} }},
                    "contracts": {{ "cDAI": "{}" }}
                }},
                "ropsten": {{ "rpc_url": "{ROPSTEN_RPC}" }}
            }}
        }}"#,
        ctoken_address()
    );
    SessionConfig::from_json_str(&config).unwrap()
}

pub fn test_registry() -> NetworkRegistry {
    NetworkRegistry::from_config(&test_config()).unwrap()
}

struct RpcState {
    gas_estimate: Result<u64, String>,
    estimates: usize,
    transaction_count: Result<u64, String>,
    block_number: u64,
    balance: U256,
    call_output: Result<Vec<u8>, String>,
    calls: Vec<(CallRequest, BlockTag)>,
    raw_transactions: Vec<Vec<u8>>,
    logs: Vec<Log>,
    log_filters: Vec<LogFilter>,
}

/// A scripted read client.
pub struct MockRpc {
    state: Mutex<RpcState>,
}

impl Default for MockRpc {
    fn default() -> Self {
        Self {
            state: Mutex::new(RpcState {
                gas_estimate: Ok(21_000),
                estimates: 0,
                transaction_count: Ok(0),
                block_number: 1,
                balance: U256::ZERO,
                call_output: Ok(Vec::new()),
                calls: Vec::new(),
                raw_transactions: Vec::new(),
                logs: Vec::new(),
                log_filters: Vec::new(),
            }),
        }
    }
}

impl MockRpc {
    pub fn set_gas_estimate(&self, estimate: u64) {
        self.state.lock().unwrap().gas_estimate = Ok(estimate);
    }

    pub fn fail_estimates(&self, message: &str) {
        self.state.lock().unwrap().gas_estimate = Err(message.to_string());
    }

    pub fn set_transaction_count(&self, count: u64) {
        self.state.lock().unwrap().transaction_count = Ok(count);
    }

    pub fn fail_transaction_count(&self, message: &str) {
        self.state.lock().unwrap().transaction_count = Err(message.to_string());
    }

    pub fn set_block_number(&self, block: u64) {
        self.state.lock().unwrap().block_number = block;
    }

    pub fn set_balance(&self, balance: U256) {
        self.state.lock().unwrap().balance = balance;
    }

    pub fn set_call_output(&self, output: Vec<u8>) {
        self.state.lock().unwrap().call_output = Ok(output);
    }

    pub fn fail_calls(&self, message: &str) {
        self.state.lock().unwrap().call_output = Err(message.to_string());
    }

    pub fn set_logs(&self, logs: Vec<Log>) {
        self.state.lock().unwrap().logs = logs;
    }

    /// Number of `eth_estimateGas` requests served so far.
    pub fn estimate_calls(&self) -> usize {
        self.state.lock().unwrap().estimates
    }

    pub fn calls(&self) -> Vec<(CallRequest, BlockTag)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn raw_transactions(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().raw_transactions.clone()
    }

    pub fn log_filters(&self) -> Vec<LogFilter> {
        self.state.lock().unwrap().log_filters.clone()
    }
}

#[async_trait]
impl RpcClient for MockRpc {
    async fn estimate_gas(&self, _request: &CallRequest) -> Result<u64, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.estimates += 1;
        state.gas_estimate.clone().map_err(RpcError::new)
    }

    async fn get_transaction_count(&self, _address: Address) -> Result<u64, RpcError> {
        self.state
            .lock()
            .unwrap()
            .transaction_count
            .clone()
            .map_err(RpcError::new)
    }

    async fn call(&self, request: &CallRequest, block: BlockTag) -> Result<Bytes, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((request.clone(), block));
        state
            .call_output
            .clone()
            .map(Bytes::from)
            .map_err(RpcError::new)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError> {
        let hash = keccak256(&raw);
        self.state.lock().unwrap().raw_transactions.push(raw.to_vec());
        Ok(hash)
    }

    async fn get_past_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.log_filters.push(filter.clone());
        Ok(state.logs.clone())
    }

    async fn get_balance(&self, _address: Address) -> Result<U256, RpcError> {
        Ok(self.state.lock().unwrap().balance)
    }

    async fn get_block_number(&self) -> Result<u64, RpcError> {
        Ok(self.state.lock().unwrap().block_number)
    }

    async fn get_transaction(&self, _hash: B256) -> Result<Option<Value>, RpcError> {
        Ok(None)
    }

    async fn get_transaction_receipt(&self, _hash: B256) -> Result<Option<Value>, RpcError> {
        Ok(None)
    }
}

/// Hands out one [`MockRpc`] per endpoint.
#[derive(Default)]
pub struct MockConnector {
    clients: Mutex<HashMap<String, Arc<MockRpc>>>,
    failing: Mutex<HashSet<String>>,
}

impl MockConnector {
    pub fn rpc(&self, endpoint: &str) -> Arc<MockRpc> {
        self.clients
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .clone()
    }

    pub fn fail_endpoint(&self, endpoint: &str) {
        self.failing.lock().unwrap().insert(endpoint.to_string());
    }
}

impl RpcConnector for MockConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RpcClient>, RpcError> {
        if self.failing.lock().unwrap().contains(endpoint) {
            return Err(RpcError::new(format!("cannot reach {endpoint}")));
        }
        Ok(self.rpc(endpoint))
    }
}

struct WalletState {
    authorised: bool,
    chain: String,
    requests: Vec<String>,
    sent: Vec<Value>,
    send_error: Option<RpcError>,
}

/// A wallet that holds one account and accepts every request.
pub struct MockWallet {
    account: String,
    flavor: WalletFlavor,
    state: Mutex<WalletState>,
    events: broadcast::Sender<ProviderEvent>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::with_flavor(WalletFlavor::Other)
    }

    pub fn with_flavor(flavor: WalletFlavor) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            account: format!("0x{}", hex::encode([0x5a; 20])),
            flavor,
            state: Mutex::new(WalletState {
                authorised: true,
                chain: "1".into(),
                requests: Vec::new(),
                sent: Vec::new(),
                send_error: None,
            }),
            events,
        }
    }

    pub fn account(&self) -> String {
        self.account.clone()
    }

    /// Value answered to `net_version`.
    pub fn set_chain(&self, chain: &str) {
        self.state.lock().unwrap().chain = chain.to_string();
    }

    /// Whether `eth_accounts` reports the account before `eth_requestAccounts`.
    pub fn set_authorised(&self, authorised: bool) {
        self.state.lock().unwrap().authorised = authorised;
    }

    pub fn fail_sends(&self, error: RpcError) {
        self.state.lock().unwrap().send_error = Some(error);
    }

    pub fn requested(&self, method: &str) -> bool {
        self.state.lock().unwrap().requests.iter().any(|m| m == method)
    }

    pub fn sent_transactions(&self) -> Vec<Value> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn last_sent_hash(&self) -> Option<B256> {
        let state = self.state.lock().unwrap();
        state.sent.last().map(|_| sent_hash(state.sent.len()))
    }

    pub fn emit(&self, event: ProviderEvent) {
        self.events.send(event).unwrap();
    }
}

fn sent_hash(n: usize) -> B256 {
    B256::with_last_byte(n as u8)
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(method.to_string());
        match method {
            "eth_accounts" if state.authorised => Ok(json!([self.account])),
            "eth_accounts" => Ok(json!([])),
            "eth_requestAccounts" => {
                state.authorised = true;
                Ok(json!([self.account]))
            }
            "net_version" => Ok(json!(state.chain)),
            "eth_sendTransaction" => {
                if let Some(e) = state.send_error.clone() {
                    return Err(e);
                }
                state.sent.push(params[0].clone());
                Ok(json!(sent_hash(state.sent.len())))
            }
            "personal_sign" => Ok(json!(format!("0x{}", "11".repeat(65)))),
            other => Err(RpcError::with_code(-32601, format!("unsupported: {other}"))),
        }
    }

    fn flavor(&self) -> WalletFlavor {
        self.flavor
    }

    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        Some(self.events.subscribe())
    }
}

/// Creates [`MockWallet`]s on the requested chain and records each creation.
#[derive(Default)]
pub struct MockWalletFactory {
    created: Mutex<Vec<(String, NetworkId)>>,
}

impl MockWalletFactory {
    pub fn created(&self) -> Vec<(String, NetworkId)> {
        self.created.lock().unwrap().clone()
    }
}

impl WalletFactory for MockWalletFactory {
    fn create(
        &self,
        rpc_url: &str,
        network_id: NetworkId,
    ) -> Result<Arc<dyn WalletProvider>, RpcError> {
        self.created
            .lock()
            .unwrap()
            .push((rpc_url.to_string(), network_id));
        let wallet = MockWallet::new();
        wallet.set_chain(&network_id.0.to_string());
        Ok(Arc::new(wallet))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRequest {
    AppConfiguration,
    GetAddress(String),
    SignTransaction(String),
    SignMessage(String),
}

/// A hardware transport signing with a fixed software key.
///
/// Every request yields once while "in flight" so overlapping requests would
/// be observed by [`MockDevice::max_in_flight`].
pub struct MockDevice {
    key: SigningKey,
    requests: Mutex<Vec<DeviceRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    reject_next: AtomicBool,
    disconnected: AtomicBool,
}

impl MockDevice {
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        secret[31] = 7;
        Self {
            key: SigningKey::from_bytes((&secret).into()).unwrap(),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            reject_next: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn requests(&self) -> Vec<DeviceRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Makes the next non-configuration request fail as if the user
    /// rejected it on the device.
    pub fn reject_next(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn address(&self) -> Address {
        address_of(self.key.verifying_key())
    }

    /// Recovers the sender of a signed, broadcastable transaction.
    pub fn recover_signer(&self, raw: &[u8]) -> Address {
        let signed = decode_signed(raw).unwrap();
        let hash = signed.transaction.encode_for_signing().signing_hash();
        let v = signed.v.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        let parity = match &signed.transaction {
            UnsignedTransaction::Legacy(tx) => v - 35 - 2 * tx.chain_id,
            UnsignedTransaction::Eip1559(_) => v,
        };

        let mut rs = [0u8; 64];
        rs[32 - signed.r.len()..32].copy_from_slice(&signed.r);
        rs[64 - signed.s.len()..].copy_from_slice(&signed.s);
        let sig = K256Signature::from_slice(&rs).unwrap();
        let key = VerifyingKey::recover_from_prehash(
            hash.as_slice(),
            &sig,
            RecoveryId::from_byte(parity as u8).unwrap(),
        )
        .unwrap();
        address_of(&key)
    }

    async fn begin(&self, request: DeviceRequest) -> Result<(), TransportError> {
        let config = request == DeviceRequest::AppConfiguration;
        self.requests.lock().unwrap().push(request);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.disconnected.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("device locked".into()));
        }
        if !config && self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Rejected);
        }
        Ok(())
    }

    fn sign_hash(&self, hash: B256, v_offset: u64) -> Signature {
        let (sig, recid): (K256Signature, RecoveryId) =
            self.key.sign_prehash(hash.as_slice()).unwrap();
        let v = v_offset + u64::from(recid.is_y_odd());
        Signature::new(
            format!("{v:x}"),
            hex::encode(sig.r().to_bytes()),
            hex::encode(sig.s().to_bytes()),
        )
    }
}

/// Ethereum address of a secp256k1 public key.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

#[async_trait]
impl HardwareTransport for MockDevice {
    async fn app_configuration(&self) -> Result<AppConfiguration, TransportError> {
        self.begin(DeviceRequest::AppConfiguration).await?;
        Ok(AppConfiguration {
            arbitrary_data_enabled: true,
            version: "1.9.0".into(),
        })
    }

    async fn get_address(&self, path: &str) -> Result<String, TransportError> {
        self.begin(DeviceRequest::GetAddress(path.to_string())).await?;
        Ok(format!("0x{}", hex::encode(self.address())))
    }

    async fn sign_transaction(&self, path: &str, payload: &[u8]) -> Result<Signature, TransportError> {
        self.begin(DeviceRequest::SignTransaction(path.to_string())).await?;
        let tx = decode_unsigned(payload).unwrap();
        let v_offset = match tx.tx_type() {
            TxType::Legacy => 35 + 2 * tx.chain_id(),
            TxType::Eip1559 => 0,
        };
        Ok(self.sign_hash(keccak256(payload), v_offset))
    }

    async fn sign_personal_message(
        &self,
        path: &str,
        message: &[u8],
    ) -> Result<Signature, TransportError> {
        self.begin(DeviceRequest::SignMessage(path.to_string())).await?;
        let mut prefixed = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
        prefixed.extend_from_slice(message);
        Ok(self.sign_hash(keccak256(&prefixed), 27))
    }
}
