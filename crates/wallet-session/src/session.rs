//! The active read ("data") client and write ("transaction") client.
//!
//! Reads issued before any read client exists are parked in a
//! `DeferredCallQueue` and released in issue order by the next successful
//! [`ProviderSession::set_network`]. Writes are serialized per write client;
//! replacing the write provider starts a fresh chain.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy_primitives::Address;
use chain_eth::abi::ContractAbi;
use chain_eth::address::{checksum_address, to_lower_hex};
use chain_eth::networks::{NetworkId, MAINNET};
use futures::future::{self, Either};
use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NetworkRegistry;
use crate::error::SessionError;
use crate::ledger::LedgerSigner;
use crate::provider::{parse_accounts, RpcClient, RpcConnector, RpcError, WalletProvider};
use crate::queue::SerialQueue;
use crate::types::{ProviderKind, SessionEvent, ShowOnly, WalletFlavor};

const EVENT_CAPACITY: usize = 64;

pub type ReadClient = Arc<dyn RpcClient>;

/// What actually signs for a write client.
#[derive(Clone)]
pub enum WriteBackend {
    /// A wallet that signs and broadcasts on its own.
    Provider(Arc<dyn WalletProvider>),
    /// A hardware signer; broadcasting goes through the read client.
    Hardware(Arc<LedgerSigner>),
}

/// A wallet connection tagged with the kind chosen at connect time.
#[derive(Clone)]
pub struct ProviderHandle {
    kind: ProviderKind,
    backend: WriteBackend,
}

impl ProviderHandle {
    pub fn injected(provider: Arc<dyn WalletProvider>) -> Self {
        Self {
            kind: ProviderKind::InjectedWeb3,
            backend: WriteBackend::Provider(provider),
        }
    }

    pub fn link_wallet(provider: Arc<dyn WalletProvider>) -> Self {
        Self {
            kind: ProviderKind::LinkWallet,
            backend: WriteBackend::Provider(provider),
        }
    }

    pub fn qr_wallet(provider: Arc<dyn WalletProvider>) -> Self {
        Self {
            kind: ProviderKind::QrWallet,
            backend: WriteBackend::Provider(provider),
        }
    }

    pub fn ledger(signer: Arc<LedgerSigner>) -> Self {
        Self {
            kind: ProviderKind::Ledger,
            backend: WriteBackend::Hardware(signer),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn backend(&self) -> &WriteBackend {
        &self.backend
    }
}

/// The session's current write client and its operation chain.
pub struct WriteClient {
    handle: ProviderHandle,
    queue: SerialQueue,
    /// Highest nonce this client has broadcast a signed transaction with.
    last_nonce: Mutex<Option<u64>>,
}

impl WriteClient {
    fn new(handle: ProviderHandle) -> Self {
        Self {
            handle,
            queue: SerialQueue::new(),
            last_nonce: Mutex::new(None),
        }
    }

    /// Nonce for the next locally signed transaction: the node's count, but
    /// never at or below a nonce this client already used.
    pub fn next_nonce(&self, fetched: Option<u64>) -> Option<u64> {
        let last = *self.last_nonce.lock().unwrap_or_else(PoisonError::into_inner);
        match (fetched, last.map(|n| n.saturating_add(1))) {
            (Some(fetched), Some(next)) => Some(fetched.max(next)),
            (fetched, next) => fetched.or(next),
        }
    }

    pub fn record_nonce(&self, nonce: u64) {
        let mut last = self.last_nonce.lock().unwrap_or_else(PoisonError::into_inner);
        *last = Some(last.map_or(nonce, |n| n.max(nonce)));
    }

    pub fn kind(&self) -> ProviderKind {
        self.handle.kind
    }

    pub fn backend(&self) -> &WriteBackend {
        &self.handle.backend
    }

    pub fn wallet_flavor(&self) -> Option<WalletFlavor> {
        match &self.handle.backend {
            WriteBackend::Provider(provider) => Some(provider.flavor()),
            WriteBackend::Hardware(_) => None,
        }
    }

    pub async fn accounts(&self) -> Result<Vec<String>, SessionError> {
        match &self.handle.backend {
            WriteBackend::Provider(provider) => {
                let accounts = provider.request("eth_accounts", json!([])).await?;
                Ok(parse_accounts(accounts)?)
            }
            WriteBackend::Hardware(signer) => {
                let address = signer.get_address().await?;
                Ok(vec![checksum_address(&to_lower_hex(&address))?])
            }
        }
    }

    /// The network the wallet is on. Unparsable answers are `None`.
    pub async fn network_id(&self) -> Result<Option<NetworkId>, SessionError> {
        match &self.handle.backend {
            WriteBackend::Provider(provider) => {
                let version = provider.request("net_version", json!([])).await?;
                Ok(network_id_from_json(&version))
            }
            WriteBackend::Hardware(signer) => Ok(Some(signer.chain_id())),
        }
    }

    /// `personal_sign` over `message`; returns the 0x-prefixed signature.
    pub async fn personal_sign(&self, message: &[u8], account: &str) -> Result<String, SessionError> {
        match &self.handle.backend {
            WriteBackend::Provider(provider) => {
                let params = json!([format!("0x{}", hex::encode(message)), account]);
                let signature = provider.request("personal_sign", params).await?;
                signature.as_str().map(str::to_string).ok_or_else(|| {
                    SessionError::Network(RpcError::new("personal_sign returned a non-string"))
                })
            }
            WriteBackend::Hardware(signer) => signer.sign_message(message).await,
        }
    }
}

pub(crate) fn network_id_from_json(value: &Value) -> Option<NetworkId> {
    match value {
        Value::String(raw) => NetworkId::parse(raw),
        Value::Number(n) => n.as_u64().map(NetworkId),
        _ => None,
    }
}

/// Read calls waiting for a read client, in issue order.
#[derive(Default)]
pub(crate) struct DeferredCallQueue {
    waiters: VecDeque<oneshot::Sender<ReadClient>>,
}

impl DeferredCallQueue {
    pub(crate) fn defer(&mut self) -> oneshot::Receiver<ReadClient> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        rx
    }

    /// Hands `client` to every waiter, oldest first. Abandoned waiters are
    /// dropped. Returns how many were delivered.
    pub(crate) fn release(&mut self, client: &ReadClient) -> usize {
        let mut delivered = 0;
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.send(client.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.iter().filter(|w| !w.is_closed()).count()
    }
}

enum ReadSlot {
    Ready(ReadClient),
    Waiting(oneshot::Receiver<ReadClient>),
}

struct SessionState {
    read_client: Option<ReadClient>,
    network_id: Option<NetworkId>,
    /// Network whose ABI and address tables answer lookups.
    lookup_network: String,
    write_client: Option<Arc<WriteClient>>,
    show_only: Option<ShowOnly>,
    pending: DeferredCallQueue,
    forwarder: Option<JoinHandle<()>>,
}

/// Holds the active clients for one application session.
pub struct ProviderSession {
    registry: NetworkRegistry,
    connector: Arc<dyn RpcConnector>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl ProviderSession {
    pub fn new(registry: NetworkRegistry, connector: Arc<dyn RpcConnector>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let lookup_network = registry.default_network().to_string();
        Self {
            registry,
            connector,
            state: Mutex::new(SessionState {
                read_client: None,
                network_id: None,
                lookup_network,
                write_client: None,
                show_only: None,
                pending: DeferredCallQueue::default(),
                forwarder: None,
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Switches the read client to `network_id`'s endpoint.
    ///
    /// Returns `Ok(true)` when a read client was attached and every deferred
    /// read released. An unknown (or absent) id clears the read client,
    /// points lookups at mainnet and returns `Ok(false)`; deferred reads stay
    /// parked.
    pub fn set_network(&self, network_id: Option<NetworkId>) -> Result<bool, SessionError> {
        let resolved = network_id.and_then(|id| {
            let name = self.registry.name_of(id)?;
            let endpoint = self.registry.endpoint(name)?;
            Some((id, name, endpoint))
        });

        let Some((id, name, endpoint)) = resolved else {
            warn!(network_id = ?network_id, "unknown network, using mainnet tables");
            self.degrade();
            return Ok(false);
        };

        let client = match self.connector.connect(endpoint) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, network_id = %id, "cannot connect read client");
                self.degrade();
                return Err(e.into());
            }
        };

        let mut state = self.lock();
        state.read_client = Some(client.clone());
        state.network_id = Some(id);
        state.lookup_network = name.to_string();
        let released = state.pending.release(&client);
        info!(network_id = %id, network = name, released, "read client attached");
        Ok(true)
    }

    fn degrade(&self) {
        let mut state = self.lock();
        state.read_client = None;
        state.network_id = None;
        state.lookup_network = MAINNET.to_string();
    }

    /// Replaces the write client; `None` disconnects.
    ///
    /// Operations queued on the previous write client are not awaited by
    /// operations on the new one. `show_only` puts the session in read-display
    /// mode; passing `None` leaves it.
    pub fn set_write_provider(&self, handle: Option<ProviderHandle>, show_only: Option<ShowOnly>) {
        let mut state = self.lock();
        let kind = handle.as_ref().map(ProviderHandle::kind);
        state.write_client = handle.map(|h| Arc::new(WriteClient::new(h)));
        state.show_only = show_only;
        if let Some(forwarder) = state.forwarder.take() {
            forwarder.abort();
        }
        info!(kind = ?kind, show_only = state.show_only.is_some(), "write provider replaced");
    }

    /// Runs `op` with the read client, waiting for one if none is attached.
    ///
    /// The call's place in the deferred queue is taken when this is called.
    /// There is no timeout; dropping the returned future abandons the wait.
    pub fn with_read_client<T, F, Fut>(&self, op: F) -> impl Future<Output = Result<T, SessionError>>
    where
        F: FnOnce(ReadClient) -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        let slot = {
            let mut state = self.lock();
            match &state.read_client {
                Some(client) => ReadSlot::Ready(client.clone()),
                None => {
                    let rx = state.pending.defer();
                    debug!(pending = state.pending.len(), "deferring read until a client is attached");
                    ReadSlot::Waiting(rx)
                }
            }
        };

        async move {
            let client = match slot {
                ReadSlot::Ready(client) => client,
                ReadSlot::Waiting(rx) => rx.await.map_err(|_| SessionError::Closed)?,
            };
            op(client).await
        }
    }

    /// Runs `op` with the write client after every earlier write operation on
    /// the same client has settled. Without a write client, returns
    /// `on_unavailable()`.
    pub fn with_write_client<T, F, Fut, U>(&self, op: F, on_unavailable: U) -> impl Future<Output = T>
    where
        F: FnOnce(Arc<WriteClient>) -> Fut,
        Fut: Future<Output = T>,
        U: FnOnce() -> T,
    {
        match self.write_client() {
            Some(client) => {
                let entry = op(client.clone());
                Either::Left(client.queue.enqueue(entry))
            }
            None => Either::Right(future::ready(on_unavailable())),
        }
    }

    /// Accounts of the write client, or the show-only address.
    pub fn accounts(&self) -> impl Future<Output = Result<Vec<String>, SessionError>> {
        let show_only = self.show_only();
        self.with_write_client(
            |client| async move { client.accounts().await },
            move || Ok(show_only.map(|s| vec![s.address]).unwrap_or_default()),
        )
    }

    /// Network reported by the write client, else [`Self::fallback_network_id`].
    pub fn wallet_network_id(&self) -> impl Future<Output = Result<Option<NetworkId>, SessionError>> {
        let fallback = self.fallback_network_id();
        self.with_write_client(
            |client| async move { client.network_id().await },
            move || Ok(fallback),
        )
    }

    /// A standalone read client for `network_id`, outside the session state.
    pub fn connect_client(&self, network_id: NetworkId) -> Result<ReadClient, SessionError> {
        let endpoint = self
            .registry
            .name_of(network_id)
            .and_then(|name| self.registry.endpoint(name))
            .ok_or_else(|| SessionError::Configuration(format!("no endpoint for network {network_id}")))?;
        Ok(self.connector.connect(endpoint)?)
    }

    pub fn read_client(&self) -> Option<ReadClient> {
        self.lock().read_client.clone()
    }

    pub fn write_client(&self) -> Option<Arc<WriteClient>> {
        self.lock().write_client.clone()
    }

    pub fn current_network_id(&self) -> Option<NetworkId> {
        self.lock().network_id
    }

    pub fn show_only(&self) -> Option<ShowOnly> {
        self.lock().show_only.clone()
    }

    /// The network to report when no write client can answer: the show-only
    /// network, else the configured default.
    pub fn fallback_network_id(&self) -> Option<NetworkId> {
        self.show_only()
            .map(|s| s.network_id)
            .or_else(|| self.registry.default_network_id())
    }

    pub fn provider_kind(&self) -> ProviderKind {
        let state = self.lock();
        match (&state.write_client, &state.show_only) {
            (Some(client), _) => client.kind(),
            (None, Some(_)) => ProviderKind::ShowOnly,
            (None, None) => ProviderKind::None,
        }
    }

    pub fn wallet_flavor(&self) -> Option<WalletFlavor> {
        self.lock()
            .write_client
            .as_ref()
            .and_then(|client| client.wallet_flavor())
    }

    /// ABI for `contract` on the current lookup network.
    pub fn abi(&self, contract: &str) -> Result<Arc<ContractAbi>, SessionError> {
        let network = self.lock().lookup_network.clone();
        self.registry.abi(&network, contract).ok_or_else(|| {
            SessionError::Configuration(format!("no ABI for {contract} on {network}"))
        })
    }

    pub fn contract_name(&self, address: &Address) -> Option<String> {
        let network = self.lock().lookup_network.clone();
        self.registry
            .contract_name(&network, address)
            .map(str::to_string)
    }

    pub fn contract_address(&self, contract: &str) -> Option<Address> {
        let network = self.lock().lookup_network.clone();
        self.registry.contract_address(&network, contract)
    }

    /// Reads still waiting for a client.
    pub fn pending_reads(&self) -> usize {
        self.lock().pending.len()
    }

    pub(crate) fn replace_forwarder(&self, forwarder: JoinHandle<()>) {
        if let Some(previous) = self.lock().forwarder.replace(forwarder) {
            previous.abort();
        }
    }
}

impl Drop for ProviderSession {
    fn drop(&mut self) {
        if let Some(forwarder) = self.lock().forwarder.take() {
            forwarder.abort();
        }
    }
}
