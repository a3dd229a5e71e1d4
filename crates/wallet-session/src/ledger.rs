//! Hardware signer access.
//!
//! The device rejects overlapping requests, so every request against one
//! transport goes through a single [`HardwareSignerQueue`]. The app
//! configuration fetch runs before any other request on the transport.

use std::future::Future;
use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use chain_eth::address::parse_address;
use chain_eth::networks::NetworkId;
use chain_eth::transaction::{SignablePayload, Signature, TransactionRequest};
use futures::future::{self, BoxFuture, Either, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::queue::SerialQueue;

/// Path used when the caller does not pick one.
pub const DEFAULT_LEDGER_PATH: &str = "44'/60'/0'/0/0";

/// Legacy derivation paths (account index in the last component).
pub const LEGACY_LEDGER_PATHS: [&str; 3] = ["44'/60'/0'/0", "44'/60'/0'/1", "44'/60'/0'/2"];

/// Ledger Live derivation paths (account index in the hardened third component).
pub const LEDGER_LIVE_PATHS: [&str; 3] = ["44'/60'/0'/0/0", "44'/60'/1'/0/0", "44'/60'/2'/0/0"];

/// Configuration reported by the Ethereum app on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfiguration {
    pub arbitrary_data_enabled: bool,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Request rejected on device")]
    Rejected,

    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

/// Raw device access. Implementations talk to one physical device.
#[async_trait]
pub trait HardwareTransport: Send + Sync {
    async fn app_configuration(&self) -> Result<AppConfiguration, TransportError>;

    /// Hex address for a derivation path.
    async fn get_address(&self, path: &str) -> Result<String, TransportError>;

    /// Signs an encoded signing payload (type byte included for typed
    /// transactions).
    async fn sign_transaction(&self, path: &str, payload: &[u8])
        -> Result<Signature, TransportError>;

    async fn sign_personal_message(
        &self,
        path: &str,
        message: &[u8],
    ) -> Result<Signature, TransportError>;
}

type ConfigFuture = Shared<BoxFuture<'static, Result<AppConfiguration, TransportError>>>;

/// Linearizes all requests against one hardware transport.
///
/// Requests run strictly one at a time in the order they were issued. A
/// failed request fails only its own caller.
pub struct HardwareSignerQueue {
    transport: Arc<dyn HardwareTransport>,
    queue: SerialQueue,
    config: ConfigFuture,
}

impl HardwareSignerQueue {
    pub fn connect(transport: Arc<dyn HardwareTransport>) -> Arc<Self> {
        let config = {
            let transport = transport.clone();
            async move { transport.app_configuration().await }
                .boxed()
                .shared()
        };
        Arc::new(Self {
            transport,
            queue: SerialQueue::new(),
            config,
        })
    }

    /// The device's app configuration, fetched once.
    pub async fn config(&self) -> Result<AppConfiguration, SessionError> {
        Ok(self.config.clone().await?)
    }

    pub fn get_address(&self, path: &str) -> impl Future<Output = Result<Address, SessionError>> {
        let path = path.to_string();
        self.submit("get_address", move |transport| async move {
            transport.get_address(&path).await
        })
        .map(|address| -> Result<Address, SessionError> { Ok(parse_address(&address?)?) })
    }

    pub fn sign(
        &self,
        path: &str,
        payload: &SignablePayload,
    ) -> impl Future<Output = Result<Signature, SessionError>> {
        let path = path.to_string();
        let payload = payload.payload.clone();
        self.submit("sign_transaction", move |transport| async move {
            transport.sign_transaction(&path, &payload).await
        })
    }

    pub fn sign_message(
        &self,
        path: &str,
        message: &[u8],
    ) -> impl Future<Output = Result<Signature, SessionError>> {
        let path = path.to_string();
        let message = message.to_vec();
        self.submit("sign_personal_message", move |transport| async move {
            transport.sign_personal_message(&path, &message).await
        })
    }

    fn submit<T, F, Fut>(
        &self,
        request: &'static str,
        op: F,
    ) -> impl Future<Output = Result<T, SessionError>>
    where
        F: FnOnce(Arc<dyn HardwareTransport>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let transport = self.transport.clone();
        let config = self.config.clone();
        let entry = self.queue.enqueue(async move {
            if let Err(e) = config.await {
                debug!(error = %e, "app configuration unavailable");
            }
            op(transport).await
        });
        async move {
            entry.await.map_err(|e| {
                warn!(error = %e, request, "hardware request failed");
                SessionError::from(e)
            })
        }
    }
}

/// A hardware-backed signer bound to one derivation path and chain.
pub struct LedgerSigner {
    queue: Arc<HardwareSignerQueue>,
    path: String,
    chain_id: NetworkId,
}

impl LedgerSigner {
    pub fn new(queue: Arc<HardwareSignerQueue>, path: impl Into<String>, chain_id: NetworkId) -> Self {
        Self {
            queue,
            path: path.into(),
            chain_id,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn chain_id(&self) -> NetworkId {
        self.chain_id
    }

    pub fn get_address(&self) -> impl Future<Output = Result<Address, SessionError>> {
        self.queue.get_address(&self.path)
    }

    /// Signs `tx` on the device and returns the broadcastable encoding.
    ///
    /// A missing (or zero) chain id is filled in from the signer. Validation
    /// happens before the request is queued, so a malformed transaction never
    /// reaches the device.
    pub fn sign_transaction(
        &self,
        tx: &TransactionRequest,
    ) -> impl Future<Output = Result<Vec<u8>, SessionError>> {
        let mut tx = tx.clone();
        if tx.chain_id.unwrap_or(0) == 0 {
            tx.chain_id = i64::try_from(self.chain_id.0).ok();
        }

        match tx.validate() {
            Ok(unsigned) => {
                let payload = unsigned.encode_for_signing();
                Either::Left(self.queue.sign(&self.path, &payload).map(
                    move |signature| -> Result<Vec<u8>, SessionError> {
                        Ok(unsigned.encode_signed(&signature?)?)
                    },
                ))
            }
            Err(e) => Either::Right(future::ready(Err(SessionError::from(e)))),
        }
    }

    /// Signs a personal message; returns the 0x-prefixed 65-byte signature.
    pub fn sign_message(&self, message: &[u8]) -> impl Future<Output = Result<String, SessionError>> {
        self.queue
            .sign_message(&self.path, message)
            .map(|signature| -> Result<String, SessionError> {
                let joined = signature?.to_joined_bytes()?;
                Ok(format!("0x{}", hex::encode(joined)))
            })
    }
}
