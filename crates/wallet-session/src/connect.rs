//! Wallet connection flows.
//!
//! Each `connect_*` method installs a write provider on the session and
//! reports the resulting network and account. [`WalletConnector::connect_to_provider`]
//! dispatches on the provider kind and, on success, establishes the
//! connection: it publishes network/account/provider events, switches the
//! read client and starts forwarding the wallet's own notifications.

use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use alloy_primitives::utils::format_ether;
use alloy_primitives::U256;
use chain_eth::address::{checksum_address, to_lower_hex};
use chain_eth::networks::{NetworkId, MAINNET};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::ledger::{HardwareSignerQueue, HardwareTransport, LedgerSigner, DEFAULT_LEDGER_PATH};
use crate::provider::{parse_accounts, ProviderEvent, RpcError, WalletProvider};
use crate::session::{ProviderHandle, ProviderSession};
use crate::types::{ProviderKind, SessionEvent, ShowOnly, WalletFlavor};

/// Message QR wallets use when the user closes the pairing modal.
const USER_CLOSED_MODAL: &str = "User closed modal";

/// Creates wallets that are instantiated per connection (link and QR
/// wallets), given the RPC endpoint and chain they should use.
pub trait WalletFactory: Send + Sync {
    fn create(
        &self,
        rpc_url: &str,
        network_id: NetworkId,
    ) -> Result<Arc<dyn WalletProvider>, RpcError>;
}

/// The wallets available in this environment.
#[derive(Default, Clone)]
pub struct WalletSources {
    /// A wallet injected by the host (browser extension, in-app browser).
    pub injected: Option<Arc<dyn WalletProvider>>,
    pub link_wallet: Option<Arc<dyn WalletFactory>>,
    pub qr_wallet: Option<Arc<dyn WalletFactory>>,
    pub ledger: Option<Arc<dyn HardwareTransport>>,
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Never prompt; connect only to wallets that are already authorised.
    pub disallow_auth_dialog: bool,
    pub desired_network_id: NetworkId,
    pub ledger_path: String,
    pub show_account: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            disallow_auth_dialog: false,
            desired_network_id: NetworkId::MAINNET,
            ledger_path: DEFAULT_LEDGER_PATH.to_string(),
            show_account: None,
        }
    }
}

/// Result of a connect attempt.
#[derive(Clone, Default)]
pub struct Connection {
    pub network_id: Option<NetworkId>,
    pub account: Option<String>,
    /// Wallet whose notifications should be forwarded.
    pub provider: Option<Arc<dyn WalletProvider>>,
}

impl Connection {
    fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryConnectOutcome {
    Connected,
    /// Nothing connected silently; the UI should offer a provider choice.
    PromptForProvider,
    /// Nothing connected; reads run against mainnet.
    ReadOnly,
}

/// One row of a hardware account listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAccount {
    pub derivation_path: String,
    pub account: Option<String>,
    pub eth_balance_wei: Option<U256>,
    /// Balance in ether as a decimal string.
    pub eth_balance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerAccounts {
    pub accounts: Vec<LedgerAccount>,
    /// `false` when listing stopped early because the device needs attention.
    pub complete: bool,
}

/// Connects wallets to a [`ProviderSession`].
pub struct WalletConnector {
    session: Arc<ProviderSession>,
    sources: WalletSources,
    hardware: OnceLock<Arc<HardwareSignerQueue>>,
    chosen: Mutex<Option<ProviderKind>>,
}

impl WalletConnector {
    pub fn new(session: Arc<ProviderSession>, sources: WalletSources) -> Self {
        Self {
            session,
            sources,
            hardware: OnceLock::new(),
            chosen: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<ProviderSession> {
        &self.session
    }

    /// The provider kind the user last picked with an auth dialog allowed.
    pub fn chosen_provider(&self) -> Option<ProviderKind> {
        *self.chosen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The signer queue for the hardware transport, created on first use.
    pub fn hardware_queue(&self) -> Result<Arc<HardwareSignerQueue>, SessionError> {
        let transport = self
            .sources
            .ledger
            .as_ref()
            .ok_or_else(|| SessionError::SignerUnavailable("no hardware transport".into()))?;
        Ok(self
            .hardware
            .get_or_init(|| HardwareSignerQueue::connect(transport.clone()))
            .clone())
    }

    pub async fn connect_ledger(
        &self,
        path: &str,
        disallow_auth_dialog: bool,
        desired_network_id: NetworkId,
    ) -> Result<Connection, SessionError> {
        // Connecting a hardware wallet always needs the user.
        if disallow_auth_dialog {
            return Ok(Connection::empty());
        }

        self.session.set_network(Some(desired_network_id))?;
        let signer = LedgerSigner::new(self.hardware_queue()?, path, desired_network_id);
        self.session
            .set_write_provider(Some(ProviderHandle::ledger(Arc::new(signer))), None);

        let account = self.first_account().await?;
        Ok(Connection {
            network_id: Some(desired_network_id),
            account,
            provider: None,
        })
    }

    pub async fn connect_link_wallet(
        &self,
        disallow_auth_dialog: bool,
    ) -> Result<Connection, SessionError> {
        let Some(factory) = &self.sources.link_wallet else {
            warn!("no link wallet available");
            return Ok(Connection::empty());
        };
        let provider = factory.create(self.endpoint_for(NetworkId::MAINNET)?, NetworkId::MAINNET)?;

        if disallow_auth_dialog && requires_auth_dialog(provider.as_ref()).await {
            return Ok(Connection::empty());
        }

        self.session
            .set_write_provider(Some(ProviderHandle::link_wallet(provider.clone())), None);
        let network_id = self.session.wallet_network_id().await?;
        provider.enable().await?;
        let account = self.first_account().await?;

        Ok(Connection {
            network_id,
            account,
            provider: Some(provider),
        })
    }

    /// Connects the injected wallet. `auto_connect` skips the account
    /// request prompt.
    pub async fn connect_injected(
        &self,
        disallow_auth_dialog: bool,
        auto_connect: bool,
    ) -> Result<Connection, SessionError> {
        let Some(provider) = self.sources.injected.clone() else {
            return Ok(Connection::empty());
        };

        if disallow_auth_dialog && requires_auth_dialog(provider.as_ref()).await {
            return Ok(Connection::empty());
        }

        if !auto_connect {
            if let Err(e) = provider.enable().await {
                debug!(error = %e, "account request declined");
            }
        }

        self.session
            .set_write_provider(Some(ProviderHandle::injected(provider.clone())), None);
        let account = self.first_account().await?;
        let network_id = self.session.wallet_network_id().await?;

        Ok(Connection {
            network_id,
            account,
            provider: Some(provider),
        })
    }

    pub async fn connect_qr_wallet(
        &self,
        disallow_auth_dialog: bool,
        desired_network_id: NetworkId,
    ) -> Result<Connection, SessionError> {
        let Some(factory) = &self.sources.qr_wallet else {
            warn!("no QR wallet available");
            return Ok(Connection::empty());
        };
        let endpoint = self
            .endpoint_for(desired_network_id)
            .or_else(|_| self.endpoint_for(NetworkId::MAINNET))?;
        let provider = factory.create(endpoint, desired_network_id)?;

        if let Err(e) = provider.enable().await {
            if e.message == USER_CLOSED_MODAL {
                debug!("QR wallet modal closed");
            } else {
                warn!(error = %e, "QR wallet handshake failed");
            }
        }

        if disallow_auth_dialog && requires_auth_dialog(provider.as_ref()).await {
            return Ok(Connection::empty());
        }

        self.session
            .set_write_provider(Some(ProviderHandle::qr_wallet(provider.clone())), None);
        let network_id = self.session.wallet_network_id().await?;
        let account = self.first_account().await?;

        Ok(Connection {
            network_id,
            account,
            provider: Some(provider),
        })
    }

    /// Read-display mode for a literal address on mainnet.
    pub async fn connect_show_only(&self, address: &str) -> Result<Connection, SessionError> {
        self.session.set_write_provider(
            None,
            Some(ShowOnly {
                address: address.to_string(),
                network_id: NetworkId::MAINNET,
            }),
        );
        let account = self.first_account().await?;
        let network_id = self.session.wallet_network_id().await?;
        Ok(Connection {
            network_id,
            account,
            provider: None,
        })
    }

    pub fn disconnect(&self) -> Connection {
        self.session.set_write_provider(None, None);
        Connection::empty()
    }

    /// Connects `kind` and establishes the connection if an account came
    /// back (or `kind` is [`ProviderKind::None`]). Returns whether it did.
    pub async fn connect_to_provider(
        &self,
        kind: ProviderKind,
        options: &ConnectOptions,
    ) -> Result<bool, SessionError> {
        let disallow = options.disallow_auth_dialog;
        let connection = match kind {
            ProviderKind::Ledger => {
                self.connect_ledger(&options.ledger_path, disallow, options.desired_network_id)
                    .await?
            }
            ProviderKind::LinkWallet => self.connect_link_wallet(disallow).await?,
            ProviderKind::InjectedWeb3 => self.connect_injected(disallow, false).await?,
            ProviderKind::QrWallet => {
                self.connect_qr_wallet(disallow, options.desired_network_id)
                    .await?
            }
            ProviderKind::ShowOnly => match &options.show_account {
                Some(address) => self.connect_show_only(address).await?,
                None => Connection::empty(),
            },
            ProviderKind::None => self.disconnect(),
        };

        if kind != ProviderKind::None && connection.account.is_none() {
            debug!(?kind, "no account, connection not established");
            return Ok(false);
        }

        if !disallow {
            *self.chosen.lock().unwrap_or_else(PoisonError::into_inner) = Some(kind);
        }
        self.establish_connection(connection, kind)?;
        Ok(true)
    }

    /// Publishes the connection, switches the read client to its network and
    /// forwards the wallet's notifications into the session's event stream.
    pub fn establish_connection(
        &self,
        connection: Connection,
        kind: ProviderKind,
    ) -> Result<(), SessionError> {
        info!(?kind, network_id = ?connection.network_id, "connection established");
        self.session.publish(SessionEvent::NetworkChanged {
            network: connection.network_id,
        });
        self.session.publish(SessionEvent::AccountChanged {
            account: connection.account,
        });
        self.session.publish(SessionEvent::ProviderChanged { kind });
        self.session.set_network(connection.network_id)?;

        if let Some(provider) = connection.provider {
            self.forward_events(provider.as_ref());
        }
        Ok(())
    }

    /// Start-up connection: auto-connects wallets that expect it, otherwise
    /// silently retries the last chosen provider and falls back to read-only
    /// mainnet.
    pub async fn try_connect(&self, show_provider: bool) -> Result<TryConnectOutcome, SessionError> {
        let flavor = self.sources.injected.as_ref().map(|p| p.flavor());
        if WalletFlavor::should_auto_connect(flavor) {
            let connection = self.connect_injected(false, true).await?;
            self.establish_connection(connection, ProviderKind::InjectedWeb3)?;
            return Ok(TryConnectOutcome::Connected);
        }

        let kind = self.chosen_provider().unwrap_or(ProviderKind::InjectedWeb3);
        let options = ConnectOptions {
            disallow_auth_dialog: true,
            ..ConnectOptions::default()
        };
        if self.connect_to_provider(kind, &options).await? {
            return Ok(TryConnectOutcome::Connected);
        }

        self.establish_connection(
            Connection {
                network_id: Some(NetworkId::MAINNET),
                ..Connection::empty()
            },
            ProviderKind::None,
        )?;
        Ok(if show_provider {
            TryConnectOutcome::PromptForProvider
        } else {
            TryConnectOutcome::ReadOnly
        })
    }

    /// Lists the hardware accounts at `paths` with their ether balances.
    ///
    /// Stops early when the device gives no address (locked, app closed),
    /// which usually means it needs the user.
    pub async fn retrieve_ledger_accounts(
        &self,
        paths: &[&str],
        use_ropsten: bool,
    ) -> Result<LedgerAccounts, SessionError> {
        let network_id = if use_ropsten {
            NetworkId::ROPSTEN
        } else {
            NetworkId::MAINNET
        };
        let client = self.session.connect_client(network_id)?;
        let queue = self.hardware_queue();

        let mut accounts = Vec::with_capacity(paths.len());
        let mut complete = true;
        for (i, path) in paths.iter().enumerate() {
            let address = match &queue {
                Ok(queue) => match queue.get_address(path).await {
                    Ok(address) => Some(address),
                    Err(e) => {
                        debug!(error = %e, path, "no address from device");
                        None
                    }
                },
                Err(_) => None,
            };

            let balance = match address {
                Some(address) => match client.get_balance(address).await {
                    Ok(balance) => Some(balance),
                    Err(e) => {
                        warn!(error = %e, %address, "balance lookup failed");
                        None
                    }
                },
                None => None,
            };

            let account = address
                .map(|a| checksum_address(&to_lower_hex(&a)))
                .transpose()?;
            accounts.push(LedgerAccount {
                derivation_path: path.to_string(),
                account,
                eth_balance_wei: balance,
                eth_balance: balance.map(format_ether),
            });

            if i + 1 < paths.len() && address.is_none() && balance.is_none() {
                complete = false;
                break;
            }
        }

        Ok(LedgerAccounts { accounts, complete })
    }

    fn endpoint_for(&self, network_id: NetworkId) -> Result<&str, SessionError> {
        let registry = self.session.registry();
        registry
            .name_of(network_id)
            .or_else(|| (network_id == NetworkId::MAINNET).then_some(MAINNET))
            .and_then(|name| registry.endpoint(name))
            .ok_or_else(|| SessionError::Configuration(format!("no endpoint for network {network_id}")))
    }

    async fn first_account(&self) -> Result<Option<String>, SessionError> {
        Ok(self.session.accounts().await?.into_iter().next())
    }

    fn forward_events(&self, provider: &dyn WalletProvider) {
        let Some(mut events) = provider.events() else {
            return;
        };
        let session: Weak<ProviderSession> = Arc::downgrade(&self.session);

        let forwarder = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "provider events lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(session) = session.upgrade() else {
                    break;
                };
                forward_event(&session, event).await;
            }
        });
        self.session.replace_forwarder(forwarder);
    }
}

async fn forward_event(session: &ProviderSession, event: ProviderEvent) {
    match event {
        ProviderEvent::AccountsChanged(accounts) => {
            session.publish(SessionEvent::NetworkChanged {
                network: session.current_network_id(),
            });
            session.publish(SessionEvent::AccountChanged {
                account: accounts.into_iter().next(),
            });
        }
        ProviderEvent::ChainChanged(raw) => {
            let network = NetworkId::parse(&raw);
            if let Err(e) = session.set_network(network) {
                warn!(error = %e, chain = %raw, "cannot follow chain change");
            }
            session.publish(SessionEvent::NetworkChanged { network });
            match session.accounts().await {
                Ok(accounts) => session.publish(SessionEvent::AccountChanged {
                    account: accounts.into_iter().next(),
                }),
                Err(e) => warn!(error = %e, "cannot re-read account after chain change"),
            }
        }
    }
}

/// Whether connecting would have to prompt: the wallet has no authorised
/// account yet.
async fn requires_auth_dialog(provider: &dyn WalletProvider) -> bool {
    match provider.request("eth_accounts", json!([])).await {
        Ok(accounts) => parse_accounts(accounts).map_or(true, |a| a.is_empty()),
        Err(e) => {
            debug!(error = %e, "cannot read authorised accounts");
            true
        }
    }
}
