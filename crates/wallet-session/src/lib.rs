//! Wallet provider and network session layer.
//!
//! A [`ProviderSession`] holds the read client for the current network and
//! the write client of the connected wallet. [`WalletConnector`] attaches
//! wallets (injected, link, QR, hardware, show-only) and
//! [`TransactionFacade`] issues contract calls and sends through whichever
//! clients are attached, publishing [`SessionEvent`]s for the UI.

pub mod config;
pub mod connect;
pub mod error;
pub mod facade;
pub mod gas;
pub mod ledger;
pub mod provider;
pub mod queue;
pub mod session;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{NetworkRegistry, SessionConfig};
pub use connect::{ConnectOptions, TryConnectOutcome, WalletConnector, WalletSources};
pub use error::SessionError;
pub use facade::{ContractCall, SendOptions, TransactionFacade};
pub use ledger::{HardwareSignerQueue, HardwareTransport, LedgerSigner};
pub use provider::{RpcClient, RpcConnector, WalletProvider};
pub use session::{ProviderHandle, ProviderSession};
pub use types::{ProviderKind, SessionEvent, TrxNotice, WalletFlavor};
