use alloy_primitives::{Address, B256};
use chain_eth::networks::NetworkId;
use serde::{Deserialize, Serialize};

/// The kind of wallet connection selected at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    None,
    Ledger,
    LinkWallet,
    InjectedWeb3,
    QrWallet,
    ShowOnly,
}

impl ProviderKind {
    /// Numeric code used by UI collaborators.
    pub fn code(&self) -> u8 {
        match self {
            ProviderKind::None => 0,
            ProviderKind::Ledger => 1,
            ProviderKind::LinkWallet => 2,
            ProviderKind::InjectedWeb3 => 3,
            ProviderKind::QrWallet => 4,
            ProviderKind::ShowOnly => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ProviderKind::None),
            1 => Some(ProviderKind::Ledger),
            2 => Some(ProviderKind::LinkWallet),
            3 => Some(ProviderKind::InjectedWeb3),
            4 => Some(ProviderKind::QrWallet),
            5 => Some(ProviderKind::ShowOnly),
            _ => None,
        }
    }
}

/// The wallet software behind a provider, as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletFlavor {
    CoinbaseWallet,
    ImToken,
    Tally,
    MetaMask,
    MetaMaskMobile,
    Other,
}

impl WalletFlavor {
    /// Whether a browser carrying this wallet should be connected without
    /// asking. Desktop MetaMask and "no wallet" wait for a user choice.
    pub fn should_auto_connect(flavor: Option<WalletFlavor>) -> bool {
        match flavor {
            None | Some(WalletFlavor::MetaMask) => false,
            Some(WalletFlavor::CoinbaseWallet)
            | Some(WalletFlavor::ImToken)
            | Some(WalletFlavor::Tally)
            | Some(WalletFlavor::MetaMaskMobile)
            | Some(WalletFlavor::Other) => true,
        }
    }
}

/// A read-display session: a literal address and network, no signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowOnly {
    pub address: String,
    pub network_id: NetworkId,
}

/// Published when a transaction has been handed to the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrxNotice {
    pub trx_hash: B256,
    pub network: Option<NetworkId>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub contract: Address,
    pub asset: Option<Address>,
    pub customer: Address,
    pub function: String,
    pub args: Vec<String>,
    pub expected_nonce: Option<u64>,
}

/// Notifications for UI collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    NetworkChanged { network: Option<NetworkId> },
    AccountChanged { account: Option<String> },
    ProviderChanged { kind: ProviderKind },
    NewTransaction(TrxNotice),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_codes_round_trip() {
        for kind in [
            ProviderKind::None,
            ProviderKind::Ledger,
            ProviderKind::LinkWallet,
            ProviderKind::InjectedWeb3,
            ProviderKind::QrWallet,
            ProviderKind::ShowOnly,
        ] {
            assert_eq!(ProviderKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ProviderKind::from_code(9), None);
    }

    #[test]
    fn auto_connect_policy() {
        assert!(!WalletFlavor::should_auto_connect(None));
        assert!(!WalletFlavor::should_auto_connect(Some(WalletFlavor::MetaMask)));
        assert!(WalletFlavor::should_auto_connect(Some(WalletFlavor::ImToken)));
        assert!(WalletFlavor::should_auto_connect(Some(WalletFlavor::MetaMaskMobile)));
    }

    #[test]
    fn trx_notice_serializes_camel_case() {
        let notice = TrxNotice {
            trx_hash: B256::ZERO,
            network: Some(NetworkId(1)),
            timestamp: 1,
            contract: Address::ZERO,
            asset: None,
            customer: Address::ZERO,
            function: "mint".into(),
            args: vec!["5".into()],
            expected_nonce: Some(3),
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["trxHash"], serde_json::json!(format!("{:#x}", B256::ZERO)));
        assert_eq!(json["network"], 1);
        assert_eq!(json["expectedNonce"], 3);
    }
}
