//! Gas limit derivation from node estimates.
//!
//! The limit is the estimate padded by 25%, rounded down to a multiple of
//! 10,000, plus a wallet-specific suffix some wallets look for in the low
//! digits. When the estimate fails the wallet's upper bound is used instead.

use alloy_primitives::Address;
use tracing::{debug, warn};

use crate::provider::{CallRequest, RpcClient};
use crate::types::WalletFlavor;

const GAS_ROUNDING: u128 = 10_000;
const BASE_UPPER_GAS_LIMIT: u64 = 550_000;

const COINBASE_WALLET_GAS_SUFFIX: u64 = 7_350;
const IM_TOKEN_GAS_SUFFIX: u64 = 1_896;
const DEFAULT_GAS_SUFFIX: u64 = 2_020;

/// Suffix and fallback constants for one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    pub suffix: u64,
    pub upper_limit: u64,
}

impl GasPolicy {
    pub fn for_wallet(flavor: Option<WalletFlavor>) -> Self {
        let suffix = match flavor {
            Some(WalletFlavor::CoinbaseWallet) => COINBASE_WALLET_GAS_SUFFIX,
            Some(WalletFlavor::ImToken) => IM_TOKEN_GAS_SUFFIX,
            Some(WalletFlavor::Tally)
            | Some(WalletFlavor::MetaMask)
            | Some(WalletFlavor::MetaMaskMobile)
            | Some(WalletFlavor::Other)
            | None => DEFAULT_GAS_SUFFIX,
        };
        Self {
            suffix,
            upper_limit: BASE_UPPER_GAS_LIMIT + suffix,
        }
    }

    /// Limit for a contract-method estimate.
    pub fn limit_from_estimate(&self, estimate: u64) -> u64 {
        let masked = masked(estimate);
        saturate(masked).saturating_add(self.suffix)
    }

    /// Limit for a raw-payload estimate. Never rounds below the estimate.
    pub fn limit_from_payload_estimate(&self, estimate: u64) -> u64 {
        let mut masked = masked(estimate);
        if masked < u128::from(estimate) {
            masked += GAS_ROUNDING;
        }
        saturate(masked).saturating_add(self.suffix)
    }
}

/// `round(estimate * 1.25)` rounded down to a multiple of 10,000.
fn masked(estimate: u64) -> u128 {
    let padded = (u128::from(estimate) * 5 + 2) / 4;
    padded - padded % GAS_ROUNDING
}

fn saturate(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Estimates gas limits against a read client.
#[derive(Debug, Clone, Copy)]
pub struct GasEstimator {
    policy: GasPolicy,
}

impl GasEstimator {
    pub fn new(policy: GasPolicy) -> Self {
        Self { policy }
    }

    pub fn for_wallet(flavor: Option<WalletFlavor>) -> Self {
        Self::new(GasPolicy::for_wallet(flavor))
    }

    pub fn policy(&self) -> GasPolicy {
        self.policy
    }

    /// Gas limit for a contract call. Estimate failures yield the upper bound.
    pub async fn estimate(&self, client: &dyn RpcClient, request: &CallRequest) -> u64 {
        match client.estimate_gas(request).await {
            Ok(estimate) => {
                let limit = self.policy.limit_from_estimate(estimate);
                debug!(estimate, limit, "estimated gas");
                limit
            }
            Err(e) => {
                warn!(error = %e, fallback = self.policy.upper_limit, "gas estimate failed");
                self.policy.upper_limit
            }
        }
    }

    /// Gas limit for a raw transaction payload.
    pub async fn estimate_payload(&self, client: &dyn RpcClient, request: &CallRequest) -> u64 {
        match client.estimate_gas(request).await {
            Ok(estimate) => self.policy.limit_from_payload_estimate(estimate),
            Err(e) => {
                warn!(error = %e, fallback = self.policy.upper_limit, "payload gas estimate failed");
                self.policy.upper_limit
            }
        }
    }
}

/// Current transaction count for `address`, or `None` if the lookup fails.
pub async fn transaction_count(client: &dyn RpcClient, address: Address) -> Option<u64> {
    match client.get_transaction_count(address).await {
        Ok(count) => Some(count),
        Err(e) => {
            warn!(error = %e, %address, "nonce lookup failed");
            None
        }
    }
}
