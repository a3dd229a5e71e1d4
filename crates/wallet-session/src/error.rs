use chain_eth::error::EthError;
use thiserror::Error;

use crate::ledger::TransportError;
use crate::provider::RpcError;

/// Messages MetaMask returns when the user hits "cancel".
const USER_CANCEL_PREFIXES: [&str; 2] = [
    "Returned error: Error: MetaMask Tx Signature: User denied",
    "Returned error: Error: MetaMask Message Signature: User denied",
];

/// EIP-1193 `userRejectedRequest`.
const USER_REJECTED_CODE: i64 = 4001;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(#[from] RpcError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EthError),

    #[error("User cancelled the request")]
    UserCancelled,

    #[error("Signer rejected the request")]
    SignerRejected,

    #[error("Signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("Cannot send transaction without a transaction provider")]
    NoWriteClient,

    #[error("Session closed before a read client was attached")]
    Closed,
}

impl SessionError {
    /// Whether the wallet reported that the user dismissed its prompt.
    pub fn is_user_cancel(&self) -> bool {
        match self {
            SessionError::UserCancelled => true,
            SessionError::Network(e) => {
                e.code == Some(USER_REJECTED_CODE)
                    || USER_CANCEL_PREFIXES.iter().any(|p| e.message.starts_with(p))
            }
            _ => false,
        }
    }

    /// Whether the error comes from configuration (unknown network, missing
    /// ABI method) and will not go away on retry.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SessionError::Configuration(_) | SessionError::Encoding(EthError::AbiMethodNotFound { .. })
        )
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Rejected => SessionError::SignerRejected,
            TransportError::Unavailable(reason) => SessionError::SignerUnavailable(reason),
        }
    }
}
