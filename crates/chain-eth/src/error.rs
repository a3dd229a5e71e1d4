use thiserror::Error;

/// Ethereum encoding and lookup errors.
#[derive(Debug, Error)]
pub enum EthError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("\"gas\" is missing")]
    MissingGasLimit,

    #[error("\"gasPrice\" is missing")]
    MissingGasPrice,

    #[error("{0} is lower than 0")]
    NegativeField(&'static str),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(#[from] alloy_rlp::Error),

    #[error("cannot find ABI function {method}/{arity} in {contract}")]
    AbiMethodNotFound {
        contract: String,
        method: String,
        arity: usize,
    },

    #[error("abi error: {0}")]
    AbiError(String),
}

impl From<alloy_dyn_abi::Error> for EthError {
    fn from(e: alloy_dyn_abi::Error) -> Self {
        EthError::AbiError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_address() {
        let err = EthError::InvalidAddress("bad checksum".into());
        assert_eq!(err.to_string(), "invalid address: bad checksum");
    }

    #[test]
    fn display_missing_gas_limit() {
        assert_eq!(EthError::MissingGasLimit.to_string(), "\"gas\" is missing");
    }

    #[test]
    fn display_missing_gas_price() {
        assert_eq!(EthError::MissingGasPrice.to_string(), "\"gasPrice\" is missing");
    }

    #[test]
    fn display_negative_field() {
        let err = EthError::NegativeField("nonce");
        assert_eq!(err.to_string(), "nonce is lower than 0");
    }

    #[test]
    fn display_abi_method_not_found() {
        let err = EthError::AbiMethodNotFound {
            contract: "CToken".into(),
            method: "mint".into(),
            arity: 2,
        };
        assert_eq!(err.to_string(), "cannot find ABI function mint/2 in CToken");
    }

    #[test]
    fn display_decoding_error_wraps_rlp() {
        let err: EthError = alloy_rlp::Error::InputTooShort.into();
        assert!(err.to_string().starts_with("decoding error:"));
    }

    #[test]
    fn error_trait_is_implemented() {
        let err: Box<dyn std::error::Error> = Box::new(EthError::AbiError("zeta".into()));
        assert!(err.to_string().contains("zeta"));
    }
}
