//! Contract ABI lookup and call/log encoding.
//!
//! ABI encoding itself is delegated to `alloy-dyn-abi`; this module resolves
//! functions by name and arity and events by name, the way contract artifacts
//! are addressed by the session layer.

use alloy_dyn_abi::{DecodedEvent, DynSolValue, EventExt, FunctionExt, JsonAbiExt};
use alloy_json_abi::{Event, Function, JsonAbi};
use alloy_primitives::{Bytes, B256};
use serde::Deserialize;

use crate::error::EthError;

/// A named contract ABI, in the shape of a compiler build artifact
/// (`{"contractName": ..., "abi": [...]}`).
#[derive(Debug, Clone, Deserialize)]
pub struct ContractAbi {
    #[serde(rename = "contractName", alias = "name")]
    pub name: String,
    pub abi: JsonAbi,
}

impl ContractAbi {
    pub fn new(name: impl Into<String>, abi: JsonAbi) -> Self {
        Self {
            name: name.into(),
            abi,
        }
    }

    /// Parses a bare JSON ABI array.
    pub fn from_abi_json(name: impl Into<String>, json: &str) -> Result<Self, EthError> {
        let abi: JsonAbi =
            serde_json::from_str(json).map_err(|e| EthError::AbiError(e.to_string()))?;
        Ok(Self::new(name, abi))
    }

    /// Finds the function named `method` taking exactly `arity` inputs.
    pub fn function(&self, method: &str, arity: usize) -> Result<&Function, EthError> {
        self.abi
            .function(method)
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == arity))
            .ok_or_else(|| EthError::AbiMethodNotFound {
                contract: self.name.clone(),
                method: method.to_string(),
                arity,
            })
    }

    /// ABI-encodes a call to `method` (selector followed by arguments).
    pub fn encode_call(&self, method: &str, args: &[DynSolValue]) -> Result<Bytes, EthError> {
        let function = self.function(method, args.len())?;
        Ok(function.abi_encode_input(args)?.into())
    }

    /// Decodes the first return value of `method` from raw call output.
    pub fn decode_output(
        &self,
        method: &str,
        arity: usize,
        data: &[u8],
    ) -> Result<DynSolValue, EthError> {
        let function = self.function(method, arity)?;
        function
            .abi_decode_output(data)?
            .into_iter()
            .next()
            .ok_or_else(|| EthError::AbiError(format!("{method} returned no values")))
    }

    /// Looks up a non-anonymous event by name.
    pub fn event(&self, name: &str) -> Option<ContractEvent<'_>> {
        let event = self.abi.event(name)?.first()?;
        Some(ContractEvent {
            signature: event.selector(),
            event,
        })
    }
}

/// An event definition plus its topic-0 signature.
#[derive(Debug, Clone, Copy)]
pub struct ContractEvent<'a> {
    event: &'a Event,
    signature: B256,
}

impl<'a> ContractEvent<'a> {
    /// `keccak256` of the canonical event signature.
    pub fn signature(&self) -> B256 {
        self.signature
    }

    pub fn name(&self) -> &'a str {
        &self.event.name
    }

    /// Whether a log's first topic identifies this event.
    pub fn matches(&self, topics: &[B256]) -> bool {
        topics.first() == Some(&self.signature)
    }

    /// Decodes a log's indexed topics (including topic 0) and data.
    pub fn decode(&self, topics: &[B256], data: &[u8]) -> Result<DecodedEvent, EthError> {
        Ok(self.event.decode_log_parts(topics.iter().copied(), data)?)
    }
}
