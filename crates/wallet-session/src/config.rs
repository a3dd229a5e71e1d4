//! Session configuration and the network registry built from it.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use alloy_json_abi::JsonAbi;
use alloy_primitives::Address;
use chain_eth::abi::ContractAbi;
use chain_eth::address::parse_address;
use chain_eth::networks::{well_known_id, NetworkId, MAINNET};
use serde::Deserialize;

use crate::error::SessionError;

/// Top-level configuration document.
///
/// ```json
/// {
///   "default_network": "mainnet",
///   "networks": {
///     "mainnet": {
///       "rpc_url": "https://mainnet.example/rpc",
///       "abis": { "CToken": [ ... ] },
///       "contracts": { "cDAI": "0x5d3a..." }
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_network_name")]
    pub default_network: String,
    pub networks: BTreeMap<String, NetworkConfig>,
    /// Gas price (wei) for legacy sends that do not set one.
    #[serde(default)]
    pub default_gas_price: Option<u128>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Falls back to the well-known id for the network name.
    #[serde(default)]
    pub network_id: Option<u64>,
    pub rpc_url: String,
    #[serde(default)]
    pub abis: BTreeMap<String, JsonAbi>,
    /// Contract name -> deployed address.
    #[serde(default)]
    pub contracts: BTreeMap<String, String>,
}

fn default_network_name() -> String {
    MAINNET.to_string()
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, SessionError> {
        serde_json::from_str(json).map_err(|e| SessionError::Configuration(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SessionError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }
}

#[derive(Debug)]
struct NetworkEntry {
    id: NetworkId,
    endpoint: String,
    abis: HashMap<String, Arc<ContractAbi>>,
    names_by_address: HashMap<Address, String>,
    addresses_by_name: HashMap<String, Address>,
}

/// Immutable network name <-> id, endpoint and ABI tables.
#[derive(Debug)]
pub struct NetworkRegistry {
    networks: HashMap<String, NetworkEntry>,
    names_by_id: HashMap<NetworkId, String>,
    default_network: String,
}

impl NetworkRegistry {
    pub fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        if !config.networks.contains_key(&config.default_network) {
            return Err(SessionError::Configuration(format!(
                "default network {} is not configured",
                config.default_network
            )));
        }

        let mut networks = HashMap::with_capacity(config.networks.len());
        let mut names_by_id = HashMap::with_capacity(config.networks.len());

        for (name, network) in &config.networks {
            let id = network
                .network_id
                .map(NetworkId)
                .or_else(|| well_known_id(name))
                .ok_or_else(|| {
                    SessionError::Configuration(format!("no network id for {name}"))
                })?;

            if let Some(existing) = names_by_id.insert(id, name.clone()) {
                return Err(SessionError::Configuration(format!(
                    "network id {id} used by both {existing} and {name}"
                )));
            }

            let abis = network
                .abis
                .iter()
                .map(|(contract, abi)| {
                    let abi = ContractAbi::new(contract.clone(), abi.clone());
                    (contract.clone(), Arc::new(abi))
                })
                .collect();

            let mut names_by_address = HashMap::new();
            let mut addresses_by_name = HashMap::new();
            for (contract, address) in &network.contracts {
                let address = parse_address(address)?;
                names_by_address.insert(address, contract.clone());
                addresses_by_name.insert(contract.clone(), address);
            }

            networks.insert(
                name.clone(),
                NetworkEntry {
                    id,
                    endpoint: network.rpc_url.clone(),
                    abis,
                    names_by_address,
                    addresses_by_name,
                },
            );
        }

        Ok(Self {
            networks,
            names_by_id,
            default_network: config.default_network.clone(),
        })
    }

    pub fn name_of(&self, id: NetworkId) -> Option<&str> {
        self.names_by_id.get(&id).map(String::as_str)
    }

    pub fn id_of(&self, name: &str) -> Option<NetworkId> {
        self.networks.get(name).map(|n| n.id)
    }

    pub fn endpoint(&self, name: &str) -> Option<&str> {
        self.networks.get(name).map(|n| n.endpoint.as_str())
    }

    pub fn default_network(&self) -> &str {
        &self.default_network
    }

    pub fn default_network_id(&self) -> Option<NetworkId> {
        self.id_of(&self.default_network)
    }

    /// ABI for `contract` on `network`.
    pub fn abi(&self, network: &str, contract: &str) -> Option<Arc<ContractAbi>> {
        self.networks.get(network)?.abis.get(contract).cloned()
    }

    /// Configured contract name for a deployed address on `network`.
    pub fn contract_name(&self, network: &str, address: &Address) -> Option<&str> {
        self.networks
            .get(network)?
            .names_by_address
            .get(address)
            .map(String::as_str)
    }

    pub fn contract_address(&self, network: &str, contract: &str) -> Option<Address> {
        self.networks
            .get(network)?
            .addresses_by_name
            .get(contract)
            .copied()
    }
}
