use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer identifying a chain (1 = mainnet, 3 = ropsten, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(pub u64);

impl NetworkId {
    pub const MAINNET: NetworkId = NetworkId(1);
    pub const ROPSTEN: NetworkId = NetworkId(3);

    /// Parses a decimal or `0x`-prefixed hex network id.
    ///
    /// Anything unparsable (empty strings, garbage, negative numbers) is
    /// treated as absent.
    pub fn parse(raw: &str) -> Option<NetworkId> {
        let raw = raw.trim();
        let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex_digits) => u64::from_str_radix(hex_digits, 16).ok(),
            None => raw.parse::<u64>().ok(),
        };
        parsed.map(NetworkId)
    }

    /// The well-known name of this network, if any.
    pub fn well_known_name(self) -> Option<&'static str> {
        WELL_KNOWN
            .iter()
            .find(|(id, _)| *id == self.0)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NetworkId {
    fn from(id: u64) -> Self {
        NetworkId(id)
    }
}

/// Name of the network that ABI and address lookups fall back to.
pub const MAINNET: &str = "mainnet";

/// Well-known network ids and their names.
const WELL_KNOWN: &[(u64, &str)] = &[
    (0, "olympic"),
    (1, "mainnet"),
    (2, "morden"),
    (3, "ropsten"),
    (4, "rinkeby"),
    (5, "goerli"),
    (8, "ubiq"),
    (42, "kovan"),
    (77, "sokol"),
    (99, "core"),
    (999, "development"),
];

/// Returns the well-known id for a network name, or `None` if unknown.
pub fn well_known_id(name: &str) -> Option<NetworkId> {
    WELL_KNOWN
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(id, _)| NetworkId(*id))
}
