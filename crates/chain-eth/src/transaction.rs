use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rlp::{BufMut, Decodable, Encodable, Header, RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::address::parse_address;
use crate::error::EthError;

/// EIP-1559 type byte.
pub const EIP1559_TX_TYPE: u8 = 0x02;

/// Chain id used when a request does not carry one.
const DEFAULT_CHAIN_ID: u64 = 1;

/// A transaction as handed over by a wallet collaborator, before validation.
///
/// Quantities are signed so that malformed input (negative nonce, gas or
/// chain id) can be rejected explicitly instead of wrapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Option<Address>,
    pub nonce: Option<i64>,
    pub gas: Option<i64>,
    pub gas_limit: Option<i64>,
    pub gas_price: Option<i128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    /// Recipient as a 0x-prefixed hex string; `None` creates a contract.
    pub to: Option<String>,
    pub value: Option<U256>,
    pub data: Option<Bytes>,
    pub chain_id: Option<i64>,
}

impl TransactionRequest {
    /// Whether both fee-market fields are set, which selects the typed encoding.
    pub fn is_fee_market(&self) -> bool {
        self.max_fee_per_gas.is_some() && self.max_priority_fee_per_gas.is_some()
    }

    /// Validates the request and converts it into a typed unsigned transaction.
    pub fn validate(&self) -> Result<UnsignedTransaction, EthError> {
        // Zero counts as unset for both gas fields.
        let gas = self
            .gas
            .filter(|gas| *gas != 0)
            .or(self.gas_limit.filter(|gas| *gas != 0))
            .ok_or(EthError::MissingGasLimit)?;

        let nonce = non_negative("nonce", self.nonce.unwrap_or(0))?;
        let gas_limit = non_negative("gas", gas)?;
        let chain_id = match self.chain_id {
            Some(id) => non_negative("chainId", id)?,
            None => DEFAULT_CHAIN_ID,
        };
        let gas_price = match self.gas_price {
            Some(price) => u128::try_from(price).map_err(|_| EthError::NegativeField("gasPrice"))?,
            None if self.is_fee_market() => 0,
            None => return Err(EthError::MissingGasPrice),
        };

        let to = match self.to.as_deref() {
            None | Some("") | Some("0x") => Recipient(None),
            Some(addr) => Recipient(Some(parse_address(addr)?)),
        };
        let value = self.value.unwrap_or_default();
        let data = self.data.clone().unwrap_or_default();

        match (self.max_fee_per_gas, self.max_priority_fee_per_gas) {
            (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) => {
                Ok(UnsignedTransaction::Eip1559(Eip1559Transaction {
                    chain_id,
                    nonce,
                    max_priority_fee_per_gas,
                    max_fee_per_gas,
                    gas_limit,
                    to,
                    value,
                    data,
                    access_list: Vec::new(),
                }))
            }
            _ => Ok(UnsignedTransaction::Legacy(LegacyTransaction {
                nonce,
                gas_price,
                gas_limit,
                to,
                value,
                data,
                chain_id,
            })),
        }
    }
}

fn non_negative(field: &'static str, value: i64) -> Result<u64, EthError> {
    u64::try_from(value).map_err(|_| EthError::NegativeField(field))
}

/// The encoding family of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    /// EIP-155 legacy list with chain id replay protection.
    Legacy,
    /// EIP-1559 fee-market transaction, prefixed with `0x02`.
    Eip1559,
}

impl TxType {
    /// The envelope type byte, if the encoding has one.
    pub fn type_byte(self) -> Option<u8> {
        match self {
            TxType::Legacy => None,
            TxType::Eip1559 => Some(EIP1559_TX_TYPE),
        }
    }
}

/// The exact bytes a signer must hash and sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignablePayload {
    pub tx_type: TxType,
    pub payload: Vec<u8>,
}

impl SignablePayload {
    /// Keccak-256 of the payload, i.e. the digest the device signs.
    pub fn signing_hash(&self) -> B256 {
        keccak256(&self.payload)
    }
}

/// A `{v, r, s}` signature as hex-encoded scalars, as returned by a signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub v: String,
    pub r: String,
    pub s: String,
}

impl Signature {
    pub fn new(v: impl Into<String>, r: impl Into<String>, s: impl Into<String>) -> Self {
        Self {
            v: v.into(),
            r: r.into(),
            s: s.into(),
        }
    }

    /// Joins the signature into the 65-byte `r || s || v` form used for
    /// personal messages. `v` is normalised to 27/28.
    pub fn to_joined_bytes(&self) -> Result<[u8; 65], EthError> {
        let r = scalar_bytes("r", &self.r)?;
        let s = scalar_bytes("s", &self.s)?;
        let v = scalar_bytes("v", &self.v)?;

        if r.len() > 32 || s.len() > 32 || v.len() > 1 {
            return Err(EthError::InvalidSignature("scalar out of range".into()));
        }

        let mut joined = [0u8; 65];
        joined[32 - r.len()..32].copy_from_slice(&r);
        joined[64 - s.len()..64].copy_from_slice(&s);
        let v = v.first().copied().unwrap_or(0);
        joined[64] = if v < 27 { v + 27 } else { v };
        Ok(joined)
    }
}

/// Converts a hex scalar into its canonical byte string: every leading zero
/// nibble is dropped and the remainder is padded back to an even length.
fn scalar_bytes(field: &'static str, scalar: &str) -> Result<Bytes, EthError> {
    let digits = scalar
        .strip_prefix("0x")
        .or_else(|| scalar.strip_prefix("0X"))
        .unwrap_or(scalar)
        .trim_start_matches('0');

    let even = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };

    hex::decode(even)
        .map(Bytes::from)
        .map_err(|e| EthError::InvalidSignature(format!("{field}: {e}")))
}

/// A validated unsigned transaction; exactly one of the two encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsignedTransaction {
    Legacy(LegacyTransaction),
    Eip1559(Eip1559Transaction),
}

impl UnsignedTransaction {
    pub fn tx_type(&self) -> TxType {
        match self {
            UnsignedTransaction::Legacy(_) => TxType::Legacy,
            UnsignedTransaction::Eip1559(_) => TxType::Eip1559,
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.chain_id,
            UnsignedTransaction::Eip1559(tx) => tx.chain_id,
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.nonce,
            UnsignedTransaction::Eip1559(tx) => tx.nonce,
        }
    }

    pub fn gas_limit(&self) -> u64 {
        match self {
            UnsignedTransaction::Legacy(tx) => tx.gas_limit,
            UnsignedTransaction::Eip1559(tx) => tx.gas_limit,
        }
    }

    /// Encodes the signing payload.
    ///
    /// Legacy: `rlp([nonce, gasPrice, gas, to, value, data, chainId, "", ""])`.
    /// EIP-1559: `0x02 || rlp([chainId, nonce, maxPriorityFeePerGas,
    /// maxFeePerGas, gas, to, value, data, accessList])`.
    pub fn encode_for_signing(&self) -> SignablePayload {
        let payload = match self {
            UnsignedTransaction::Legacy(tx) => alloy_rlp::encode(LegacySigningFields {
                nonce: tx.nonce,
                gas_price: tx.gas_price,
                gas_limit: tx.gas_limit,
                to: tx.to,
                value: tx.value,
                data: tx.data.clone(),
                chain_id: tx.chain_id,
                r_placeholder: Bytes::new(),
                s_placeholder: Bytes::new(),
            }),
            UnsignedTransaction::Eip1559(tx) => {
                let rlp = alloy_rlp::encode(tx);
                let mut payload = Vec::with_capacity(1 + rlp.len());
                payload.push(EIP1559_TX_TYPE);
                payload.extend_from_slice(&rlp);
                payload
            }
        };

        SignablePayload {
            tx_type: self.tx_type(),
            payload,
        }
    }

    /// Replaces the signature placeholders with `v, r, s` and encodes the
    /// final, broadcastable transaction.
    pub fn encode_signed(&self, signature: &Signature) -> Result<Vec<u8>, EthError> {
        let v = scalar_bytes("v", &signature.v)?;
        let r = scalar_bytes("r", &signature.r)?;
        let s = scalar_bytes("s", &signature.s)?;

        match self {
            UnsignedTransaction::Legacy(tx) => Ok(alloy_rlp::encode(LegacySignedFields {
                nonce: tx.nonce,
                gas_price: tx.gas_price,
                gas_limit: tx.gas_limit,
                to: tx.to,
                value: tx.value,
                data: tx.data.clone(),
                v,
                r,
                s,
            })),
            UnsignedTransaction::Eip1559(tx) => {
                let rlp = alloy_rlp::encode(Eip1559SignedFields {
                    chain_id: tx.chain_id,
                    nonce: tx.nonce,
                    max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
                    max_fee_per_gas: tx.max_fee_per_gas,
                    gas_limit: tx.gas_limit,
                    to: tx.to,
                    value: tx.value,
                    data: tx.data.clone(),
                    access_list: tx.access_list.clone(),
                    v,
                    r,
                    s,
                });
                let mut raw = Vec::with_capacity(1 + rlp.len());
                raw.push(EIP1559_TX_TYPE);
                raw.extend_from_slice(&rlp);
                Ok(raw)
            }
        }
    }
}

/// Validates `tx` and returns the payload a signer must sign.
pub fn build_signable_payload(tx: &TransactionRequest) -> Result<SignablePayload, EthError> {
    Ok(tx.validate()?.encode_for_signing())
}

/// Validates `tx` and returns the signed, broadcastable encoding.
pub fn build_signed_payload(
    tx: &TransactionRequest,
    signature: &Signature,
) -> Result<Vec<u8>, EthError> {
    tx.validate()?.encode_signed(signature)
}

/// Decodes a signing payload produced by [`UnsignedTransaction::encode_for_signing`].
pub fn decode_unsigned(payload: &[u8]) -> Result<UnsignedTransaction, EthError> {
    match payload.split_first() {
        Some((&EIP1559_TX_TYPE, mut rest)) => {
            let tx = Eip1559Transaction::decode(&mut rest)?;
            ensure_consumed(rest)?;
            Ok(UnsignedTransaction::Eip1559(tx))
        }
        _ => {
            let mut buf = payload;
            let fields = LegacySigningFields::decode(&mut buf)?;
            ensure_consumed(buf)?;
            if !fields.r_placeholder.is_empty() || !fields.s_placeholder.is_empty() {
                return Err(EthError::EncodingError(
                    "legacy signing payload carries a signature".into(),
                ));
            }
            Ok(UnsignedTransaction::Legacy(LegacyTransaction {
                nonce: fields.nonce,
                gas_price: fields.gas_price,
                gas_limit: fields.gas_limit,
                to: fields.to,
                value: fields.value,
                data: fields.data,
                chain_id: fields.chain_id,
            }))
        }
    }
}

/// A decoded signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: UnsignedTransaction,
    pub v: Bytes,
    pub r: Bytes,
    pub s: Bytes,
}

/// Decodes a signed transaction produced by [`UnsignedTransaction::encode_signed`].
///
/// The chain id of a legacy transaction is recovered from `v` (EIP-155:
/// `v = chainId * 2 + 35 + parity`).
pub fn decode_signed(raw: &[u8]) -> Result<SignedTransaction, EthError> {
    match raw.split_first() {
        Some((&EIP1559_TX_TYPE, mut rest)) => {
            let fields = Eip1559SignedFields::decode(&mut rest)?;
            ensure_consumed(rest)?;
            Ok(SignedTransaction {
                transaction: UnsignedTransaction::Eip1559(Eip1559Transaction {
                    chain_id: fields.chain_id,
                    nonce: fields.nonce,
                    max_priority_fee_per_gas: fields.max_priority_fee_per_gas,
                    max_fee_per_gas: fields.max_fee_per_gas,
                    gas_limit: fields.gas_limit,
                    to: fields.to,
                    value: fields.value,
                    data: fields.data,
                    access_list: fields.access_list,
                }),
                v: fields.v,
                r: fields.r,
                s: fields.s,
            })
        }
        _ => {
            let mut buf = raw;
            let fields = LegacySignedFields::decode(&mut buf)?;
            ensure_consumed(buf)?;
            let v = be_to_u64(&fields.v)?;
            let chain_id = if v >= 35 { (v - 35) / 2 } else { 0 };
            Ok(SignedTransaction {
                transaction: UnsignedTransaction::Legacy(LegacyTransaction {
                    nonce: fields.nonce,
                    gas_price: fields.gas_price,
                    gas_limit: fields.gas_limit,
                    to: fields.to,
                    value: fields.value,
                    data: fields.data,
                    chain_id,
                }),
                v: fields.v,
                r: fields.r,
                s: fields.s,
            })
        }
    }
}

/// Keccak-256 digest.
pub fn keccak256(data: &[u8]) -> B256 {
    B256::from_slice(&Keccak256::digest(data))
}

/// The transaction hash of a signed, broadcastable encoding.
pub fn transaction_hash(raw_tx: &[u8]) -> B256 {
    keccak256(raw_tx)
}

fn ensure_consumed(rest: &[u8]) -> Result<(), EthError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(EthError::EncodingError(format!(
            "{} trailing bytes after transaction",
            rest.len()
        )))
    }
}

fn be_to_u64(bytes: &[u8]) -> Result<u64, EthError> {
    if bytes.len() > 8 {
        return Err(EthError::InvalidSignature("v does not fit in 64 bits".into()));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

// ---------------------------------------------------------------------------
// RLP-encodable structures
// ---------------------------------------------------------------------------

/// Legacy transaction fields. Encoded through [`LegacySigningFields`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Recipient,
    pub value: U256,
    pub data: Bytes,
    pub chain_id: u64,
}

/// Unsigned EIP-1559 transaction fields, in wire order.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Eip1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub gas_limit: u64,
    pub to: Recipient,
    pub value: U256,
    pub data: Bytes,
    pub access_list: Vec<AccessListItem>,
}

/// EIP-155 signing list: the two trailing empty strings stand in for `r, s`.
#[derive(RlpEncodable, RlpDecodable)]
struct LegacySigningFields {
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    to: Recipient,
    value: U256,
    data: Bytes,
    chain_id: u64,
    r_placeholder: Bytes,
    s_placeholder: Bytes,
}

#[derive(RlpEncodable, RlpDecodable)]
struct LegacySignedFields {
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    to: Recipient,
    value: U256,
    data: Bytes,
    v: Bytes,
    r: Bytes,
    s: Bytes,
}

#[derive(RlpEncodable, RlpDecodable)]
struct Eip1559SignedFields {
    chain_id: u64,
    nonce: u64,
    max_priority_fee_per_gas: u128,
    max_fee_per_gas: u128,
    gas_limit: u64,
    to: Recipient,
    value: U256,
    data: Bytes,
    access_list: Vec<AccessListItem>,
    v: Bytes,
    r: Bytes,
    s: Bytes,
}

/// An EIP-2930 access list entry (always empty in practice).
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<B256>,
}

/// The `to` field: a 20-byte address, or the empty string for contract
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Recipient(pub Option<Address>);

impl Recipient {
    /// Lower-case 0x-prefixed hex, or `0x` for contract creation.
    pub fn to_hex(&self) -> String {
        match self.0 {
            Some(addr) => format!("0x{}", hex::encode(addr)),
            None => "0x".to_string(),
        }
    }
}

impl Encodable for Recipient {
    fn encode(&self, out: &mut dyn BufMut) {
        match &self.0 {
            Some(addr) => addr.encode(out),
            None => out.put_u8(alloy_rlp::EMPTY_STRING_CODE),
        }
    }

    fn length(&self) -> usize {
        match &self.0 {
            Some(addr) => addr.length(),
            None => 1,
        }
    }
}

impl Decodable for Recipient {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let bytes = Header::decode_bytes(buf, false)?;
        match bytes.len() {
            0 => Ok(Recipient(None)),
            20 => Ok(Recipient(Some(Address::from_slice(bytes)))),
            _ => Err(alloy_rlp::Error::UnexpectedLength),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::signature::hazmat::PrehashSigner;
    use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};

    const TEST_ADDRESS: &str = "0x000000000000000000000000000000000000dEaD";

    /// Well-known test private key (DO NOT use on mainnet).
    const TEST_PRIVKEY: [u8; 32] = {
        let mut key = [0u8; 32];
        key[31] = 1;
        key
    };

    fn legacy_request() -> TransactionRequest {
        TransactionRequest {
            nonce: Some(5),
            gas_price: Some(8_000_000_000),
            gas: Some(21_000),
            to: Some("0xABCDEFabcdef0123456789ABCDEFabcdef012345".into()),
            value: Some(U256::ZERO),
            data: Some(Bytes::new()),
            chain_id: Some(1),
            ..Default::default()
        }
    }

    fn fee_market_request() -> TransactionRequest {
        TransactionRequest {
            nonce: Some(42),
            gas_limit: Some(65_000),
            max_fee_per_gas: Some(50_000_000_000),
            max_priority_fee_per_gas: Some(1_000_000_000),
            to: Some(TEST_ADDRESS.into()),
            value: Some(U256::from(1_000_000_000_000_000_000u128)),
            data: Some(Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb])),
            chain_id: Some(137),
            ..Default::default()
        }
    }

    fn list_items(payload: &[u8]) -> Vec<Vec<u8>> {
        let mut buf = payload;
        let header = Header::decode(&mut buf).unwrap();
        assert!(header.list, "payload must be an RLP list");
        let mut items = Vec::new();
        let mut body = &buf[..header.payload_length];
        while !body.is_empty() {
            let start = body;
            let item = Header::decode(&mut body).unwrap();
            body = &body[item.payload_length..];
            items.push(start[..start.len() - body.len()].to_vec());
        }
        items
    }

    fn sign_with_test_key(payload: &SignablePayload, v_offset: u64) -> Signature {
        let key = SigningKey::from_bytes((&TEST_PRIVKEY).into()).unwrap();
        let (sig, recid): (K256Signature, RecoveryId) =
            key.sign_prehash(payload.signing_hash().as_slice()).unwrap();
        let v = v_offset + recid.is_y_odd() as u64;
        Signature::new(
            format!("{v:x}"),
            hex::encode(sig.r().to_bytes()),
            hex::encode(sig.s().to_bytes()),
        )
    }

    #[test]
    fn missing_gas_is_rejected() {
        let mut tx = legacy_request();
        tx.gas = None;
        assert!(matches!(tx.validate(), Err(EthError::MissingGasLimit)));
    }

    #[test]
    fn zero_gas_counts_as_missing() {
        let mut tx = legacy_request();
        tx.gas = Some(0);
        assert!(matches!(tx.validate(), Err(EthError::MissingGasLimit)));

        tx.gas_limit = Some(25_000);
        assert_eq!(tx.validate().unwrap().gas_limit(), 25_000);
    }

    #[test]
    fn legacy_without_gas_price_is_rejected() {
        let mut tx = legacy_request();
        tx.gas_price = None;
        assert!(matches!(tx.validate(), Err(EthError::MissingGasPrice)));

        let mut tx = fee_market_request();
        tx.gas_price = None;
        assert_eq!(tx.validate().unwrap().tx_type(), TxType::Eip1559);
    }

    #[test]
    fn gas_limit_is_accepted_in_place_of_gas() {
        let mut tx = legacy_request();
        tx.gas = None;
        tx.gas_limit = Some(30_000);
        assert_eq!(tx.validate().unwrap().gas_limit(), 30_000);
    }

    #[test]
    fn negative_fields_are_rejected() {
        let mut tx = legacy_request();
        tx.nonce = Some(-1);
        assert!(matches!(tx.validate(), Err(EthError::NegativeField("nonce"))));

        let mut tx = legacy_request();
        tx.gas = Some(-5);
        assert!(matches!(tx.validate(), Err(EthError::NegativeField("gas"))));

        let mut tx = legacy_request();
        tx.gas_price = Some(-8);
        assert!(matches!(tx.validate(), Err(EthError::NegativeField("gasPrice"))));

        let mut tx = legacy_request();
        tx.chain_id = Some(-1);
        assert!(matches!(tx.validate(), Err(EthError::NegativeField("chainId"))));
    }

    #[test]
    fn one_fee_market_field_stays_legacy() {
        let mut tx = legacy_request();
        tx.max_fee_per_gas = Some(100);
        let payload = build_signable_payload(&tx).unwrap();
        assert_eq!(payload.tx_type, TxType::Legacy);
        assert_eq!(list_items(&payload.payload).len(), 9);
    }

    #[test]
    fn legacy_payload_has_nine_items_with_empty_placeholders() {
        let payload = build_signable_payload(&legacy_request()).unwrap();
        assert_eq!(payload.tx_type, TxType::Legacy);
        assert_eq!(payload.tx_type.type_byte(), None);

        let items = list_items(&payload.payload);
        assert_eq!(items.len(), 9);
        // chainId 1 encodes as the single byte 0x01.
        assert_eq!(items[6], vec![0x01]);
        assert_eq!(items[7], vec![0x80]);
        assert_eq!(items[8], vec![0x80]);
    }

    #[test]
    fn fee_market_payload_has_type_prefix() {
        let payload = build_signable_payload(&fee_market_request()).unwrap();
        assert_eq!(payload.tx_type, TxType::Eip1559);
        assert_eq!(payload.payload[0], EIP1559_TX_TYPE);

        let items = list_items(&payload.payload[1..]);
        assert_eq!(items.len(), 9);
        // Empty access list.
        assert_eq!(items[8], vec![0xc0]);
    }

    #[test]
    fn integers_are_minimal_big_endian() {
        let mut tx = legacy_request();
        tx.nonce = Some(0);
        tx.gas = Some(0x0100);
        let payload = build_signable_payload(&tx).unwrap();
        let items = list_items(&payload.payload);
        assert_eq!(items[0], vec![0x80]);
        assert_eq!(items[2], vec![0x82, 0x01, 0x00]);
    }

    #[test]
    fn recipient_case_does_not_change_encoding() {
        let mut lower = legacy_request();
        lower.to = Some("0xabcdefabcdef0123456789abcdefabcdef012345".into());
        assert_eq!(
            build_signable_payload(&lower).unwrap(),
            build_signable_payload(&legacy_request()).unwrap()
        );
    }

    #[test]
    fn contract_creation_encodes_empty_recipient() {
        let mut tx = legacy_request();
        tx.to = None;
        let payload = build_signable_payload(&tx).unwrap();
        assert_eq!(list_items(&payload.payload)[3], vec![0x80]);
    }

    #[test]
    fn unsigned_round_trip_legacy() {
        let tx = legacy_request().validate().unwrap();
        let payload = tx.encode_for_signing();
        assert_eq!(decode_unsigned(&payload.payload).unwrap(), tx);
    }

    #[test]
    fn unsigned_round_trip_fee_market() {
        let tx = fee_market_request().validate().unwrap();
        let payload = tx.encode_for_signing();
        let decoded = decode_unsigned(&payload.payload).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.encode_for_signing(), payload);
    }

    #[test]
    fn signed_legacy_example_recovers_chain_id() {
        let signature = Signature::new(
            "25",
            "1a2b3c4d5e6f1a2b3c4d5e6f1a2b3c4d5e6f1a2b3c4d5e6f1a2b3c4d5e6f1a2b",
            "3c4d5e6f1a2b3c4d5e6f1a2b3c4d5e6f1a2b3c4d5e6f1a2b3c4d5e6f1a2b3c4d",
        );
        let raw = build_signed_payload(&legacy_request(), &signature).unwrap();

        let items = list_items(&raw);
        assert_eq!(items.len(), 9);
        assert_eq!(items[6], vec![0x25]);

        let decoded = decode_signed(&raw).unwrap();
        assert_eq!(decoded.transaction.chain_id(), 1);
        assert_eq!(decoded.transaction.nonce(), 5);
    }

    #[test]
    fn signature_scalars_drop_leading_zeros() {
        let signature = Signature::new("0x01", "00ab", "0x000c0d");
        let raw = build_signed_payload(&fee_market_request(), &signature).unwrap();
        let decoded = decode_signed(&raw).unwrap();
        assert_eq!(decoded.v.as_ref(), &[0x01]);
        assert_eq!(decoded.r.as_ref(), &[0xab]);
        assert_eq!(decoded.s.as_ref(), &[0x0c, 0x0d]);
    }

    #[test]
    fn zero_parity_encodes_as_empty_string() {
        let signature = Signature::new("0", "01", "02");
        let raw = build_signed_payload(&fee_market_request(), &signature).unwrap();
        let items = list_items(&raw[1..]);
        assert_eq!(items.len(), 12);
        assert_eq!(items[9], vec![0x80]);
    }

    #[test]
    fn invalid_signature_hex_is_rejected() {
        let signature = Signature::new("zz", "01", "02");
        assert!(matches!(
            build_signed_payload(&legacy_request(), &signature),
            Err(EthError::InvalidSignature(_))
        ));
    }

    #[test]
    fn signed_fee_market_recovers_signer() {
        let tx = fee_market_request().validate().unwrap();
        let payload = tx.encode_for_signing();
        let signature = sign_with_test_key(&payload, 0);

        let raw = tx.encode_signed(&signature).unwrap();
        assert_eq!(raw[0], EIP1559_TX_TYPE);

        let decoded = decode_signed(&raw).unwrap();
        assert_eq!(decoded.transaction, tx);

        // The unsigned payload rebuilt from the decoded fields hashes to the
        // same digest, so the signature still recovers the test key.
        let rebuilt = decoded.transaction.encode_for_signing();
        let mut rs = [0u8; 64];
        rs[32 - decoded.r.len()..32].copy_from_slice(&decoded.r);
        rs[64 - decoded.s.len()..].copy_from_slice(&decoded.s);
        let sig = K256Signature::from_slice(&rs).unwrap();
        let parity = decoded.v.first().copied().unwrap_or(0);
        let recovered = VerifyingKey::recover_from_prehash(
            rebuilt.signing_hash().as_slice(),
            &sig,
            RecoveryId::from_byte(parity).unwrap(),
        )
        .unwrap();
        let expected = SigningKey::from_bytes((&TEST_PRIVKEY).into()).unwrap();
        assert_eq!(&recovered, expected.verifying_key());
    }

    #[test]
    fn signed_legacy_uses_eip155_v() {
        let tx = legacy_request().validate().unwrap();
        let payload = tx.encode_for_signing();
        // chainId 1: v = 1 * 2 + 35 + parity.
        let signature = sign_with_test_key(&payload, 37);
        let raw = tx.encode_signed(&signature).unwrap();

        let decoded = decode_signed(&raw).unwrap();
        assert_eq!(decoded.transaction, tx);
        assert!(decoded.v.as_ref() == [37] || decoded.v.as_ref() == [38]);
    }

    #[test]
    fn transaction_hash_is_keccak_of_raw() {
        let raw = build_signed_payload(&legacy_request(), &Signature::new("25", "01", "02")).unwrap();
        let hash = transaction_hash(&raw);
        assert_eq!(hash.as_slice(), Keccak256::digest(&raw).as_slice());
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = build_signable_payload(&fee_market_request()).unwrap();
        let b = build_signable_payload(&fee_market_request()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut payload = build_signable_payload(&legacy_request()).unwrap().payload;
        payload.push(0x00);
        assert!(decode_unsigned(&payload).is_err());
    }

    #[test]
    fn joined_signature_is_65_bytes() {
        let sig = Signature::new("1", "0xab", "0xcd");
        let joined = sig.to_joined_bytes().unwrap();
        assert_eq!(joined[31], 0xab);
        assert_eq!(joined[63], 0xcd);
        assert_eq!(joined[64], 28);
    }
}
