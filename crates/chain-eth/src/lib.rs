//! Ethereum primitives for the wallet session layer.
//!
//! This crate provides:
//! - RLP encoding/decoding of legacy (EIP-155) and typed (EIP-1559) transactions
//! - Final signed-transaction assembly from an external `{v, r, s}` signature
//! - Address parsing and EIP-55 checksums
//! - Contract ABI lookup by method name and arity, call/log encoding
//! - The well-known network id table

pub mod abi;
pub mod address;
pub mod error;
pub mod networks;
pub mod transaction;
