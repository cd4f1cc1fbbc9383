//! Wallet address validation

use crate::error::{FaucetError, FaucetResult};
use serde::Serialize;
use std::fmt;

/// Version byte of standard account addresses.
pub const ADDRESS_VERSION: u8 = 0x17;

/// Version byte plus a 20-byte script hash.
const PAYLOAD_LEN: usize = 21;

/// A base58check wallet address that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Validates user input. Surrounding whitespace is ignored.
    pub fn parse(input: &str) -> FaucetResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(FaucetError::Validation(
                "You must input a wallet address to proceed".to_string(),
            ));
        }

        let payload = bs58::decode(trimmed)
            .with_check(Some(ADDRESS_VERSION))
            .into_vec()
            .map_err(|e| FaucetError::Validation(format!("Invalid wallet address: {}", e)))?;

        if payload.len() != PAYLOAD_LEN {
            return Err(FaucetError::Validation(format!(
                "Invalid wallet address: expected {} payload bytes, got {}",
                PAYLOAD_LEN,
                payload.len()
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Encodes the address for a little-endian script hash.
    pub fn from_script_hash(script_hash: [u8; 20]) -> Self {
        let mut payload = Vec::with_capacity(PAYLOAD_LEN);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(&script_hash);
        Self(bs58::encode(payload).with_check().into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
