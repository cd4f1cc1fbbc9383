//! Fixed-point token amounts

use crate::error::{FaucetError, FaucetResult};
use serde::{Deserialize, Serialize};

/// Precision of the network fee token (GAS), used for fees reported by the node.
pub const GAS_DECIMALS: u32 = 8;

/// An amount in the token's smallest unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenAmount(u128);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(0);

    pub const fn from_units(units: u128) -> Self {
        Self(units)
    }

    pub const fn units(&self) -> u128 {
        self.0
    }

    /// `whole` tokens scaled by `10^decimals`. `None` on overflow.
    pub fn from_whole(whole: u64, decimals: u32) -> Option<Self> {
        scale(decimals)?.checked_mul(whole as u128).map(Self)
    }

    /// Parses a decimal string such as `"10000"` or `"12.5"` as reported by
    /// the node. Digits beyond `decimals` are accepted only when they are zero.
    pub fn parse_decimal(input: &str, decimals: u32) -> FaucetResult<Self> {
        let invalid = || FaucetError::InternalError(format!("Invalid token amount: {:?}", input));
        let input = input.trim();
        let (whole, fraction) = input.split_once('.').unwrap_or((input, ""));

        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let (kept, dropped) = fraction.split_at(fraction.len().min(decimals as usize));
        if dropped.chars().any(|c| c != '0') {
            return Err(invalid());
        }

        let factor = scale(decimals).ok_or_else(invalid)?;
        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u128>().map_err(|_| invalid())?
        };

        let mut fraction_units = 0u128;
        if !kept.is_empty() {
            let padding = scale(decimals - kept.len() as u32).ok_or_else(invalid)?;
            fraction_units = kept.parse::<u128>().map_err(|_| invalid())? * padding;
        }

        whole_units
            .checked_mul(factor)
            .and_then(|v| v.checked_add(fraction_units))
            .map(Self)
            .ok_or_else(invalid)
    }

    /// Renders the amount with trailing fractional zeros trimmed.
    pub fn to_decimal_string(&self, decimals: u32) -> String {
        let Some(factor) = scale(decimals) else {
            return self.0.to_string();
        };
        if decimals == 0 {
            return self.0.to_string();
        }

        let whole = self.0 / factor;
        let fraction = self.0 % factor;
        if fraction == 0 {
            return whole.to_string();
        }

        let digits = format!("{:0width$}", fraction, width = decimals as usize);
        format!("{}.{}", whole, digits.trim_end_matches('0'))
    }
}

fn scale(decimals: u32) -> Option<u128> {
    10u128.checked_pow(decimals)
}
