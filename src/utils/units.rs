//! Smallest-unit to display-unit conversion.

pub use bigdecimal::BigDecimal;
use bigdecimal::RoundingMode;
use num_bigint::{BigInt, BigUint};

/// Number of fractional digits between wei and ether.
pub const ETHER_DECIMALS: i64 = 18;

/// Scales an integer `amount` down by `10^decimals` and rounds the result to
/// `precision` fractional digits, ties to even.
pub fn to_display_unit(amount: &BigUint, decimals: i64, precision: i64) -> BigDecimal {
    BigDecimal::new(BigInt::from(amount.clone()), decimals)
        .with_scale_round(precision, RoundingMode::HalfEven)
}

/// Wei to ether at full wei precision, so no wei is ever rounded away.
pub fn to_ether(wei: &BigUint) -> BigDecimal {
    to_display_unit(wei, ETHER_DECIMALS, ETHER_DECIMALS)
}
