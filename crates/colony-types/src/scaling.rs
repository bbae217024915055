//! Conversions from simulation quantities to fixed-width ledger fields.
//!
//! The simulation works in decimal units (micrometres, minutes, payload
//! units). The ledger stores unsigned integers. Every conversion here
//! truncates toward zero and saturates at the target width, so an
//! out-of-range value is clamped rather than rejected.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Scale factor for two implied decimal places.
const CENTI: Decimal = Decimal::ONE_HUNDRED;

fn centi(value: Decimal) -> Decimal {
    value.checked_mul(CENTI).unwrap_or(Decimal::MAX).trunc()
}

/// Scale by 100 into a `u32` (simulation timestamps). Negative input clamps to 0.
pub fn centi_u32(value: Decimal) -> u32 {
    let scaled = centi(value);
    if scaled.is_sign_negative() {
        0
    } else {
        scaled.to_u32().unwrap_or(u32::MAX)
    }
}

/// Scale by 100 into a `u16` (payload amounts). Negative input clamps to 0.
pub fn centi_u16(value: Decimal) -> u16 {
    let scaled = centi(value);
    if scaled.is_sign_negative() {
        0
    } else {
        scaled.to_u16().unwrap_or(u16::MAX)
    }
}

/// Convert a signed coordinate to the ledger's unsigned grid.
///
/// Uses the absolute value, truncated and saturated at `u32::MAX`.
pub fn coordinate_u32(value: Decimal) -> u32 {
    value.abs().trunc().to_u32().unwrap_or(u32::MAX)
}

/// Saturate a counter into a `u16` summary field.
pub fn saturate_u16(count: u64) -> u16 {
    u16::try_from(count).unwrap_or(u16::MAX)
}

/// Saturate a counter into a `u32` summary field.
pub fn saturate_u32(count: u64) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}
