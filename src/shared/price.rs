//! Decimal parsing for monetary values.
//!
//! Amounts and prices cross the public API as arbitrary-precision decimal
//! strings and are held as `rust_decimal::Decimal` from then on.

use crate::error::ExchangeError;
use rust_decimal::Decimal;

/// Parse a decimal string exactly. Input that would need rounding to fit is
/// rejected.
pub fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, ExchangeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ExchangeError::Validation(format!("{field} is empty")));
    }
    Decimal::from_str_exact(trimmed)
        .map_err(|e| ExchangeError::Validation(format!("{field} {raw:?} is not a decimal: {e}")))
}

/// Parse a decimal string that must be strictly positive.
pub fn parse_positive(field: &str, raw: &str) -> Result<Decimal, ExchangeError> {
    let value = parse_decimal(field, raw)?;
    if value <= Decimal::ZERO {
        return Err(ExchangeError::Validation(format!(
            "{field} must be positive, got {raw}"
        )));
    }
    Ok(value)
}

/// Render a decimal for a wire parameter, without trailing zeros.
pub fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}
