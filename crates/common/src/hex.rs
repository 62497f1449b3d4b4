//! Conversions between Ethereum hex quantities and integers.

/// Error parsing a hex quantity such as `0x1b4`.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseQuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid hex quantity")]
    Invalid(#[from] std::num::ParseIntError),
}

/// Parses a `0x`-prefixed hex quantity into an integer. The prefix is
/// optional since some endpoints omit it on uncle payloads.
pub fn parse_quantity(input: &str) -> Result<u64, ParseQuantityError> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);

    if digits.is_empty() {
        return Err(ParseQuantityError::Empty);
    }

    u64::from_str_radix(digits, 16).map_err(Into::into)
}

/// Encodes an integer as the minimal `0x`-prefixed hex quantity, the form
/// JSON-RPC parameters require.
pub fn encode_quantity(value: u64) -> String {
    format!("{value:#x}")
}
