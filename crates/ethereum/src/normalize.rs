//! Normalization of raw RPC payloads into storage documents.
//!
//! Pure and deterministic: the same input always yields the same output
//! and nothing here performs I/O. Which raw fields get rewritten or
//! derived is data (see [FieldTable]), so a chain adding fields is a
//! table change, not a code change.

use quarry_common::{hex, Block, BlockTimestamp, Transaction};
use serde_json::{Map, Value};

/// Version of the normalization schema applied to raw payloads.
pub const SCHEMA_VERSION: u32 = 1;

/// Declarative description of how raw RPC fields are rewritten.
struct FieldTable {
    /// Hex quantities rewritten in place as integers.
    hex_to_int: &'static [&'static str],
    /// Hex quantities copied into a new integer field; the source is kept
    /// raw as a passthrough field.
    derived_ints: &'static [(&'static str, &'static str)],
}

/// Table applied to canonical and uncle block payloads (schema v1).
const BLOCK_FIELDS: FieldTable = FieldTable {
    hex_to_int: &["timestamp"],
    derived_ints: &[("number", "numberInBase10")],
};

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("field {field} is not a hex quantity")]
    InvalidQuantity {
        field: &'static str,
        #[source]
        source: hex::ParseQuantityError,
    },
    #[error("field {0} has an unexpected shape")]
    UnexpectedShape(&'static str),
    #[error("malformed document")]
    Document(#[from] serde_json::Error),
}

/// Splits a raw `eth_getBlockByNumber` payload into its block document
/// and the embedded transactions, which are returned raw so the caller
/// can type them with [normalize_transaction].
///
/// Uncle hashes are copied in reported order without being resolved;
/// fetching the uncle bodies is the caller's job.
pub fn normalize_block(
    mut raw: Map<String, Value>,
) -> Result<(Block, Vec<Map<String, Value>>), NormalizeError> {
    apply(&BLOCK_FIELDS, &mut raw)?;

    let transactions = match raw.remove("transactions") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(transactions)) => transactions
            .into_iter()
            .map(|transaction| match transaction {
                Value::Object(transaction) => Ok(transaction),
                // Hash-only lists mean the block was requested without
                // transaction bodies.
                _ => Err(NormalizeError::UnexpectedShape("transactions")),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(NormalizeError::UnexpectedShape("transactions")),
    };

    let block = serde_json::from_value(Value::Object(raw))?;

    Ok((block, transactions))
}

/// Normalizes an `eth_getUncleByBlockHashAndIndex` payload.
///
/// Same field table as canonical blocks; the document is flagged as an
/// uncle and its own uncle list is left unresolved.
pub fn normalize_uncle(mut raw: Map<String, Value>) -> Result<Block, NormalizeError> {
    apply(&BLOCK_FIELDS, &mut raw)?;
    raw.insert("isUncle".to_owned(), Value::Bool(true));

    Ok(serde_json::from_value(Value::Object(raw))?)
}

/// Types a raw embedded transaction and stamps it with its parent block's
/// timestamp.
pub fn normalize_transaction(
    mut raw: Map<String, Value>,
    timestamp: BlockTimestamp,
) -> Result<Transaction, NormalizeError> {
    raw.insert("timestamp".to_owned(), Value::from(timestamp.get()));

    Ok(serde_json::from_value(Value::Object(raw))?)
}

fn apply(table: &FieldTable, raw: &mut Map<String, Value>) -> Result<(), NormalizeError> {
    for &field in table.hex_to_int {
        let value = quantity(raw, field)?;
        raw.insert(field.to_owned(), Value::from(value));
    }

    for &(source, derived) in table.derived_ints {
        let value = quantity(raw, source)?;
        raw.insert(derived.to_owned(), Value::from(value));
    }

    Ok(())
}

fn quantity(raw: &Map<String, Value>, field: &'static str) -> Result<u64, NormalizeError> {
    let value = raw
        .get(field)
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingField(field))?;

    hex::parse_quantity(value).map_err(|source| NormalizeError::InvalidQuantity { field, source })
}
