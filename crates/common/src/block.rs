use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{BlockHash, BlockNumber, BlockTimestamp};

/// A block document, canonical or uncle.
///
/// Typed fields are the ones the pipeline derives or relies on; every
/// other field of the RPC payload passes through `extra` untouched,
/// including the original hex `number`. Documents are immutable once
/// written; downstream consumers paginate them under that contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    /// Height derived from the hex `number`; never mutated after insert.
    #[serde(rename = "numberInBase10")]
    pub number: BlockNumber,
    pub timestamp: BlockTimestamp,
    #[serde(default)]
    pub is_uncle: bool,
    /// Uncle hashes in the order the endpoint reported them. Only
    /// populated with meaning on canonical blocks; an uncle's own list is
    /// never resolved.
    #[serde(default)]
    pub uncles: Vec<BlockHash>,
    /// Raw RPC fields passed through as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
