use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AccountAddress, BlockHash, BlockTimestamp, TransactionHash};

/// A transaction document.
///
/// `timestamp` is stamped from the parent block during normalization and
/// always equals that block's timestamp at ingestion time. An absent or
/// null `to` is the creation marker: the transaction deploys a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: TransactionHash,
    pub block_hash: BlockHash,
    pub from: AccountAddress,
    #[serde(default)]
    pub to: Option<AccountAddress>,
    pub input: String,
    pub timestamp: BlockTimestamp,
    /// Raw RPC fields passed through as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Transaction {
    /// True when this transaction deploys a contract.
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }
}
