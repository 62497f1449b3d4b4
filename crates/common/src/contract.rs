use serde::{Deserialize, Serialize};

use crate::{AccountAddress, BlockHash, BlockNumber, BlockTimestamp, ContractAddress, TransactionHash};

/// A deployed-contract document, written exactly once per address while
/// processing the creation transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub address: ContractAddress,
    /// The `from` of the creation transaction, as confirmed by its receipt.
    pub creator: AccountAddress,
    pub transaction_hash: TransactionHash,
    pub block_hash: BlockHash,
    pub block_number: BlockNumber,
    pub block_time: BlockTimestamp,
    /// Deployed bytecode as reported by the endpoint at the `latest` tag.
    pub byte_code: String,
    /// Progress marker owned by the downstream event scanner; ingestion
    /// only ever initializes it to zero.
    pub last_scanned_block: BlockNumber,
}
