//! Resolution of contract-creation transactions into contract documents.

use quarry_common::{AccountAddress, Block, BlockNumber, Contract, ContractAddress, Transaction};
use quarry_ethereum::{EthereumApi, EthereumError};
use serde_json::Value;

/// Error resolving a single creation transaction.
///
/// Contained by the caller: the parent block and its other transactions
/// still persist.
#[derive(Debug, thiserror::Error)]
pub enum ContractResolutionError {
    /// The receipt carries no `contractAddress`, e.g. the creation
    /// reverted.
    #[error("receipt has no contract address")]
    NoContractAddress,
    /// The receipt lacks a field the contract document needs.
    #[error("receipt is missing {0}")]
    MalformedReceipt(&'static str),
    #[error(transparent)]
    Ethereum(#[from] EthereumError),
}

/// Builds the [Contract] deployed by `transaction`, which must carry
/// creation semantics (`to` is null).
///
/// The receipt supplies the deployed address and confirms the creator;
/// bytecode is then read at the `latest` tag. If the address has since
/// self-destructed or state was pruned, the stored code may not match the
/// code at creation time. Documented behavior inherited from the chain
/// API, not corrected here.
pub async fn resolve<E>(
    ethereum: &E,
    transaction: &Transaction,
    block: &Block,
) -> Result<Contract, ContractResolutionError>
where
    E: EthereumApi + ?Sized + Sync,
{
    let receipt = ethereum.transaction_receipt(&transaction.hash).await?;

    let address = receipt
        .get("contractAddress")
        .and_then(Value::as_str)
        .ok_or(ContractResolutionError::NoContractAddress)?;
    let creator = receipt
        .get("from")
        .and_then(Value::as_str)
        .ok_or(ContractResolutionError::MalformedReceipt("from"))?;

    let address = ContractAddress::new(address);
    let byte_code = ethereum.code(&address).await?;

    Ok(Contract {
        address,
        creator: AccountAddress::new(creator),
        transaction_hash: transaction.hash.clone(),
        block_hash: block.hash.clone(),
        block_number: block.number,
        block_time: block.timestamp,
        byte_code,
        last_scanned_block: BlockNumber::GENESIS,
    })
}
