//! Persistence gateway for ingested chain data.
//!
//! A clone-cheap handle over one named database holding the `blocks`,
//! `transactions` and `contracts` collections. Every write is idempotent
//! per primary key: blocks and transactions absorb duplicate-key
//! conflicts wholesale (a re-fetched hash is simply already there), while
//! contracts are inserted strictly and report an existing address to the
//! caller instead of failing. Documents are never updated in place once
//! written.

use mongodb::bson::doc;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use quarry_common::{Block, BlockNumber, Contract, Transaction};

/// Collection names within the configured database.
const BLOCKS: &str = "blocks";
const TRANSACTIONS: &str = "transactions";
const CONTRACTS: &str = "contracts";

/// Server error code for a unique-index violation.
const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] mongodb::error::Error),
}

/// Contains only those store operations the ingestion pipeline uses.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait::async_trait]
pub trait GatewayApi {
    /// The highest ingested height, or [None] on an empty store.
    async fn highest_block_number(&self) -> Result<Option<BlockNumber>, StorageError>;

    /// Inserts blocks, absorbing duplicate-key conflicts. Returns how
    /// many documents were actually inserted.
    async fn upsert_blocks(&self, blocks: &[Block]) -> Result<usize, StorageError>;

    /// Inserts transactions, absorbing duplicate-key conflicts. Returns
    /// how many documents were actually inserted.
    async fn upsert_transactions(
        &self,
        transactions: &[Transaction],
    ) -> Result<usize, StorageError>;

    /// Strictly inserts a contract. Returns `false` without failing when
    /// the address already exists, which is expected when concurrent
    /// re-runs touch the same creation transaction.
    async fn insert_contract_if_absent(&self, contract: &Contract)
        -> Result<bool, StorageError>;

    /// Administrative reset: deletes every stored block. Returns the
    /// number of deleted documents.
    async fn delete_all_blocks(&self) -> Result<u64, StorageError>;
}

/// Handle to the document store.
///
/// Construct once at startup with [Storage::connect], then pass (clones
/// of) it to the components which persist data.
#[derive(Clone, Debug)]
pub struct Storage {
    database: Database,
}

impl Storage {
    /// Connects to the store behind `connection_string` and selects
    /// `database`. The connection is lazy; the first operation surfaces
    /// an unreachable server.
    pub async fn connect(connection_string: &str, database: &str) -> Result<Self, StorageError> {
        let client = Client::with_uri_str(connection_string).await?;

        Ok(Self {
            database: client.database(database),
        })
    }

    /// Creates the unique and lookup indexes all collections rely on.
    ///
    /// Call once at startup. Index creation is idempotent on the server
    /// side, so repeated runs are harmless.
    pub async fn ensure_indexes(&self) -> Result<(), StorageError> {
        self.blocks()
            .create_indexes([
                unique_index(doc! { "hash": 1 }),
                lookup_index(doc! { "numberInBase10": 1 }),
                lookup_index(doc! { "timestamp": 1 }),
                lookup_index(doc! { "isUncle": 1 }),
            ])
            .await?;

        self.transactions()
            .create_indexes([unique_index(doc! { "hash": 1 })])
            .await?;

        self.contracts()
            .create_indexes([unique_index(doc! { "address": 1 })])
            .await?;

        Ok(())
    }

    fn blocks(&self) -> Collection<Block> {
        self.database.collection(BLOCKS)
    }

    fn transactions(&self) -> Collection<Transaction> {
        self.database.collection(TRANSACTIONS)
    }

    fn contracts(&self) -> Collection<Contract> {
        self.database.collection(CONTRACTS)
    }
}

#[async_trait::async_trait]
impl GatewayApi for Storage {
    #[tracing::instrument(skip(self))]
    async fn highest_block_number(&self) -> Result<Option<BlockNumber>, StorageError> {
        let highest = self
            .blocks()
            .find_one(doc! {})
            .sort(doc! { "numberInBase10": -1 })
            .await?;

        Ok(highest.map(|block| block.number))
    }

    #[tracing::instrument(skip_all, fields(blocks = blocks.len()))]
    async fn upsert_blocks(&self, blocks: &[Block]) -> Result<usize, StorageError> {
        if blocks.is_empty() {
            return Ok(0);
        }

        match self.blocks().insert_many(blocks).ordered(false).await {
            Ok(outcome) => Ok(outcome.inserted_ids.len()),
            Err(error) => absorb_duplicates(error, blocks.len()),
        }
    }

    #[tracing::instrument(skip_all, fields(transactions = transactions.len()))]
    async fn upsert_transactions(
        &self,
        transactions: &[Transaction],
    ) -> Result<usize, StorageError> {
        if transactions.is_empty() {
            return Ok(0);
        }

        match self
            .transactions()
            .insert_many(transactions)
            .ordered(false)
            .await
        {
            Ok(outcome) => Ok(outcome.inserted_ids.len()),
            Err(error) => absorb_duplicates(error, transactions.len()),
        }
    }

    #[tracing::instrument(skip_all, fields(address = %contract.address))]
    async fn insert_contract_if_absent(
        &self,
        contract: &Contract,
    ) -> Result<bool, StorageError> {
        match self.contracts().insert_one(contract).await {
            Ok(_) => Ok(true),
            Err(error) if is_duplicate_key(&error) => {
                tracing::debug!("Contract already present, skipping");
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn delete_all_blocks(&self) -> Result<u64, StorageError> {
        let outcome = self.blocks().delete_many(doc! {}).await?;

        Ok(outcome.deleted_count)
    }
}

/// Maps an unordered bulk-insert failure to the number of documents which
/// did land, provided every per-document failure was a duplicate key.
/// Anything else propagates untouched.
fn absorb_duplicates(
    error: mongodb::error::Error,
    attempted: usize,
) -> Result<usize, StorageError> {
    if let ErrorKind::InsertMany(failure) = &*error.kind {
        if let Some(write_errors) = &failure.write_errors {
            if failure.write_concern_error.is_none()
                && write_errors.iter().all(|write| write.code == DUPLICATE_KEY)
            {
                return Ok(attempted - write_errors.len());
            }
        }
    }

    Err(error.into())
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    match &*error.kind {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn unique_index(keys: mongodb::bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn lookup_index(keys: mongodb::bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}
