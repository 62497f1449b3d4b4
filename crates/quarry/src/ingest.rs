//! The batch-ingestion coordinator.
//!
//! Drives a run through its three phases: determine the height range to
//! cover, ingest it in fixed-width windows of concurrent per-height
//! tasks, and drain with a run report. Windows are strictly sequential
//! (window *k+1* never starts before window *k* has fully settled), which
//! bounds in-flight requests against the endpoint to the window width.
//! Within a window, completion order is unspecified; that is safe because
//! every write is idempotent per key and no two tasks touch the same
//! records.

pub mod contract;
mod window;

use std::num::NonZeroUsize;

use futures::future::join_all;
use quarry_common::{Block, BlockNumber, Transaction};
use quarry_ethereum::normalize::{
    normalize_block, normalize_transaction, normalize_uncle, NormalizeError,
};
use quarry_ethereum::{EthereumApi, EthereumError};
use quarry_storage::{GatewayApi, StorageError};

pub use window::Window;

/// Which document kinds a run actually persists. Disabled kinds are still
/// fetched, normalized and resolved, but never written.
#[derive(Debug, Clone, Copy)]
pub struct PersistenceFlags {
    pub blocks: bool,
    pub transactions: bool,
    pub contracts: bool,
}

impl Default for PersistenceFlags {
    fn default() -> Self {
        Self {
            blocks: true,
            transactions: true,
            contracts: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Window width: heights fetched concurrently per window.
    pub batch_size: NonZeroUsize,
    /// Ignore the stored height and start over from height 0.
    pub from_genesis: bool,
    pub persistence: PersistenceFlags,
}

/// Fatal ingestion failures. Everything else is contained within the
/// height it occurred in.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The store claims a height past the chain tip: the store and the
    /// endpoint disagree about which chain this is, e.g. the endpoint
    /// points at the wrong network.
    #[error("stored height {stored} is ahead of the chain tip {tip}")]
    InconsistentState {
        stored: BlockNumber,
        tip: BlockNumber,
    },
    #[error(transparent)]
    Ethereum(#[from] EthereumError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why a single height failed. Contained within its task and surfaced
/// through the window summary, never propagated to sibling heights.
#[derive(Debug, thiserror::Error)]
pub enum HeightError {
    #[error(transparent)]
    Ethereum(#[from] EthereumError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Counts of what one ingested height produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeightStats {
    /// Canonical plus uncle block documents.
    pub blocks: usize,
    pub transactions: usize,
    /// Creation transactions successfully resolved into contracts.
    pub contracts: usize,
    /// Creation transactions whose resolution failed; the rest of their
    /// height still went through.
    pub failed_contracts: usize,
}

impl HeightStats {
    fn absorb(&mut self, other: HeightStats) {
        self.blocks += other.blocks;
        self.transactions += other.transactions;
        self.contracts += other.contracts;
        self.failed_contracts += other.failed_contracts;
    }
}

/// Outcome of one height's fetch-and-persist task.
#[derive(Debug)]
struct HeightOutcome {
    height: BlockNumber,
    result: Result<HeightStats, HeightError>,
}

/// Settled results of one window, the unit the caller can act on: the
/// failed heights are this run's retry candidates.
#[derive(Debug)]
pub struct WindowSummary {
    pub window: Window,
    pub synced: usize,
    pub stats: HeightStats,
    pub failed: Vec<(BlockNumber, HeightError)>,
}

impl WindowSummary {
    fn collect(window: Window, outcomes: Vec<HeightOutcome>) -> Self {
        let mut summary = Self {
            window,
            synced: 0,
            stats: HeightStats::default(),
            failed: Vec::new(),
        };

        for outcome in outcomes {
            match outcome.result {
                Ok(stats) => {
                    summary.synced += 1;
                    summary.stats.absorb(stats);
                }
                Err(error) => summary.failed.push((outcome.height, error)),
            }
        }

        summary
    }
}

/// What a drained run covered.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Heights fully ingested.
    pub synced: usize,
    pub stats: HeightStats,
    /// Heights left unsynced; candidates for a retry run.
    pub failed: Vec<BlockNumber>,
}

impl RunReport {
    fn absorb(&mut self, summary: WindowSummary) {
        self.synced += summary.synced;
        self.stats.absorb(summary.stats);
        self.failed
            .extend(summary.failed.into_iter().map(|(height, _)| height));
    }
}

/// Runs the full ingestion state machine and returns the run report once
/// the final window has settled.
///
/// Per-height failures never abort the run; the exit is clean regardless
/// of how many heights failed, and the next run re-derives its range from
/// what actually got persisted.
pub async fn run<E, G>(
    ethereum: &E,
    gateway: &G,
    config: &IngestConfig,
) -> Result<RunReport, IngestError>
where
    E: EthereumApi + Sync,
    G: GatewayApi + Sync,
{
    // Determine the range to cover.
    let stored = if config.from_genesis {
        BlockNumber::GENESIS
    } else {
        gateway
            .highest_block_number()
            .await?
            .unwrap_or(BlockNumber::GENESIS)
    };
    let tip = ethereum.block_number().await?;

    if stored > tip {
        return Err(IngestError::InconsistentState { stored, tip });
    }

    tracing::info!(%stored, %tip, "Ingesting range");

    let mut report = RunReport::default();
    for window in window::windows(stored, tip, config.batch_size) {
        let outcomes = join_all(
            window
                .heights()
                .map(|height| sync_height(ethereum, gateway, height, &config.persistence)),
        )
        .await;

        let summary = WindowSummary::collect(window, outcomes);
        tracing::info!(
            window = %summary.window,
            synced = summary.synced,
            failed = summary.failed.len(),
            transactions = summary.stats.transactions,
            contracts = summary.stats.contracts,
            "Window settled"
        );
        report.absorb(summary);
    }

    // Drained.
    Ok(report)
}

/// Wraps one height's ingestion so that any error is captured in the
/// outcome instead of reaching sibling tasks.
async fn sync_height<E, G>(
    ethereum: &E,
    gateway: &G,
    height: BlockNumber,
    persistence: &PersistenceFlags,
) -> HeightOutcome
where
    E: EthereumApi + Sync,
    G: GatewayApi + Sync,
{
    let result = ingest_height(ethereum, gateway, height, persistence).await;

    if let Err(error) = &result {
        tracing::warn!(%height, %error, "Failed to ingest height");
    }

    HeightOutcome { height, result }
}

/// Fetches, normalizes and persists a single height: the canonical block,
/// its uncles, its transactions and any contracts they deploy.
async fn ingest_height<E, G>(
    ethereum: &E,
    gateway: &G,
    height: BlockNumber,
    persistence: &PersistenceFlags,
) -> Result<HeightStats, HeightError>
where
    E: EthereumApi + Sync,
    G: GatewayApi + Sync,
{
    let raw = ethereum.block_by_number(height).await?;
    let (canonical, raw_transactions) = normalize_block(raw)?;

    let mut uncles = Vec::with_capacity(canonical.uncles.len());
    for index in 0..canonical.uncles.len() {
        let raw = ethereum
            .uncle_by_block_hash_and_index(&canonical.hash, index)
            .await?;
        uncles.push(normalize_uncle(raw)?);
    }

    let transactions = raw_transactions
        .into_iter()
        .map(|raw| normalize_transaction(raw, canonical.timestamp))
        .collect::<Result<Vec<_>, _>>()?;

    let mut stats = HeightStats::default();

    // Contracts first, per creation transaction; a failed resolution only
    // loses that contract, never the height.
    for transaction in transactions.iter().filter(|tx| tx.is_contract_creation()) {
        match resolve_contract(ethereum, gateway, transaction, &canonical, persistence).await {
            Ok(()) => stats.contracts += 1,
            Err(error) => {
                stats.failed_contracts += 1;
                tracing::warn!(
                    transaction = %transaction.hash,
                    %error,
                    "Failed to resolve deployed contract"
                );
            }
        }
    }

    stats.transactions = transactions.len();
    if persistence.transactions && !transactions.is_empty() {
        gateway.upsert_transactions(&transactions).await?;
    }

    let mut blocks = Vec::with_capacity(1 + uncles.len());
    blocks.push(canonical);
    blocks.extend(uncles);

    stats.blocks = blocks.len();
    if persistence.blocks {
        gateway.upsert_blocks(&blocks).await?;
    }

    Ok(stats)
}

#[derive(Debug, thiserror::Error)]
enum ContractPersistError {
    #[error(transparent)]
    Resolution(#[from] contract::ContractResolutionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

async fn resolve_contract<E, G>(
    ethereum: &E,
    gateway: &G,
    transaction: &Transaction,
    block: &Block,
    persistence: &PersistenceFlags,
) -> Result<(), ContractPersistError>
where
    E: EthereumApi + Sync,
    G: GatewayApi + Sync,
{
    let contract = contract::resolve(ethereum, transaction, block).await?;

    if persistence.contracts {
        gateway.insert_contract_if_absent(&contract).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mockall::predicate::eq;
    use quarry_common::hex;
    use quarry_common::{ContractAddress, TransactionHash};
    use quarry_ethereum::MockEthereumApi;
    use quarry_storage::MockGatewayApi;
    use serde_json::{json, Map, Value};

    fn number(value: u64) -> BlockNumber {
        BlockNumber::new_or_panic(value)
    }

    fn config(batch_size: usize) -> IngestConfig {
        IngestConfig {
            batch_size: NonZeroUsize::new(batch_size).unwrap(),
            from_genesis: false,
            persistence: PersistenceFlags::default(),
        }
    }

    fn raw_block(height: u64, uncles: Value, transactions: Value) -> Map<String, Value> {
        json!({
            "number": hex::encode_quantity(height),
            "hash": format!("0xb{height:04x}"),
            "parentHash": format!("0xb{:04x}", height.saturating_sub(1)),
            "timestamp": "0x61d29575",
            "uncles": uncles,
            "transactions": transactions,
            "gasUsed": "0x0",
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn raw_uncle(hash: &str) -> Map<String, Value> {
        json!({
            "number": "0x1",
            "hash": hash,
            "parentHash": "0xb0000",
            "timestamp": "0x61d29570",
            "uncles": [],
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[tokio::test]
    async fn resume_ingests_exactly_the_gap() {
        let mut ethereum = MockEthereumApi::new();
        let mut gateway = MockGatewayApi::new();

        gateway
            .expect_highest_block_number()
            .times(1)
            .returning(|| Ok(Some(number(5))));
        ethereum
            .expect_block_number()
            .times(1)
            .returning(|| Ok(number(8)));

        for height in 6..=8u64 {
            ethereum
                .expect_block_by_number()
                .with(eq(number(height)))
                .times(1)
                .returning(move |_| Ok(raw_block(height, json!([]), json!([]))));
        }
        gateway
            .expect_upsert_blocks()
            .times(3)
            .returning(|blocks| Ok(blocks.len()));

        let report = run(&ethereum, &gateway, &config(10)).await.unwrap();

        assert_eq!(report.synced, 3);
        assert_eq!(report.stats.blocks, 3);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn caught_up_store_drains_immediately() {
        let mut ethereum = MockEthereumApi::new();
        let mut gateway = MockGatewayApi::new();

        gateway
            .expect_highest_block_number()
            .times(1)
            .returning(|| Ok(Some(number(8))));
        ethereum
            .expect_block_number()
            .times(1)
            .returning(|| Ok(number(8)));
        ethereum.expect_block_by_number().never();

        let report = run(&ethereum, &gateway, &config(10)).await.unwrap();

        assert_eq!(report.synced, 0);
    }

    #[tokio::test]
    async fn store_ahead_of_chain_is_fatal_before_any_fetch() {
        let mut ethereum = MockEthereumApi::new();
        let mut gateway = MockGatewayApi::new();

        gateway
            .expect_highest_block_number()
            .times(1)
            .returning(|| Ok(Some(number(100))));
        ethereum
            .expect_block_number()
            .times(1)
            .returning(|| Ok(number(50)));
        ethereum.expect_block_by_number().never();

        let error = run(&ethereum, &gateway, &config(10)).await.unwrap_err();

        assert_matches!(
            error,
            IngestError::InconsistentState { stored, tip }
                if stored == number(100) && tip == number(50)
        );
    }

    #[tokio::test]
    async fn from_genesis_ignores_the_stored_height() {
        let mut ethereum = MockEthereumApi::new();
        let mut gateway = MockGatewayApi::new();

        gateway.expect_highest_block_number().never();
        ethereum
            .expect_block_number()
            .times(1)
            .returning(|| Ok(number(2)));

        for height in 1..=2u64 {
            ethereum
                .expect_block_by_number()
                .with(eq(number(height)))
                .times(1)
                .returning(move |_| Ok(raw_block(height, json!([]), json!([]))));
        }
        gateway
            .expect_upsert_blocks()
            .times(2)
            .returning(|blocks| Ok(blocks.len()));

        let mut config = config(10);
        config.from_genesis = true;

        let report = run(&ethereum, &gateway, &config).await.unwrap();

        assert_eq!(report.synced, 2);
    }

    #[tokio::test]
    async fn failing_height_does_not_stop_its_siblings() {
        let mut ethereum = MockEthereumApi::new();
        let mut gateway = MockGatewayApi::new();

        gateway
            .expect_highest_block_number()
            .times(1)
            .returning(|| Ok(None));
        ethereum
            .expect_block_number()
            .times(1)
            .returning(|| Ok(number(10)));

        ethereum
            .expect_block_by_number()
            .withf(|height| height.get() == 4)
            .times(1)
            .returning(|_| {
                Err(EthereumError::Rpc {
                    code: -32005,
                    message: "limit exceeded".to_owned(),
                })
            });
        ethereum
            .expect_block_by_number()
            .withf(|height| height.get() != 4)
            .times(9)
            .returning(|height| Ok(raw_block(height.get(), json!([]), json!([]))));

        gateway
            .expect_upsert_blocks()
            .times(9)
            .returning(|blocks| Ok(blocks.len()));

        let report = run(&ethereum, &gateway, &config(10)).await.unwrap();

        assert_eq!(report.synced, 9);
        assert_eq!(report.failed, vec![number(4)]);
    }

    #[tokio::test]
    async fn uncles_are_fetched_and_flagged() {
        let mut ethereum = MockEthereumApi::new();
        let mut gateway = MockGatewayApi::new();

        gateway
            .expect_highest_block_number()
            .times(1)
            .returning(|| Ok(Some(number(0))));
        ethereum
            .expect_block_number()
            .times(1)
            .returning(|| Ok(number(1)));
        ethereum
            .expect_block_by_number()
            .times(1)
            .returning(|_| Ok(raw_block(1, json!(["0xu0", "0xu1"]), json!([]))));

        for index in 0..2usize {
            ethereum
                .expect_uncle_by_block_hash_and_index()
                .with(eq(quarry_common::BlockHash::from("0xb0001")), eq(index))
                .times(1)
                .returning(move |_, index| Ok(raw_uncle(&format!("0xu{index}"))));
        }

        gateway
            .expect_upsert_blocks()
            .withf(|blocks| {
                blocks.len() == 3
                    && !blocks[0].is_uncle
                    && blocks[1..].iter().all(|block| block.is_uncle)
            })
            .times(1)
            .returning(|blocks| Ok(blocks.len()));

        let report = run(&ethereum, &gateway, &config(10)).await.unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(report.stats.blocks, 3);
    }

    fn transactions_with_one_creation() -> Value {
        json!([
            {
                "hash": "0xccc0",
                "blockHash": "0xb0001",
                "from": "0xf000",
                "to": "0xf001",
                "input": "0x",
            },
            {
                "hash": "0xccc1",
                "blockHash": "0xb0001",
                "from": "0xf000",
                "to": null,
                "input": "0x6001",
            },
        ])
    }

    #[tokio::test]
    async fn creation_transaction_yields_exactly_one_contract() {
        let mut ethereum = MockEthereumApi::new();
        let mut gateway = MockGatewayApi::new();

        gateway
            .expect_highest_block_number()
            .times(1)
            .returning(|| Ok(Some(number(0))));
        ethereum
            .expect_block_number()
            .times(1)
            .returning(|| Ok(number(1)));
        ethereum
            .expect_block_by_number()
            .times(1)
            .returning(|_| Ok(raw_block(1, json!([]), transactions_with_one_creation())));

        // Only the creation transaction gets a receipt lookup.
        ethereum
            .expect_transaction_receipt()
            .with(eq(TransactionHash::from("0xccc1")))
            .times(1)
            .returning(|_| {
                Ok(json!({
                    "contractAddress": "0xc0ffee",
                    "from": "0xf000",
                })
                .as_object()
                .cloned()
                .unwrap())
            });
        ethereum
            .expect_code()
            .with(eq(ContractAddress::from("0xc0ffee")))
            .times(1)
            .returning(|_| Ok("0x6001".to_owned()));

        gateway
            .expect_insert_contract_if_absent()
            .withf(|contract| contract.address.as_str() == "0xc0ffee")
            .times(1)
            .returning(|_| Ok(true));
        gateway
            .expect_upsert_transactions()
            .withf(|transactions| transactions.len() == 2)
            .times(1)
            .returning(|transactions| Ok(transactions.len()));
        gateway
            .expect_upsert_blocks()
            .times(1)
            .returning(|blocks| Ok(blocks.len()));

        let report = run(&ethereum, &gateway, &config(10)).await.unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(report.stats.contracts, 1);
        assert_eq!(report.stats.transactions, 2);
    }

    #[tokio::test]
    async fn failed_resolution_loses_the_contract_but_keeps_the_height() {
        let mut ethereum = MockEthereumApi::new();
        let mut gateway = MockGatewayApi::new();

        gateway
            .expect_highest_block_number()
            .times(1)
            .returning(|| Ok(Some(number(0))));
        ethereum
            .expect_block_number()
            .times(1)
            .returning(|| Ok(number(1)));
        ethereum
            .expect_block_by_number()
            .times(1)
            .returning(|_| Ok(raw_block(1, json!([]), transactions_with_one_creation())));

        // Reverted creation: the receipt has a null contractAddress.
        ethereum
            .expect_transaction_receipt()
            .times(1)
            .returning(|_| {
                Ok(json!({ "contractAddress": null, "from": "0xf000" })
                    .as_object()
                    .cloned()
                    .unwrap())
            });
        ethereum.expect_code().never();
        gateway.expect_insert_contract_if_absent().never();

        gateway
            .expect_upsert_transactions()
            .times(1)
            .returning(|transactions| Ok(transactions.len()));
        gateway
            .expect_upsert_blocks()
            .times(1)
            .returning(|blocks| Ok(blocks.len()));

        let report = run(&ethereum, &gateway, &config(10)).await.unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(report.stats.contracts, 0);
        assert_eq!(report.stats.failed_contracts, 1);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let mut ethereum = MockEthereumApi::new();
        let mut gateway = MockGatewayApi::new();

        gateway
            .expect_highest_block_number()
            .times(1)
            .returning(|| Ok(None));
        ethereum
            .expect_block_number()
            .times(1)
            .returning(|| Ok(number(1)));
        ethereum
            .expect_block_by_number()
            .times(1)
            .returning(|_| Ok(raw_block(1, json!([]), transactions_with_one_creation())));

        // Resolution still runs on a dry run.
        ethereum
            .expect_transaction_receipt()
            .times(1)
            .returning(|_| {
                Ok(json!({ "contractAddress": "0xc0ffee", "from": "0xf000" })
                    .as_object()
                    .cloned()
                    .unwrap())
            });
        ethereum
            .expect_code()
            .times(1)
            .returning(|_| Ok("0x6001".to_owned()));

        gateway.expect_upsert_blocks().never();
        gateway.expect_upsert_transactions().never();
        gateway.expect_insert_contract_if_absent().never();

        let mut config = config(10);
        config.persistence = PersistenceFlags {
            blocks: false,
            transactions: false,
            contracts: false,
        };

        let report = run(&ethereum, &gateway, &config).await.unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(report.stats.contracts, 1);
    }

    #[tokio::test]
    async fn persistence_failure_marks_the_height_unsynced() {
        let mut ethereum = MockEthereumApi::new();
        let mut gateway = MockGatewayApi::new();

        gateway
            .expect_highest_block_number()
            .times(1)
            .returning(|| Ok(None));
        ethereum
            .expect_block_number()
            .times(1)
            .returning(|| Ok(number(1)));
        ethereum
            .expect_block_by_number()
            .times(1)
            .returning(|_| Ok(raw_block(1, json!([]), json!([]))));

        gateway.expect_upsert_blocks().times(1).returning(|_| {
            Err(StorageError::Database(
                mongodb::error::Error::custom("connection reset"),
            ))
        });

        let report = run(&ethereum, &gateway, &config(10)).await.unwrap();

        assert_eq!(report.synced, 0);
        assert_eq!(report.failed, vec![number(1)]);
    }
}
