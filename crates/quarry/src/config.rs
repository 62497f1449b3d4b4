use std::num::NonZeroUsize;

use clap::{ArgAction, Parser};
use url::Url;

use crate::ingest::{IngestConfig, PersistenceFlags};

#[derive(Debug, Parser)]
#[command(name = "quarry")]
#[command(version)]
#[command(
    about = "Ingests blocks, transactions and deployed contracts from an Ethereum JSON-RPC \
             endpoint into a document store, resuming from the highest stored block."
)]
pub struct Config {
    #[arg(
        long = "ethereum.url",
        long_help = r"This should point to the HTTP RPC endpoint of your Ethereum entry-point, typically a local client or a hosted gateway service such as Infura or Alchemy.

Examples:
    infura: https://mainnet.infura.io/v3/<PROJECT_ID>
    geth:   https://localhost:8545",
        value_name = "HTTP(s) URL",
        value_hint = clap::ValueHint::Url,
        env = "QUARRY_ETHEREUM_API_URL"
    )]
    pub ethereum_url: Url,

    #[arg(
        long = "storage.connection-string",
        long_help = "Connection string of the document store, e.g. mongodb://localhost:27017",
        value_name = "URI",
        env = "QUARRY_STORAGE_CONNECTION_STRING"
    )]
    pub storage_connection_string: String,

    #[arg(
        long = "storage.database",
        long_help = "Name of the database holding the blocks, transactions and contracts \
                     collections",
        value_name = "NAME",
        default_value = "etd",
        env = "QUARRY_STORAGE_DATABASE"
    )]
    pub storage_database: String,

    #[arg(
        long = "ingest.batch-size",
        long_help = "Number of heights fetched concurrently per window. Also bounds the number \
                     of connections held open against the RPC endpoint, since the next window \
                     only starts once the current one has fully settled.",
        value_name = "BLOCKS",
        default_value = "10",
        env = "QUARRY_INGEST_BATCH_SIZE"
    )]
    pub batch_size: NonZeroUsize,

    #[arg(
        long = "ingest.blocks",
        long_help = "Persist block documents. Disable for a dry run that still walks the range.",
        default_value = "true",
        action = ArgAction::Set,
        value_name = "BOOL",
        env = "QUARRY_INGEST_BLOCKS"
    )]
    pub insert_blocks: bool,

    #[arg(
        long = "ingest.transactions",
        long_help = "Persist transaction documents.",
        default_value = "true",
        action = ArgAction::Set,
        value_name = "BOOL",
        env = "QUARRY_INGEST_TRANSACTIONS"
    )]
    pub insert_transactions: bool,

    #[arg(
        long = "ingest.contracts",
        long_help = "Persist contract documents. Creation transactions are still resolved when \
                     disabled.",
        default_value = "true",
        action = ArgAction::Set,
        value_name = "BOOL",
        env = "QUARRY_INGEST_CONTRACTS"
    )]
    pub insert_contracts: bool,

    #[arg(
        long = "ingest.from-genesis",
        long_help = "Ignore the stored height and ingest from height 0. Already stored \
                     documents are absorbed by the idempotent writes, so this re-covers any \
                     gaps earlier runs left behind.",
        default_value = "false",
        action = ArgAction::Set,
        value_name = "BOOL",
        env = "QUARRY_INGEST_FROM_GENESIS"
    )]
    pub from_genesis: bool,

    #[arg(
        long = "ingest.reset",
        long_help = "Delete every stored block before ingesting. Administrative switch; \
                     transactions and contracts are left in place.",
        default_value = "false",
        action = ArgAction::Set,
        value_name = "BOOL",
        env = "QUARRY_INGEST_RESET"
    )]
    pub reset: bool,

    #[arg(
        long = "color",
        long_help = "This flag controls when to use colors in the output logs.",
        default_value = "auto",
        env = "QUARRY_COLOR",
        value_name = "WHEN"
    )]
    pub color: Color,
}

/// Selects when ANSI colors appear in the log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Color {
    Auto,
    Never,
    Always,
}

impl Color {
    /// Returns true if color should be enabled for stdout.
    pub fn is_color_enabled(&self) -> bool {
        use std::io::IsTerminal;

        match self {
            Color::Auto => std::io::stdout().is_terminal(),
            Color::Never => false,
            Color::Always => true,
        }
    }
}

impl Config {
    /// The coordinator's slice of the configuration.
    pub fn ingest(&self) -> IngestConfig {
        IngestConfig {
            batch_size: self.batch_size,
            from_genesis: self.from_genesis,
            persistence: PersistenceFlags {
                blocks: self.insert_blocks,
                transactions: self.insert_transactions,
                contracts: self.insert_contracts,
            },
        }
    }
}
