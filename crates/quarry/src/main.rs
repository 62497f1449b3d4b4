#![deny(rust_2018_idioms)]

use anyhow::Context;
use clap::Parser;
use quarry::config::{Color, Config};
use quarry::ingest;
use quarry_ethereum::EthereumClient;
use quarry_storage::{GatewayApi, Storage};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }

    let config = Config::parse();

    setup_tracing(config.color);

    info!(version = env!("CARGO_PKG_VERSION"), "🏁 Starting ingestion run");

    let ethereum = EthereumClient::new(config.ethereum_url.clone())
        .context("Creating Ethereum client")?;

    let storage = Storage::connect(&config.storage_connection_string, &config.storage_database)
        .await
        .context("Connecting to the document store")?;
    storage
        .ensure_indexes()
        .await
        .context("Creating store indexes")?;

    if config.reset {
        let deleted = storage
            .delete_all_blocks()
            .await
            .context("Resetting the blocks collection")?;
        info!(deleted, "Deleted stored blocks before ingesting");
    }

    let report = ingest::run(&ethereum, &storage, &config.ingest())
        .await
        .context("Ingesting blocks")?;

    info!(
        synced = report.synced,
        blocks = report.stats.blocks,
        transactions = report.stats.transactions,
        contracts = report.stats.contracts,
        failed = report.failed.len(),
        "Run drained"
    );
    if !report.failed.is_empty() {
        // Not a failure exit: the next run re-derives its range from what
        // was persisted, and these heights can be re-covered by an
        // --ingest.from-genesis run.
        tracing::warn!(heights = ?report.failed, "Heights left unsynced");
    }

    Ok(())
}

fn setup_tracing(color: Color) {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_ansi(color.is_color_enabled())
        .compact()
        .init();
}
