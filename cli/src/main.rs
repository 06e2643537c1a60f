//! contestindex CLI — run the contest event indexer daemon or inspect its
//! state.
//!
//! Usage:
//! ```bash
//! contestindex run      # start the indexer (env-configured)
//! contestindex status   # show the persisted checkpoint
//! contestindex info     # show defaults
//! ```
//!
//! `run` and `status` read `DATABASE_URL`; `run` additionally requires
//! `RPC_URL` and `FACTORY_ADDRESS` (see `IndexerConfig::from_env`).

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::Context;

use contestindex_core::checkpoint::{
    SyncCheckpoint, CATCHING_UP_KEY, LAST_INDEXED_BLOCK_KEY,
};
use contestindex_core::config::IndexerConfig;
use contestindex_core::registry::ContractRegistry;
use contestindex_evm::{EventMonitor, HttpChainClient, Indexer, MonitorConfig};
use contestindex_storage::PostgresStore;

fn main() {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    let result = match command {
        "run" => run(),
        "status" => status(),
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("contestindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("contestindex {}", env!("CARGO_PKG_VERSION"));
    println!("Contest event synchronization engine\n");
    println!("USAGE:");
    println!("    contestindex <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run      Start the indexer daemon");
    println!("    status   Show the persisted checkpoint");
    println!("    info     Show ContestIndex configuration defaults");
    println!("    version  Print version");
    println!("    help     Print this help");
}

fn cmd_info() {
    println!("ContestIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default backfill window: 1000 blocks");
    println!("  Default log-query range: 10 blocks/call");
    println!("  Live block-lookup retries: 2 (creations), 3 (proposals/votes)");
    println!("  Storage backends: memory, PostgreSQL (feature: postgres)");
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn run_async() -> anyhow::Result<()> {
    // Configuration problems must stop the process before anything
    // connects.
    let config = IndexerConfig::from_env().context("invalid configuration")?;
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required")?;

    let store = Arc::new(
        PostgresStore::connect(&database_url)
            .await
            .context("connect postgres")?,
    );
    let client = Arc::new(
        HttpChainClient::default_for(config.rpc_url.clone()).context("build rpc client")?,
    );

    let checkpoint = SyncCheckpoint::new(store.clone());
    let monitor = Arc::new(EventMonitor::new(
        client,
        ContractRegistry::new(),
        &config.factory_address,
        MonitorConfig::from(&config),
    ));

    tracing::info!(
        chain = %config.chain,
        factory = %config.factory(),
        "starting contest indexer"
    );

    let indexer = Indexer::new(config, monitor, store, checkpoint);
    indexer.run().await.context("start indexer")?;

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    tracing::info!("shutdown signal received");
    indexer.shutdown();
    Ok(())
}

fn run() -> anyhow::Result<()> {
    init_tracing();
    run_async()
}

#[tokio::main]
async fn status_async() -> anyhow::Result<()> {
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required")?;
    let store = Arc::new(
        PostgresStore::connect(&database_url)
            .await
            .context("connect postgres")?,
    );
    let checkpoint = SyncCheckpoint::new(store);

    match checkpoint.last_indexed_block().await? {
        Some(block) => println!("{LAST_INDEXED_BLOCK_KEY} = {block}"),
        None => println!("{LAST_INDEXED_BLOCK_KEY} = <unset>"),
    }
    println!(
        "{CATCHING_UP_KEY} = {}",
        checkpoint.catching_up().await?
    );
    Ok(())
}

fn status() -> anyhow::Result<()> {
    status_async()
}
