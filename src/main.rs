//! Batch/daemon entry point (§6 CLI surface): `balance`, `sync`, `write`,
//! `serve`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use chain_orchestrator::provider::ProviderRegistry;
use chain_orchestrator::store::{PgStore, Store};
use chain_orchestrator::{ChainWatcher, Fsm, Scheduler, Settings, Writer};

#[derive(Parser)]
#[command(name = "chain-orchestrator", about = "Blockchain transaction orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch and persist the on-chain balance for every Account.
    Balance,
    /// Run one Chain Watcher reconciliation pass over every active Blockchain.
    Sync,
    /// Run one Writer admission pass.
    Write,
    /// Run the Scheduler continuously until SIGINT/SIGTERM.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    let database_url = settings
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;
    let store = PgStore::connect(&database_url).await?;
    store.migrate().await?;
    let store: Arc<dyn Store> = Arc::new(store);

    let mut providers = ProviderRegistry::with_test_providers(settings.fake_sleep);
    providers.register("tezos", Arc::new(chain_orchestrator::provider::TezosProvider::new()));
    providers.register("ethereum", Arc::new(chain_orchestrator::provider::EthereumProvider::new()));

    match cli.command {
        Command::Balance => run_balance(store, providers, &settings).await,
        Command::Sync => run_sync(store, providers, settings.max_depth).await,
        Command::Write => run_write(store, providers, settings.writer_abort_threshold).await,
        Command::Serve => run_serve(store, providers, settings.max_depth).await,
    }
}

async fn run_balance(store: Arc<dyn Store>, providers: ProviderRegistry, settings: &Settings) -> Result<()> {
    for account in store.all_accounts().await? {
        let Some(blockchain) = store.get_blockchain(account.blockchain_id).await? else {
            tracing::warn!(account = %account.id, "balance: blockchain not found, skipping");
            continue;
        };
        let Some(provider) = providers.resolve(&blockchain.provider_class) else {
            tracing::warn!(provider_class = %blockchain.provider_class, "balance: no provider registered, skipping");
            continue;
        };
        let Some(address) = account.address.clone() else {
            continue;
        };
        let Some(private_key) = account.private_key(&settings.secret) else {
            continue;
        };
        match provider.get_balance(&blockchain, &address, &private_key).await {
            Ok(balance) => {
                if account.balance != Some(balance) {
                    let mut updated = account;
                    updated.balance = Some(balance);
                    store.save_account(&updated).await?;
                }
            }
            Err(e) => tracing::warn!(account = %account.id, error = %e, "balance: provider call failed"),
        }
    }
    Ok(())
}

async fn run_sync(store: Arc<dyn Store>, providers: ProviderRegistry, max_depth: u64) -> Result<()> {
    let watcher = ChainWatcher::new(store, providers, max_depth);
    watcher.run_all().await?;
    Ok(())
}

async fn run_write(store: Arc<dyn Store>, providers: ProviderRegistry, abort_threshold: u32) -> Result<()> {
    let writer = Writer::new(store, providers, abort_threshold);
    writer.run_once().await?;
    Ok(())
}

async fn run_serve(store: Arc<dyn Store>, providers: ProviderRegistry, max_depth: u64) -> Result<()> {
    let fsm = Arc::new(Fsm::new(store.clone(), providers.clone()));
    let scheduler = Scheduler::new(fsm, store.clone());

    let watcher = Arc::new(ChainWatcher::new(store.clone(), providers, max_depth));
    let watcher_handle = chain_orchestrator::watcher::spawn_periodic(watcher, Duration::from_secs(15));

    let poll_handle = tokio::spawn({
        let store = store.clone();
        let scheduler = scheduler.clone();
        async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                match store.all_accounts().await {
                    Ok(accounts) => {
                        for account in accounts {
                            scheduler.enqueue(account.id).await;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "serve: failed to list accounts"),
                }
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("serve: received shutdown signal");
        }
    }

    watcher_handle.abort();
    poll_handle.abort();
    Ok(())
}
