//! Chainbook reconciler: keeps the off-chain ledger in step with one chain.
//!
//! Flow:
//! 1. Load settings for the network named on the command line
//! 2. Connect to PostgreSQL and apply migrations (or use memory with `--dry-run`)
//! 3. Start the apply worker, plus a live log subscription when `WS_URL` is set
//! 4. Poll the configured event source every `POLL_INTERVAL_SECS` until Ctrl-C

use std::sync::Arc;

use chainbook_core::{Settings, SourceMode, telemetry};
use chainbook_evm::{ContractSet, provider};
use chainbook_storage::{self as storage, CursorStore, LedgerStore, MemoryStore, PgStore};
use chainbook_sync::{
    ApplyWorker, Reconciler, ReconcilerContext, RpcAdapter, SubgraphAdapter, SubgraphClient,
    WindowSource, rpc,
};
use clap::Parser;
use eyre::Result;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "reconciler", about = "Reconcile chain events into the marketplace ledger")]
struct Cli {
    /// Network short name (`bsc`, `mainnet`, `polygon`, ...).
    #[arg(env = "NETWORK")]
    network: String,

    /// Reconcile into memory instead of PostgreSQL and print a summary on exit.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Initialisation ──────────────────────────────────────────────────
    telemetry::init();
    let cli = Cli::parse();
    let settings = Settings::from_env(&cli.network)?;

    tracing::info!(
        network = settings.network.name,
        chain_id = settings.network.chain_id,
        source = ?settings.source,
        dry_run = cli.dry_run,
        "Starting reconciler"
    );

    let memory = cli.dry_run.then(|| Arc::new(MemoryStore::new()));
    let (cursors, ledger): (Arc<dyn CursorStore>, Arc<dyn LedgerStore>) = match &memory {
        Some(memory) => (
            memory.clone() as Arc<dyn CursorStore>,
            memory.clone() as Arc<dyn LedgerStore>,
        ),
        None => {
            let pool = storage::connect(&settings.database_url).await?;
            tracing::info!("Connected to database");
            storage::migrate(&pool).await?;
            tracing::info!("Database migrations applied");
            let store = Arc::new(PgStore::new(pool));
            (store.clone() as Arc<dyn CursorStore>, store as Arc<dyn LedgerStore>)
        }
    };

    let ctx = Arc::new(ReconcilerContext::new(&settings, cursors, ledger));
    let cancel = CancellationToken::new();
    let (worker_tx, worker) = ApplyWorker::spawn(ctx.clone(), settings.channel_capacity, cancel.clone());

    // ── Event Source ────────────────────────────────────────────────────
    let source: Arc<dyn WindowSource> = match settings.source {
        SourceMode::Subgraph => {
            let url = settings
                .subgraph_url
                .as_deref()
                .ok_or_else(|| eyre::eyre!("SUBGRAPH_URL is not set"))?;
            Arc::new(SubgraphAdapter::new(
                SubgraphClient::new(url)?,
                settings.block_window,
                settings.item_limit,
            ))
        }
        SourceMode::Rpc => {
            let url = settings
                .rpc_url
                .as_deref()
                .ok_or_else(|| eyre::eyre!("RPC_URL is not set"))?;
            let contracts = ContractSet::from_settings(&settings)?;

            if let Some(ws_url) = settings.ws_url.as_deref() {
                match provider::create_ws_provider(ws_url).await {
                    Ok(ws) => {
                        tokio::spawn(rpc::run_live(
                            ws,
                            contracts.clone(),
                            worker_tx.clone(),
                            settings.retry.clone(),
                            cancel.clone(),
                        ));
                    }
                    // Backfill alone still converges; live events only cut latency.
                    Err(e) => tracing::warn!(error = %e, "WebSocket unavailable, live subscription disabled"),
                }
            }

            Arc::new(RpcAdapter::new(
                Arc::new(provider::create_http_provider(url)?),
                contracts,
                settings.block_window,
                settings.rpc_window,
                settings.retry.clone(),
            ))
        }
    };

    // ── Shutdown ────────────────────────────────────────────────────────
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutting down gracefully…");
                shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    // ── Main Loop ───────────────────────────────────────────────────────
    let reconciler = Reconciler::new(ctx, source, worker_tx, settings.poll_interval);
    reconciler.run(cancel.clone()).await;

    drop(reconciler);
    worker.await?;

    if let Some(memory) = memory {
        let summary = memory.summary();
        tracing::info!(
            transactions = summary.transactions,
            balances = summary.balances,
            tokens = summary.tokens,
            accounts = summary.accounts,
            rewards = summary.rewards,
            "Dry run summary"
        );
    }

    tracing::info!("Reconciler stopped.");
    Ok(())
}
