//! Messager: a message relay and nonce-management service for a
//! Filecoin-like blockchain.
//!
//! Subscribes to the upstream node's head-change feed, reconciles each new
//! tipset into message state, runs the per-address selector to fill the
//! pending window, and pushes signed messages back into the node's mempool.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use messager_chain::{HttpWalletClient, JsonRpcNodeClient, NodeClient, NodeEndpoint, WalletRouter};
use messager_core::{config, init_config, AddressRepo, MessageCache, MessagerConfig, Orchestrator, Reconciler, Selector, TipsetCache};
use messager_repo::InMemoryRepo;

mod env {
    pub const NODE_WS_URL: &str = "MESSAGER_NODE_WS_URL";
    pub const NODE_TOKEN: &str = "MESSAGER_NODE_TOKEN";
    pub const WALLET_URL: &str = "MESSAGER_WALLET_URL";
    pub const WALLET_TOKEN: &str = "MESSAGER_WALLET_TOKEN";
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,messager_core=debug,messager_chain=debug")))
        .init();

    let messager_config = MessagerConfig::from_env();
    messager_config.log_config();
    init_config(messager_config);

    info!("starting messager");

    let node = connect_node().await?;
    let wallet_router = Arc::new(build_wallet_router());
    let repo = Arc::new(InMemoryRepo::seeded((&config().shared_params).into()));
    let cache = Arc::new(MessageCache::new());
    let tipsets = Arc::new(TipsetCache::new(config().tipset_cache.max_tipset_count, config().tipset_cache.snapshot_path.clone()));
    tipsets.load_snapshot().ok();

    let reconciler = Arc::new(Reconciler::new(
        repo.clone(),
        node.clone(),
        cache.clone(),
        tipsets.clone(),
        config().reconciler.look_back_limit as i64,
    ));
    let selector = Arc::new(Selector::new(repo.clone(), node.clone(), wallet_router.clone(), config().selector.address_concurrency));
    let orchestrator =
        Arc::new(Orchestrator::new(repo.clone(), vec![node.clone()], selector.clone(), wallet_router.clone(), cache.clone()));

    run_head_change_loop(node, repo, reconciler, orchestrator).await
}

async fn connect_node() -> Result<Arc<dyn NodeClient>> {
    let url = std::env::var(env::NODE_WS_URL).map_err(|_| anyhow::anyhow!("missing env var: {}", env::NODE_WS_URL))?;
    let token = std::env::var(env::NODE_TOKEN).ok();
    let endpoint = NodeEndpoint { url, token, use_websocket: true };
    let client = JsonRpcNodeClient::connect(endpoint).await?;
    Ok(Arc::new(client) as Arc<dyn NodeClient>)
}

fn build_wallet_router() -> WalletRouter {
    let router = WalletRouter::new();
    if let Ok(url) = std::env::var(env::WALLET_URL) {
        let token = std::env::var(env::WALLET_TOKEN).ok();
        router.register_wallet("default", Arc::new(HttpWalletClient::new(url, token)));
        info!("registered default wallet endpoint");
    } else {
        warn!("no wallet endpoint configured; signing will fail until one is registered");
    }
    router
}

/// Drives the reconciler off the node's head-change subscription. Every
/// raw apply batch first goes through the reconciler's ancestor walk,
/// which either passes it through unchanged (the common case: the node's
/// own notification already described a contiguous head move) or
/// reconstructs the revert/apply pair spanning the gap since our last
/// known head. A gap too large to walk falls back to a full per-address
/// resync instead. Once reconciled, the orchestrator runs a selector
/// cycle for the new head and persists + pushes whatever it produced.
async fn run_head_change_loop(
    node: Arc<dyn NodeClient>,
    repo: Arc<InMemoryRepo>,
    reconciler: Arc<Reconciler>,
    orchestrator: Arc<Orchestrator>,
) -> Result<()> {
    let mut head_changes = node.chain_notify().await?;
    info!("subscribed to chain head changes");

    while let Some(change) = head_changes.recv().await {
        let reconciled = match reconciler.process_new_head(change.apply.clone()).await {
            Ok(Some(reconciled)) => reconciled,
            Ok(None) => {
                warn!("head gap exceeds look-back limit; running full resync instead of reorg walk");
                for addr in repo.list_managed().await.unwrap_or_default() {
                    if addr.is_deleted {
                        continue;
                    }
                    match orchestrator.update_all_filled_message(&addr.addr).await {
                        Ok(n) => info!(addr = %addr.addr, transitioned = n, "resynced filled messages"),
                        Err(e) => error!(addr = %addr.addr, error = %e, "resync failed"),
                    }
                }
                continue;
            }
            Err(e) => {
                error!(error = %e, "ancestor walk failed");
                continue;
            }
        };

        if let Err(e) = reconciler.process_head_change(&reconciled).await {
            error!(error = %e, "failed to reconcile head change");
            continue;
        }

        let Some(newest) = reconciled.apply.last() else { continue };
        match orchestrator.push_message_to_pool(newest).await {
            Ok(result) => {
                info!(selected = result.select.len(), expired = result.expire.len(), "selector cycle complete");
            }
            Err(e) => error!(error = %e, "push-to-pool cycle failed"),
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    ╔╦╗┌─┐┌─┐┌─┐┌─┐┌─┐┌─┐┬─┐
    ║║║├┤ └─┐└─┐├─┤│ ┬├┤ ├┬┘
    ╩ ╩└─┘└─┘└─┘┴ ┴└─┘└─┘┴└─
    nonce-managed message relay
    "#
    );
}
