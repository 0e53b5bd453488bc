mod wallet;

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clob::ClobAuthClient;
use common::{Config, OwnerWallet, SessionStep};
use custody::{JsonRpcLedger, RelayerHttpClient};
use session::{ActivationDeps, SessionOrchestrator};
use store::SqliteSessionStore;
use wallet::RemoteWallet;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().unwrap_or_else(|e| panic!("Invalid configuration: {e}"));
    info!(
        owner = %cfg.owner_address,
        chain_id = cfg.contracts.chain_id,
        "Activator starting"
    );

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));
    SqliteSessionStore::migrate(&db)
        .await
        .unwrap_or_else(|e| panic!("Database migration failed: {e}"));
    info!("Database ready");

    // ── Collaborators ─────────────────────────────────────────────────────────
    let wallet: Arc<dyn OwnerWallet> = Arc::new(
        RemoteWallet::new(cfg.owner_address, cfg.signer_url.clone())
            .unwrap_or_else(|e| panic!("Failed to build signer client: {e}")),
    );
    let relayer = RelayerHttpClient::new(
        cfg.relayer_url.clone(),
        wallet.clone(),
        cfg.contracts,
        cfg.confirmation_poll,
        cfg.confirmation_max_polls,
    )
    .unwrap_or_else(|e| panic!("Failed to build relayer client: {e}"));
    let ledger = JsonRpcLedger::new(cfg.rpc_url.clone())
        .unwrap_or_else(|e| panic!("Failed to build RPC client: {e}"));
    let credentials = ClobAuthClient::new(cfg.clob_url.clone(), wallet.clone(), cfg.contracts.chain_id)
        .unwrap_or_else(|e| panic!("Failed to build CLOB client: {e}"));

    // ── Orchestrator ──────────────────────────────────────────────────────────
    let orchestrator = Arc::new(SessionOrchestrator::new(ActivationDeps {
        wallet,
        store: Arc::new(SqliteSessionStore::new(db.clone())),
        relayer: Arc::new(relayer),
        ledger: Arc::new(ledger),
        credentials: Arc::new(credentials),
        contracts: cfg.contracts,
        clob_url: cfg.clob_url.clone(),
    }));

    match orchestrator.restore().await {
        Ok(Some(session)) => info!(safe = %session.custodial_address, "Trading session restored"),
        Ok(None) => info!("No complete stored session"),
        Err(e) => warn!(error = %e, "Stored session could not be restored"),
    }

    if cfg.activate_on_start && orchestrator.current_step().await != SessionStep::Complete {
        let orch = orchestrator.clone();
        tokio::spawn(async move {
            if let Err(e) = orch.initialize().await {
                error!(error = %e, "Activation on start failed");
            }
        });
    }

    // ── Control API ───────────────────────────────────────────────────────────
    let api_state = api::AppState {
        orchestrator: orchestrator.clone(),
        control_token: cfg.control_token.clone(),
    };
    let port = cfg.control_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "Control API stopped");
        }
    });

    // Keep main alive
    info!("All subsystems started. Waiting for shutdown signal.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received. Exiting.");
}
