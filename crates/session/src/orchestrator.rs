use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

use clob::{CredentialAcquirer, TradingClient};
use common::{
    Address, ContractConfig, CredentialService, Error, LedgerClient, OwnerWallet, RelayerClient,
    Result, SessionStep, TradingSession,
};
use custody::{derive_safe_address, ApprovalReconciler, SafeDeployer};
use store::SessionStore;

use crate::guard::InFlightGuard;

/// External collaborators the orchestrator drives.
pub struct ActivationDeps {
    pub wallet: Arc<dyn OwnerWallet>,
    pub store: Arc<dyn SessionStore>,
    pub relayer: Arc<dyn RelayerClient>,
    pub ledger: Arc<dyn LedgerClient>,
    pub credentials: Arc<dyn CredentialService>,
    pub contracts: ContractConfig,
    pub clob_url: Url,
}

#[derive(Debug, Clone)]
pub enum InitializeOutcome {
    /// The pipeline ran and a complete session was persisted.
    Activated(TradingSession),
    /// A complete stored session was reused without touching the network.
    Restored(TradingSession),
    /// Another run holds the single-flight flag; this call did nothing.
    AlreadyRunning,
}

#[derive(Default)]
struct Progress {
    step: SessionStep,
    session: Option<TradingSession>,
    last_error: Option<Arc<Error>>,
}

/// Drives an owner from "wallet connected" to "ready to trade": custodial
/// account deployed, API credentials held, exchange approvals granted.
///
/// At most one activation runs at a time. Progress is observable through
/// `current_step` and `subscribe`; a failed run returns to `Idle` with the
/// error retained in `last_error` and nothing persisted.
pub struct SessionOrchestrator {
    wallet: Arc<dyn OwnerWallet>,
    store: Arc<dyn SessionStore>,
    deployer: SafeDeployer,
    acquirer: CredentialAcquirer,
    approvals: ApprovalReconciler,
    contracts: ContractConfig,
    clob_url: Url,
    in_flight: AtomicBool,
    progress: RwLock<Progress>,
    step_tx: watch::Sender<SessionStep>,
    trading: RwLock<Option<Arc<TradingClient>>>,
}

impl SessionOrchestrator {
    pub fn new(deps: ActivationDeps) -> Self {
        let (step_tx, _) = watch::channel(SessionStep::Idle);
        Self {
            deployer: SafeDeployer::new(
                deps.relayer.clone(),
                deps.ledger.clone(),
                deps.contracts,
            ),
            approvals: ApprovalReconciler::new(deps.relayer, deps.ledger, deps.contracts),
            acquirer: CredentialAcquirer::new(deps.credentials),
            wallet: deps.wallet,
            store: deps.store,
            contracts: deps.contracts,
            clob_url: deps.clob_url,
            in_flight: AtomicBool::new(false),
            progress: RwLock::new(Progress::default()),
            step_tx,
            trading: RwLock::new(None),
        }
    }

    /// Ensure the connected owner has a complete trading session.
    ///
    /// Returns `AlreadyRunning` immediately if another call is in flight.
    pub async fn initialize(&self) -> Result<InitializeOutcome, Arc<Error>> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            info!("Activation already in progress, ignoring request");
            return Ok(InitializeOutcome::AlreadyRunning);
        };

        let span = info_span!("activation", run_id = %Uuid::new_v4());
        match self.run().instrument(span.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let e = Arc::new(e);
                span.in_scope(|| warn!(error = %e, "Activation failed"));
                self.fail(e.clone()).await;
                Err(e)
            }
        }
    }

    async fn run(&self) -> Result<InitializeOutcome> {
        self.begin().await?;
        let owner = self.wallet.address().ok_or(Error::WalletNotConnected)?;
        info!(owner = %owner, "Activation started");

        let existing = self.load_existing(&owner).await;
        if let Some(session) = existing.as_ref().filter(|s| s.is_complete()) {
            let session = session.clone();
            self.complete(&session, false).await?;
            info!(owner = %owner, safe = %session.custodial_address, "Restored stored session");
            return Ok(InitializeOutcome::Restored(session));
        }

        let safe = derive_safe_address(&owner, &self.contracts);
        let known = match existing {
            Some(s) if s.custodial_address == safe => Some(s),
            Some(s) => {
                warn!(
                    stored = %s.custodial_address,
                    derived = %safe,
                    "Stored custodial address does not match derivation, ignoring record"
                );
                None
            }
            None => None,
        };

        if known.as_ref().is_some_and(|s| s.is_custodial_deployed) {
            debug!(safe = %safe, "Deployment already recorded");
        } else if self.deployer.is_deployed(&safe).await? {
            info!(safe = %safe, "Custodial account already deployed");
        } else {
            self.advance(SessionStep::Deploying).await?;
            self.deployer.deploy(&owner).await?;
        }

        self.advance(SessionStep::Credentials).await?;
        let credentials = match known.as_ref().and_then(TradingSession::usable_credentials) {
            Some(c) => {
                debug!("Reusing stored API credentials");
                c.clone()
            }
            None => {
                if known.as_ref().is_some_and(|s| s.has_api_credentials) {
                    warn!(owner = %owner, "Stored credentials incomplete, re-acquiring");
                }
                self.acquirer.acquire(&owner).await?
            }
        };

        self.advance(SessionStep::Approvals).await?;
        if known.as_ref().is_some_and(|s| s.has_approvals) {
            debug!(safe = %safe, "Approvals already recorded");
        } else {
            let status = self.approvals.check(&safe).await;
            if !status.all_approved {
                self.approvals.reconcile(&owner, &safe).await?;
            }
        }

        let session = TradingSession {
            owner_address: owner,
            custodial_address: safe,
            is_custodial_deployed: true,
            has_api_credentials: true,
            has_approvals: true,
            api_credentials: Some(credentials),
            last_checked: Utc::now(),
        };
        self.complete(&session, true).await?;
        info!(owner = %owner, safe = %safe, "Trading session active");
        Ok(InitializeOutcome::Activated(session))
    }

    /// Rebuild the trading client from a complete stored session without any
    /// network call. Re-entrant and independent of the single-flight flag;
    /// progress only moves when no run is under way.
    pub async fn restore(&self) -> Result<Option<TradingSession>> {
        let Some(owner) = self.wallet.address() else {
            return Ok(None);
        };
        let Some(session) = self
            .load_existing(&owner)
            .await
            .filter(TradingSession::is_complete)
        else {
            debug!(owner = %owner, "No complete stored session to restore");
            return Ok(None);
        };

        let client = self.trading_client_for(&session)?;
        {
            let mut progress = self.progress.write().await;
            if progress.step == SessionStep::Idle {
                progress.step = progress
                    .step
                    .transition(SessionStep::Checking)?
                    .transition(SessionStep::Complete)?;
                progress.session = Some(session.clone());
                progress.last_error = None;
                self.step_tx.send_replace(SessionStep::Complete);
            }
            *self.trading.write().await = Some(Arc::new(client));
        }
        info!(owner = %owner, safe = %session.custodial_address, "Restored stored session");
        Ok(Some(session))
    }

    /// Forget the session: delete the stored record and reset to `Idle`.
    /// A run still in flight fails at its next step boundary and persists
    /// nothing.
    pub async fn end(&self) -> Result<()> {
        // Held across the clear so a run cannot commit in between.
        let mut progress = self.progress.write().await;
        let owner = self
            .wallet
            .address()
            .or_else(|| progress.session.as_ref().map(|s| s.owner_address));
        let cleared = match owner {
            Some(owner) => self.store.clear(&owner).await,
            None => Ok(()),
        };

        *progress = Progress::default();
        *self.trading.write().await = None;
        self.step_tx.send_replace(SessionStep::Idle);
        info!("Trading session ended");
        cleared
    }

    pub async fn current_step(&self) -> SessionStep {
        self.progress.read().await.step
    }

    pub async fn session(&self) -> Option<TradingSession> {
        self.progress.read().await.session.clone()
    }

    pub async fn last_error(&self) -> Option<Arc<Error>> {
        self.progress.read().await.last_error.clone()
    }

    /// The credential-authenticated client, present once a session is complete.
    pub async fn trading_client(&self) -> Option<Arc<TradingClient>> {
        self.trading.read().await.clone()
    }

    /// Receive every step change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStep> {
        self.step_tx.subscribe()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn owner(&self) -> Option<Address> {
        self.wallet.address()
    }

    /// Custodial address of the connected owner, derived locally.
    pub fn custodial_address(&self) -> Option<Address> {
        self.wallet
            .address()
            .map(|owner| derive_safe_address(&owner, &self.contracts))
    }

    async fn load_existing(&self, owner: &Address) -> Option<TradingSession> {
        match self.store.load(owner).await {
            Ok(session) => session,
            Err(e) => {
                warn!(owner = %owner, error = %e, "Session store unreadable, treating as empty");
                None
            }
        }
    }

    async fn begin(&self) -> Result<()> {
        let mut progress = self.progress.write().await;
        progress.last_error = None;
        // A previous run may have left the pipeline at Complete.
        progress.step = progress
            .step
            .transition(SessionStep::Idle)?
            .transition(SessionStep::Checking)?;
        self.step_tx.send_replace(progress.step);
        Ok(())
    }

    async fn advance(&self, next: SessionStep) -> Result<()> {
        let mut progress = self.progress.write().await;
        progress.step = progress.step.transition(next)?;
        self.step_tx.send_replace(next);
        debug!(step = %next, "Step advanced");
        Ok(())
    }

    /// Move to `Complete`, saving `session` first when `persist` is set. The
    /// transition is checked and the save done under the progress lock, so an
    /// `end()` that already reset the pipeline leaves nothing behind.
    async fn complete(&self, session: &TradingSession, persist: bool) -> Result<()> {
        let client = self.trading_client_for(session)?;
        let mut progress = self.progress.write().await;
        let next = progress.step.transition(SessionStep::Complete)?;
        if persist {
            self.store.save(&session.owner_address, session).await?;
        }
        progress.step = next;
        progress.session = Some(session.clone());
        *self.trading.write().await = Some(Arc::new(client));
        self.step_tx.send_replace(next);
        Ok(())
    }

    async fn fail(&self, error: Arc<Error>) {
        let mut progress = self.progress.write().await;
        progress.step = SessionStep::Idle;
        progress.session = None;
        progress.last_error = Some(error);
        *self.trading.write().await = None;
        self.step_tx.send_replace(SessionStep::Idle);
    }

    fn trading_client_for(&self, session: &TradingSession) -> Result<TradingClient> {
        let credentials = session
            .usable_credentials()
            .cloned()
            .ok_or_else(|| Error::Integrity("session holds no usable credentials".into()))?;
        TradingClient::new(
            self.clob_url.clone(),
            session.owner_address,
            session.custodial_address,
            credentials,
        )
    }
}
