use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use url::Url;

use common::{
    Address, ApiCredentials, CredentialService, Error, LedgerClient, OwnerWallet, RelayerClient,
    RelayerTx, Result, SessionStep, SignRequest, TradingSession, TxConfirmation, TxRequest,
    POLYGON_MAINNET,
};
use custody::derive_safe_address;
use session::{ActivationDeps, InitializeOutcome, SessionOrchestrator};
use store::{storage_key, MemorySessionStore, SessionStore};

const OWNER: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

fn owner() -> Address {
    OWNER.parse().unwrap()
}

fn creds(key: &str) -> ApiCredentials {
    ApiCredentials {
        key: key.into(),
        secret: "s".into(),
        passphrase: "p".into(),
    }
}

struct FakeWallet(Option<Address>);

#[async_trait]
impl OwnerWallet for FakeWallet {
    fn address(&self) -> Option<Address> {
        self.0
    }

    async fn sign(&self, _request: &SignRequest) -> Result<String> {
        Ok("0xsigned".into())
    }
}

/// Relayer, ledger and credential service in one, counting every call.
#[derive(Default)]
struct FakeNetwork {
    deployed: bool,
    probes_fail: bool,
    approved: AtomicBool,
    derived: Option<ApiCredentials>,
    create_fails: AtomicBool,
    confirm_delay: Duration,

    is_deployed_calls: AtomicUsize,
    deploy_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    wait_calls: AtomicUsize,
    code_reads: AtomicUsize,
    ledger_reads: AtomicUsize,
    derive_calls: AtomicUsize,
    create_calls: AtomicUsize,
}

impl FakeNetwork {
    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn total(&self) -> usize {
        [
            &self.is_deployed_calls,
            &self.deploy_calls,
            &self.execute_calls,
            &self.wait_calls,
            &self.code_reads,
            &self.ledger_reads,
            &self.derive_calls,
            &self.create_calls,
        ]
        .into_iter()
        .map(Self::count)
        .sum()
    }
}

#[async_trait]
impl RelayerClient for FakeNetwork {
    async fn is_deployed(&self, _safe: &Address) -> Result<bool> {
        self.is_deployed_calls.fetch_add(1, Ordering::SeqCst);
        if self.probes_fail {
            return Err(Error::Relayer("relayer unreachable".into()));
        }
        Ok(self.deployed)
    }

    async fn deploy(&self, _owner: &Address) -> Result<RelayerTx> {
        self.deploy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RelayerTx {
            transaction_id: "deploy-1".into(),
            transaction_hash: None,
        })
    }

    async fn execute(&self, _owner: &Address, _safe: &Address, _txs: &[TxRequest]) -> Result<RelayerTx> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.approved.store(true, Ordering::SeqCst);
        Ok(RelayerTx {
            transaction_id: "approve-1".into(),
            transaction_hash: None,
        })
    }

    async fn wait_confirmed(&self, tx: &RelayerTx) -> Result<TxConfirmation> {
        self.wait_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.confirm_delay).await;
        Ok(TxConfirmation {
            transaction_id: tx.transaction_id.clone(),
            transaction_hash: Some("0xfeed".into()),
            proxy_address: None,
            state: "STATE_CONFIRMED".into(),
        })
    }
}

#[async_trait]
impl LedgerClient for FakeNetwork {
    async fn get_code(&self, _address: &Address) -> Result<Vec<u8>> {
        self.code_reads.fetch_add(1, Ordering::SeqCst);
        if self.probes_fail {
            return Err(Error::Rpc("node unreachable".into()));
        }
        Ok(if self.deployed { vec![0x60, 0x80] } else { Vec::new() })
    }

    async fn call(&self, _to: &Address, _data: &[u8]) -> Result<Vec<u8>> {
        self.ledger_reads.fetch_add(1, Ordering::SeqCst);
        let byte = if self.approved.load(Ordering::SeqCst) { 0xff } else { 0x00 };
        Ok(vec![byte; 32])
    }
}

#[async_trait]
impl CredentialService for FakeNetwork {
    async fn derive_api_key(&self, _owner: &Address) -> Result<Option<ApiCredentials>> {
        self.derive_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.derived.clone())
    }

    async fn create_api_key(&self, _owner: &Address) -> Result<ApiCredentials> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.create_fails.load(Ordering::SeqCst) {
            return Err(Error::Http("HTTP 500: internal error".into()));
        }
        Ok(creds("k"))
    }
}

fn orchestrator(
    wallet: Option<Address>,
    network: &Arc<FakeNetwork>,
    store: &Arc<MemorySessionStore>,
) -> SessionOrchestrator {
    SessionOrchestrator::new(ActivationDeps {
        wallet: Arc::new(FakeWallet(wallet)),
        store: store.clone(),
        relayer: network.clone(),
        ledger: network.clone(),
        credentials: network.clone(),
        contracts: POLYGON_MAINNET,
        clob_url: Url::parse("https://clob.example.org").unwrap(),
    })
}

fn complete_session() -> TradingSession {
    TradingSession {
        owner_address: owner(),
        custodial_address: derive_safe_address(&owner(), &POLYGON_MAINNET),
        is_custodial_deployed: true,
        has_api_credentials: true,
        has_approvals: true,
        api_credentials: Some(creds("stored")),
        last_checked: Utc::now(),
    }
}

#[tokio::test]
async fn fresh_owner_is_fully_activated() {
    let network = Arc::new(FakeNetwork::default());
    let store = Arc::new(MemorySessionStore::new());
    let orch = orchestrator(Some(owner()), &network, &store);
    let steps = orch.subscribe();

    let session = match orch.initialize().await.unwrap() {
        InitializeOutcome::Activated(session) => session,
        other => panic!("expected a fresh activation, got {other:?}"),
    };

    assert_eq!(session.custodial_address, derive_safe_address(&owner(), &POLYGON_MAINNET));
    assert!(session.is_complete());
    assert_eq!(session.api_credentials, Some(creds("k")));

    assert_eq!(orch.current_step().await, SessionStep::Complete);
    assert_eq!(*steps.borrow(), SessionStep::Complete);
    assert!(orch.last_error().await.is_none());
    assert!(!orch.is_in_flight());

    let client = orch.trading_client().await.expect("trading client after activation");
    assert_eq!(client.safe(), &session.custodial_address);

    assert_eq!(FakeNetwork::count(&network.deploy_calls), 1);
    assert_eq!(FakeNetwork::count(&network.create_calls), 1);
    assert_eq!(FakeNetwork::count(&network.execute_calls), 1);
    // One confirmation for the deployment, one for the approval batch.
    assert_eq!(FakeNetwork::count(&network.wait_calls), 2);

    let stored = store.load(&owner()).await.unwrap().unwrap();
    assert_eq!(stored.custodial_address, session.custodial_address);
    assert!(stored.is_complete());
}

#[tokio::test]
async fn complete_stored_session_restores_without_network() {
    let store = Arc::new(MemorySessionStore::new());
    store.save(&owner(), &complete_session()).await.unwrap();

    let network = Arc::new(FakeNetwork::default());
    let orch = orchestrator(Some(owner()), &network, &store);

    let outcome = orch.initialize().await.unwrap();
    assert!(matches!(outcome, InitializeOutcome::Restored(_)));
    assert_eq!(orch.current_step().await, SessionStep::Complete);
    assert_eq!(orch.trading_client().await.unwrap().api_key(), "stored");
    assert_eq!(network.total(), 0);
}

#[tokio::test]
async fn activation_survives_a_restart() {
    let store = Arc::new(MemorySessionStore::new());
    let first = Arc::new(FakeNetwork::default());
    orchestrator(Some(owner()), &first, &store)
        .initialize()
        .await
        .unwrap();

    let second = Arc::new(FakeNetwork::default());
    let orch = orchestrator(Some(owner()), &second, &store);
    let outcome = orch.initialize().await.unwrap();

    assert!(matches!(outcome, InitializeOutcome::Restored(_)));
    assert_eq!(second.total(), 0);
}

#[tokio::test]
async fn concurrent_initialize_runs_once() {
    let network = Arc::new(FakeNetwork {
        confirm_delay: Duration::from_millis(20),
        ..Default::default()
    });
    let store = Arc::new(MemorySessionStore::new());
    let orch = orchestrator(Some(owner()), &network, &store);

    let (a, b) = tokio::join!(orch.initialize(), orch.initialize());
    let outcomes = [a.unwrap(), b.unwrap()];

    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, InitializeOutcome::AlreadyRunning))
        .count();
    assert_eq!(skipped, 1);
    assert_eq!(FakeNetwork::count(&network.deploy_calls), 1);
    assert_eq!(FakeNetwork::count(&network.create_calls), 1);
    assert_eq!(FakeNetwork::count(&network.execute_calls), 1);
    assert_eq!(orch.current_step().await, SessionStep::Complete);
}

#[tokio::test]
async fn failed_run_resets_to_idle_and_persists_nothing() {
    let network = Arc::new(FakeNetwork {
        create_fails: AtomicBool::new(true),
        ..Default::default()
    });
    let store = Arc::new(MemorySessionStore::new());
    let orch = orchestrator(Some(owner()), &network, &store);

    let err = orch.initialize().await.unwrap_err();
    assert!(matches!(*err, Error::Http(_)));
    assert_eq!(orch.current_step().await, SessionStep::Idle);
    assert!(matches!(orch.last_error().await.as_deref(), Some(Error::Http(_))));
    assert!(orch.session().await.is_none());
    assert!(orch.trading_client().await.is_none());
    assert!(store.is_empty().await);

    // The flag is released, so the run can be retried.
    assert!(!orch.is_in_flight());
    assert!(orch.initialize().await.is_err());
    assert_eq!(FakeNetwork::count(&network.create_calls), 2);
}

#[tokio::test]
async fn failed_rerun_drops_the_previous_session() {
    let network = Arc::new(FakeNetwork::default());
    let store = Arc::new(MemorySessionStore::new());
    let orch = orchestrator(Some(owner()), &network, &store);
    orch.initialize().await.unwrap();
    assert!(orch.trading_client().await.is_some());

    store.clear(&owner()).await.unwrap();
    network.create_fails.store(true, Ordering::SeqCst);

    assert!(orch.initialize().await.is_err());
    assert_eq!(orch.current_step().await, SessionStep::Idle);
    assert!(orch.session().await.is_none());
    assert!(orch.trading_client().await.is_none());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn end_during_approvals_wins_over_the_run() {
    let network = Arc::new(FakeNetwork {
        deployed: true,
        derived: Some(creds("derived")),
        confirm_delay: Duration::from_millis(200),
        ..Default::default()
    });
    let store = Arc::new(MemorySessionStore::new());
    let orch = Arc::new(orchestrator(Some(owner()), &network, &store));
    let mut steps = orch.subscribe();

    let run = tokio::spawn({
        let orch = orch.clone();
        async move { orch.initialize().await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while *steps.borrow_and_update() != SessionStep::Approvals {
            steps.changed().await.unwrap();
        }
    })
    .await
    .expect("run reaches approvals");

    orch.end().await.unwrap();
    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(*err, Error::InvalidTransition { .. }));

    assert!(store.is_empty().await);
    assert_eq!(orch.current_step().await, SessionStep::Idle);
    assert!(orch.session().await.is_none());
    assert!(orch.trading_client().await.is_none());
    assert!(!orch.is_in_flight());
}

#[tokio::test]
async fn record_for_another_custodial_address_is_ignored() {
    let store = Arc::new(MemorySessionStore::new());
    let stale = TradingSession {
        custodial_address: "0x2222222222222222222222222222222222222222".parse().unwrap(),
        has_api_credentials: false,
        api_credentials: None,
        ..complete_session()
    };
    store.save(&owner(), &stale).await.unwrap();

    let network = Arc::new(FakeNetwork {
        deployed: true,
        approved: AtomicBool::new(true),
        derived: Some(creds("derived")),
        ..Default::default()
    });
    let orch = orchestrator(Some(owner()), &network, &store);

    let outcome = orch.initialize().await.unwrap();
    assert!(matches!(outcome, InitializeOutcome::Activated(_)));

    // Nothing from the stale record is trusted: deployment and approvals are
    // both checked against the ledger again.
    assert_eq!(FakeNetwork::count(&network.is_deployed_calls), 1);
    assert_eq!(FakeNetwork::count(&network.deploy_calls), 0);
    assert_eq!(FakeNetwork::count(&network.ledger_reads), 7);
    assert_eq!(FakeNetwork::count(&network.execute_calls), 0);

    let stored = store.load(&owner()).await.unwrap().unwrap();
    assert_eq!(
        stored.custodial_address,
        derive_safe_address(&owner(), &POLYGON_MAINNET)
    );
    assert!(stored.is_complete());
}

#[tokio::test]
async fn approved_safe_sends_no_approval_batch() {
    let network = Arc::new(FakeNetwork {
        deployed: true,
        approved: AtomicBool::new(true),
        derived: Some(creds("derived")),
        ..Default::default()
    });
    let store = Arc::new(MemorySessionStore::new());
    let orch = orchestrator(Some(owner()), &network, &store);

    let session = match orch.initialize().await.unwrap() {
        InitializeOutcome::Activated(session) => session,
        other => panic!("expected activation, got {other:?}"),
    };
    assert!(session.has_approvals);
    assert_eq!(session.api_credentials, Some(creds("derived")));

    assert_eq!(FakeNetwork::count(&network.deploy_calls), 0);
    assert_eq!(FakeNetwork::count(&network.execute_calls), 0);
    assert_eq!(FakeNetwork::count(&network.create_calls), 0);
    // Four allowances and three operator approvals.
    assert_eq!(FakeNetwork::count(&network.ledger_reads), 7);
}

#[tokio::test]
async fn corrupted_stored_credentials_are_reacquired() {
    let store = Arc::new(MemorySessionStore::new());
    let mut corrupted = complete_session();
    corrupted.api_credentials = Some(ApiCredentials {
        secret: String::new(),
        ..creds("stored")
    });
    store.save(&owner(), &corrupted).await.unwrap();

    let network = Arc::new(FakeNetwork::default());
    let orch = orchestrator(Some(owner()), &network, &store);

    let outcome = orch.initialize().await.unwrap();
    assert!(matches!(outcome, InitializeOutcome::Activated(_)));

    // Deployment and approvals were already recorded; only credentials are redone.
    assert_eq!(FakeNetwork::count(&network.is_deployed_calls), 0);
    assert_eq!(FakeNetwork::count(&network.execute_calls), 0);
    assert_eq!(FakeNetwork::count(&network.derive_calls), 1);
    assert_eq!(FakeNetwork::count(&network.create_calls), 1);

    let stored = store.load(&owner()).await.unwrap().unwrap();
    assert_eq!(stored.usable_credentials(), Some(&creds("k")));
}

#[tokio::test]
async fn missing_wallet_is_a_precondition_failure() {
    let network = Arc::new(FakeNetwork::default());
    let store = Arc::new(MemorySessionStore::new());
    let orch = orchestrator(None, &network, &store);

    let err = orch.initialize().await.unwrap_err();
    assert!(matches!(*err, Error::WalletNotConnected));
    assert!(err.is_precondition());
    assert_eq!(orch.current_step().await, SessionStep::Idle);
    assert_eq!(network.total(), 0);
}

#[tokio::test]
async fn failed_deployment_probes_stop_before_deploying() {
    let network = Arc::new(FakeNetwork {
        probes_fail: true,
        ..Default::default()
    });
    let store = Arc::new(MemorySessionStore::new());
    let orch = orchestrator(Some(owner()), &network, &store);

    let err = orch.initialize().await.unwrap_err();
    assert!(matches!(*err, Error::Rpc(_)));
    assert_eq!(FakeNetwork::count(&network.deploy_calls), 0);
    assert_eq!(FakeNetwork::count(&network.code_reads), 1);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn end_clears_store_and_client() {
    let network = Arc::new(FakeNetwork::default());
    let store = Arc::new(MemorySessionStore::new());
    let orch = orchestrator(Some(owner()), &network, &store);
    orch.initialize().await.unwrap();

    orch.end().await.unwrap();

    assert_eq!(orch.current_step().await, SessionStep::Idle);
    assert!(orch.session().await.is_none());
    assert!(orch.trading_client().await.is_none());
    assert!(store.read(&storage_key(&owner())).await.unwrap().is_none());
}

#[tokio::test]
async fn restore_rebuilds_state_from_store() {
    let store = Arc::new(MemorySessionStore::new());
    store.save(&owner(), &complete_session()).await.unwrap();
    let network = Arc::new(FakeNetwork::default());
    let orch = orchestrator(Some(owner()), &network, &store);

    let restored = orch.restore().await.unwrap().expect("stored session");
    assert_eq!(restored.owner_address, owner());
    assert_eq!(orch.current_step().await, SessionStep::Complete);
    assert!(orch.trading_client().await.is_some());
    assert_eq!(network.total(), 0);
}

#[tokio::test]
async fn restore_ignores_incomplete_records() {
    let store = Arc::new(MemorySessionStore::new());
    let mut partial = complete_session();
    partial.has_approvals = false;
    store.save(&owner(), &partial).await.unwrap();

    let network = Arc::new(FakeNetwork::default());
    let orch = orchestrator(Some(owner()), &network, &store);

    assert!(orch.restore().await.unwrap().is_none());
    assert_eq!(orch.current_step().await, SessionStep::Idle);
    assert!(orch.trading_client().await.is_none());
}

#[tokio::test]
async fn restore_is_repeatable_and_leaves_initialize_available() {
    let store = Arc::new(MemorySessionStore::new());
    store.save(&owner(), &complete_session()).await.unwrap();
    let network = Arc::new(FakeNetwork::default());
    let orch = orchestrator(Some(owner()), &network, &store);

    assert!(orch.restore().await.unwrap().is_some());
    assert!(orch.restore().await.unwrap().is_some());
    assert!(!orch.is_in_flight());

    let outcome = orch.initialize().await.unwrap();
    assert!(matches!(outcome, InitializeOutcome::Restored(_)));
    assert_eq!(network.total(), 0);
}
