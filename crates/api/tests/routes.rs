use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;
use url::Url;

use api::{app, AppState};
use common::{
    Address, ApiCredentials, CredentialService, LedgerClient, OwnerWallet, RelayerClient,
    RelayerTx, Result, SessionStep, SignRequest, TradingSession, TxConfirmation, TxRequest,
    POLYGON_MAINNET,
};
use custody::derive_safe_address;
use session::{ActivationDeps, SessionOrchestrator};
use store::{MemorySessionStore, SessionStore};

const TOKEN: &str = "control-token";
const SECRET: &str = "c2VjcmV0LWtleS1ieXRlcw==";

fn owner() -> Address {
    "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap()
}

fn creds() -> ApiCredentials {
    ApiCredentials {
        key: "api-key".into(),
        secret: SECRET.into(),
        passphrase: "very-private-passphrase".into(),
    }
}

struct Wallet;

#[async_trait]
impl OwnerWallet for Wallet {
    fn address(&self) -> Option<Address> {
        Some(owner())
    }

    async fn sign(&self, _request: &SignRequest) -> Result<String> {
        Ok("0xsigned".into())
    }
}

/// A network on which the owner is already fully set up.
struct ReadyNetwork;

#[async_trait]
impl RelayerClient for ReadyNetwork {
    async fn is_deployed(&self, _safe: &Address) -> Result<bool> {
        Ok(true)
    }

    async fn deploy(&self, _owner: &Address) -> Result<RelayerTx> {
        unreachable!("account is deployed")
    }

    async fn execute(&self, _: &Address, _: &Address, _: &[TxRequest]) -> Result<RelayerTx> {
        unreachable!("approvals are granted")
    }

    async fn wait_confirmed(&self, _tx: &RelayerTx) -> Result<TxConfirmation> {
        unreachable!("nothing is submitted")
    }
}

#[async_trait]
impl LedgerClient for ReadyNetwork {
    async fn get_code(&self, _address: &Address) -> Result<Vec<u8>> {
        Ok(vec![0x60])
    }

    async fn call(&self, _to: &Address, _data: &[u8]) -> Result<Vec<u8>> {
        Ok(vec![0xff; 32])
    }
}

#[async_trait]
impl CredentialService for ReadyNetwork {
    async fn derive_api_key(&self, _owner: &Address) -> Result<Option<ApiCredentials>> {
        Ok(Some(creds()))
    }

    async fn create_api_key(&self, _owner: &Address) -> Result<ApiCredentials> {
        unreachable!("derivation succeeds")
    }
}

fn state(store: Arc<MemorySessionStore>) -> AppState {
    let network = Arc::new(ReadyNetwork);
    let orchestrator = SessionOrchestrator::new(ActivationDeps {
        wallet: Arc::new(Wallet),
        store,
        relayer: network.clone(),
        ledger: network.clone(),
        credentials: network,
        contracts: POLYGON_MAINNET,
        clob_url: Url::parse("https://clob.example.org").unwrap(),
    });
    AppState {
        orchestrator: Arc::new(orchestrator),
        control_token: TOKEN.into(),
    }
}

fn request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn healthz_needs_no_token() {
    let app = app(state(Arc::new(MemorySessionStore::new())));
    let (status, body) = send(&app, request("GET", "/healthz", None)).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["step"], "idle");
}

#[tokio::test]
async fn api_routes_reject_missing_or_wrong_token() {
    let app = app(state(Arc::new(MemorySessionStore::new())));

    for req in [
        request("GET", "/api/session", None),
        request("GET", "/api/session", Some("wrong")),
        request("POST", "/api/session/initialize", None),
        request("DELETE", "/api/session", Some("wrong")),
    ] {
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn session_view_never_exposes_credentials() {
    let store = Arc::new(MemorySessionStore::new());
    let session = TradingSession {
        owner_address: owner(),
        custodial_address: derive_safe_address(&owner(), &POLYGON_MAINNET),
        is_custodial_deployed: true,
        has_api_credentials: true,
        has_approvals: true,
        api_credentials: Some(creds()),
        last_checked: Utc::now(),
    };
    store.save(&owner(), &session).await.unwrap();

    let state = state(store);
    state.orchestrator.restore().await.unwrap();
    let app = app(state);

    let (status, body) = send(&app, request("GET", "/api/session", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains(SECRET));
    assert!(!body.contains("very-private-passphrase"));

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["step"], "complete");
    assert_eq!(json["session"]["hasApprovals"], true);
    assert_eq!(
        json["custodialAddress"],
        derive_safe_address(&owner(), &POLYGON_MAINNET).to_string()
    );
    assert!(json["lastError"].is_null());
}

#[tokio::test]
async fn initialize_runs_in_background() {
    let store = Arc::new(MemorySessionStore::new());
    let state = state(store.clone());
    let orchestrator = state.orchestrator.clone();
    let app = app(state);

    let (status, body) = send(
        &app,
        request("POST", "/api/session/initialize", Some(TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.contains("started"));

    let mut steps = orchestrator.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *steps.borrow_and_update() != SessionStep::Complete {
            steps.changed().await.unwrap();
        }
    })
    .await
    .expect("activation completes");

    assert!(store.load(&owner()).await.unwrap().unwrap().is_complete());
}

#[tokio::test]
async fn delete_ends_the_session() {
    let store = Arc::new(MemorySessionStore::new());
    let state = state(store.clone());
    state.orchestrator.initialize().await.unwrap();
    let app = app(state);

    let (status, _) = send(&app, request("DELETE", "/api/session", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(store.is_empty().await);

    let (_, body) = send(&app, request("GET", "/api/session", Some(TOKEN))).await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["step"], "idle");
    assert!(json["session"].is_null());
}
