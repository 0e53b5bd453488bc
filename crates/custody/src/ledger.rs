use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use common::{Address, Error, LedgerClient, Result};

use crate::abi;

/// JSON-RPC ledger reader (`eth_getCode`, `eth_call`).
pub struct JsonRpcLedger {
    rpc_url: Url,
    http: Client,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(rpc_url: Url) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            rpc_url,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "JSON-RPC request");

        let resp = self
            .http
            .post(self.rpc_url.clone())
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Rpc(format!("HTTP {status}: {body}")));
        }

        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<String> {
    let resp: RpcResponse =
        serde_json::from_str(body).map_err(|e| Error::Rpc(format!("unexpected response: {e}")))?;
    match (resp.result, resp.error) {
        (_, Some(err)) => Err(Error::Rpc(format!("{} (code {})", err.message, err.code))),
        (Some(result), None) => Ok(result),
        (None, None) => Err(Error::Rpc("response has neither result nor error".into())),
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn get_code(&self, address: &Address) -> Result<Vec<u8>> {
        let code = self
            .request("eth_getCode", json!([address, "latest"]))
            .await?;
        abi::from_hex(&code)
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>> {
        let ret = self
            .request(
                "eth_call",
                json!([{ "to": to, "data": abi::to_hex(data) }, "latest"]),
            )
            .await?;
        abi::from_hex(&ret)
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}
