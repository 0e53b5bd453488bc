use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use common::{Address, ApiCredentials, CredentialService, Error, OwnerWallet, Result, SignRequest};

pub const HEADER_ADDRESS: &str = "POLY_ADDRESS";
pub const HEADER_SIGNATURE: &str = "POLY_SIGNATURE";
pub const HEADER_TIMESTAMP: &str = "POLY_TIMESTAMP";
pub const HEADER_NONCE: &str = "POLY_NONCE";

/// Credential endpoints of the order-matching service, authenticated with a
/// wallet signature over a timestamped challenge.
pub struct ClobAuthClient {
    base_url: Url,
    http: Client,
    wallet: Arc<dyn OwnerWallet>,
    chain_id: u64,
    nonce: u64,
}

impl ClobAuthClient {
    pub fn new(base_url: Url, wallet: Arc<dyn OwnerWallet>, chain_id: u64) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url,
            http,
            wallet,
            chain_id,
            nonce: 0,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("bad CLOB path '{path}': {e}")))
    }

    /// Attach the signature-challenge headers to `req`.
    async fn signed(&self, owner: &Address, req: RequestBuilder) -> Result<RequestBuilder> {
        let timestamp = Utc::now().timestamp();
        let signature = self
            .wallet
            .sign(&SignRequest::ClobAuth {
                address: *owner,
                timestamp,
                nonce: self.nonce,
                chain_id: self.chain_id,
            })
            .await?;

        Ok(req
            .header(HEADER_ADDRESS, owner.to_string())
            .header(HEADER_SIGNATURE, signature)
            .header(HEADER_TIMESTAMP, timestamp.to_string())
            .header(HEADER_NONCE, self.nonce.to_string()))
    }

    async fn send(&self, req: RequestBuilder) -> Result<(StatusCode, String)> {
        let resp = req.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok((status, body))
    }
}

#[async_trait]
impl CredentialService for ClobAuthClient {
    async fn derive_api_key(&self, owner: &Address) -> Result<Option<ApiCredentials>> {
        let req = self.http.get(self.endpoint("auth/derive-api-key")?);
        let (status, body) = self.send(self.signed(owner, req).await?).await?;
        debug!(owner = %owner, %status, "derive-api-key response");

        match status {
            s if s.is_success() => Ok(parse_credentials(&body)),
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => Ok(None),
            s => Err(status_error(s, &body)),
        }
    }

    async fn create_api_key(&self, owner: &Address) -> Result<ApiCredentials> {
        let req = self.http.post(self.endpoint("auth/api-key")?);
        let (status, body) = self.send(self.signed(owner, req).await?).await?;
        debug!(owner = %owner, %status, "create-api-key response");

        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        parse_credentials(&body)
            .ok_or_else(|| Error::Integrity("create-api-key returned no credentials".into()))
    }
}

fn status_error(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Authentication(format!("HTTP {status}: {body}"))
        }
        _ => Error::Http(format!("HTTP {status}: {body}")),
    }
}

/// Parse a credential response, keeping whatever subset of fields is present.
/// Returns `None` when the body carries no credential fields at all.
fn parse_credentials(body: &str) -> Option<ApiCredentials> {
    let resp: ApiKeyResponse = serde_json::from_str(body).ok()?;
    if resp.api_key.is_none() && resp.secret.is_none() && resp.passphrase.is_none() {
        return None;
    }
    Some(ApiCredentials {
        key: resp.api_key.unwrap_or_default(),
        secret: resp.secret.unwrap_or_default(),
        passphrase: resp.passphrase.unwrap_or_default(),
    })
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyResponse {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    passphrase: Option<String>,
}
