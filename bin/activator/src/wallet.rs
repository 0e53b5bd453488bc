use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use common::{Address, Error, OwnerWallet, Result, SignRequest};

/// Owner wallet backed by an external signing service. Keys never enter this
/// process; every signature is a `POST <signer>/sign` round trip.
pub struct RemoteWallet {
    address: Address,
    endpoint: Url,
    http: Client,
}

#[derive(Serialize)]
struct SignBody<'a> {
    signer: Address,
    request: &'a SignRequest,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: Option<String>,
}

impl RemoteWallet {
    pub fn new(address: Address, signer_url: Url) -> Result<Self> {
        let endpoint = signer_url
            .join("sign")
            .map_err(|e| Error::Config(format!("bad SIGNER_URL: {e}")))?;
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            address,
            endpoint,
            http,
        })
    }
}

#[async_trait]
impl OwnerWallet for RemoteWallet {
    fn address(&self) -> Option<Address> {
        Some(self.address)
    }

    async fn sign(&self, request: &SignRequest) -> Result<String> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(&SignBody {
                signer: self.address,
                request,
            })
            .send()
            .await
            .map_err(|e| Error::Authentication(format!("signer unreachable: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Authentication(format!("signer response unreadable: {e}")))?;
        debug!(%status, "Signer response");

        if !status.is_success() {
            return Err(Error::Authentication(format!(
                "signer refused request: HTTP {status}: {body}"
            )));
        }
        parse_signature(&body)
    }
}

fn parse_signature(body: &str) -> Result<String> {
    let resp: SignResponse = serde_json::from_str(body)
        .map_err(|e| Error::Authentication(format!("malformed signer response: {e}")))?;
    match resp.signature {
        Some(sig) if sig.starts_with("0x") && sig.len() > 2 => Ok(sig),
        _ => Err(Error::Authentication("signer returned no signature".into())),
    }
}
