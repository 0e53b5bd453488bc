use std::time::Duration;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use tracing::debug;
use url::Url;

use common::{Address, ApiCredentials, Error, Result};

use crate::auth::{HEADER_ADDRESS, HEADER_SIGNATURE, HEADER_TIMESTAMP};

pub const HEADER_API_KEY: &str = "POLY_API_KEY";
pub const HEADER_PASSPHRASE: &str = "POLY_PASSPHRASE";

/// Credential-authenticated client for the order-matching service. Built
/// once a session is complete, and rebuilt from the stored session on reload.
pub struct TradingClient {
    base_url: Url,
    http: Client,
    owner: Address,
    safe: Address,
    credentials: ApiCredentials,
}

impl std::fmt::Debug for TradingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingClient")
            .field("base_url", &self.base_url.as_str())
            .field("owner", &self.owner)
            .field("safe", &self.safe)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl TradingClient {
    pub fn new(
        base_url: Url,
        owner: Address,
        safe: Address,
        credentials: ApiCredentials,
    ) -> Result<Self> {
        if !credentials.is_complete() {
            return Err(Error::Integrity(
                "cannot build a trading client from incomplete credentials".into(),
            ));
        }

        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url,
            http,
            owner,
            safe,
            credentials,
        })
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    /// The custodial account orders are placed from.
    pub fn safe(&self) -> &Address {
        &self.safe
    }

    pub fn api_key(&self) -> &str {
        &self.credentials.key
    }

    /// Authentication headers for one request.
    pub fn l2_headers(
        &self,
        method: &str,
        request_path: &str,
        body: Option<&str>,
    ) -> Result<Vec<(&'static str, String)>> {
        self.l2_headers_at(Utc::now().timestamp(), method, request_path, body)
    }

    fn l2_headers_at(
        &self,
        timestamp: i64,
        method: &str,
        request_path: &str,
        body: Option<&str>,
    ) -> Result<Vec<(&'static str, String)>> {
        let signature = sign_request(
            &self.credentials.secret,
            timestamp,
            method,
            request_path,
            body,
        )?;
        Ok(vec![
            (HEADER_ADDRESS, self.owner.to_string()),
            (HEADER_SIGNATURE, signature),
            (HEADER_TIMESTAMP, timestamp.to_string()),
            (HEADER_API_KEY, self.credentials.key.clone()),
            (HEADER_PASSPHRASE, self.credentials.passphrase.clone()),
        ])
    }

    /// API keys the service holds for this identity.
    pub async fn api_keys(&self) -> Result<Vec<String>> {
        let path = "/auth/api-keys";
        let url = self
            .base_url
            .join(path)
            .map_err(|e| Error::Config(format!("bad CLOB path '{path}': {e}")))?;

        let mut req = self.http.get(url);
        for (name, value) in self.l2_headers("GET", path, None)? {
            req = req.header(name, value);
        }
        let resp = req.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        debug!(%status, "api-keys response");

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            return Err(Error::Http(format!("HTTP {status}: {body}")));
        }
        Ok(parse_api_keys(&serde_json::from_str(&body)?))
    }
}

fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(secret)
        .or_else(|_| STANDARD.decode(secret))
        .map_err(|e| Error::Integrity(format!("API secret is not valid base64: {e}")))
}

/// HMAC-SHA256 over `timestamp + METHOD + path + body`, keyed with the
/// decoded secret and returned as url-safe base64.
pub fn sign_request(
    secret: &str,
    timestamp: i64,
    method: &str,
    request_path: &str,
    body: Option<&str>,
) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let key = decode_secret(secret)?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| Error::Integrity(format!("unusable API secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(method.to_uppercase().as_bytes());
    mac.update(request_path.as_bytes());
    if let Some(b) = body {
        mac.update(b.as_bytes());
    }
    Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
}

fn parse_api_keys(value: &Value) -> Vec<String> {
    let keys = value.get("apiKeys").unwrap_or(value);
    keys.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|k| match k {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(o) => o.get("apiKey").and_then(Value::as_str).map(String::from),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}
