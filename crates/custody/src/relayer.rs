use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use common::{
    Address, ContractConfig, Error, OwnerWallet, RelayerClient, RelayerTx, Result, SignRequest,
    TxConfirmation, TxRequest,
};

use crate::abi;
use crate::derivation::derive_safe_address;

const OPERATION_CALL: u8 = 0;
const OPERATION_DELEGATE_CALL: u8 = 1;

/// HTTP client for the custodial-account relayer.
///
/// Deployments and batched transactions are signed by the owner wallet and
/// submitted gas-free; `wait_confirmed` polls until the relayer reports a
/// terminal state.
pub struct RelayerHttpClient {
    base_url: Url,
    http: Client,
    wallet: Arc<dyn OwnerWallet>,
    contracts: ContractConfig,
    poll_interval: Duration,
    max_polls: u32,
}

impl RelayerHttpClient {
    pub fn new(
        base_url: Url,
        wallet: Arc<dyn OwnerWallet>,
        contracts: ContractConfig,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url,
            http,
            wallet,
            contracts,
            poll_interval,
            max_polls,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("bad relayer path '{path}': {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let resp = self
            .http
            .get(self.endpoint(path)?)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        read_json(resp).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let resp = self
            .http
            .post(self.endpoint(path)?)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        read_json(resp).await
    }

    async fn nonce(&self, owner: &Address) -> Result<u64> {
        let owner = owner.to_string();
        let resp: NonceResponse = self
            .get_json("nonce", &[("address", owner.as_str()), ("type", "SAFE")])
            .await?;
        match resp.nonce {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| Error::Relayer("nonce response has no usable nonce".into()))
    }

    async fn submit(&self, body: Value) -> Result<RelayerTx> {
        let resp: SubmitResponse = self.post_json("submit", &body).await?;
        debug!(transaction_id = %resp.transaction_id, state = ?resp.state, "Relayer accepted transaction");
        Ok(RelayerTx {
            transaction_id: resp.transaction_id,
            transaction_hash: resp.transaction_hash,
        })
    }
}

#[async_trait]
impl RelayerClient for RelayerHttpClient {
    async fn is_deployed(&self, safe: &Address) -> Result<bool> {
        let safe = safe.to_string();
        let resp: DeployedResponse = self.get_json("deployed", &[("address", safe.as_str())]).await?;
        Ok(resp.deployed)
    }

    async fn deploy(&self, owner: &Address) -> Result<RelayerTx> {
        let safe = derive_safe_address(owner, &self.contracts);
        let signature = self
            .wallet
            .sign(&SignRequest::SafeCreate {
                factory: self.contracts.safe_factory,
                payment_token: Address::ZERO,
                payment: "0".into(),
                payment_receiver: Address::ZERO,
                chain_id: self.contracts.chain_id,
            })
            .await?;

        self.submit(json!({
            "from": owner,
            "to": self.contracts.safe_factory,
            "proxyWallet": safe,
            "data": "0x",
            "signature": signature,
            "signatureParams": {
                "paymentToken": Address::ZERO,
                "payment": "0",
                "paymentReceiver": Address::ZERO,
            },
            "type": "SAFE-CREATE",
        }))
        .await
    }

    async fn execute(&self, owner: &Address, safe: &Address, txs: &[TxRequest]) -> Result<RelayerTx> {
        let (to, data, operation) = match txs {
            [] => return Err(Error::Relayer("refusing to submit an empty batch".into())),
            [single] => (single.to, single.data.clone(), OPERATION_CALL),
            many => (
                self.contracts.multi_send,
                abi::encode_multi_send(many),
                OPERATION_DELEGATE_CALL,
            ),
        };
        let value = if operation == OPERATION_CALL { txs[0].value } else { 0 };
        let nonce = self.nonce(owner).await?;
        let data_hex = abi::to_hex(&data);

        let signature = self
            .wallet
            .sign(&SignRequest::SafeTransaction {
                safe: *safe,
                to,
                value: value.to_string(),
                data: data_hex.clone(),
                operation,
                nonce,
                chain_id: self.contracts.chain_id,
            })
            .await?;

        self.submit(json!({
            "from": owner,
            "to": to,
            "proxyWallet": safe,
            "data": data_hex,
            "value": value.to_string(),
            "nonce": nonce.to_string(),
            "signature": signature,
            "signatureParams": {
                "gasPrice": "0",
                "operation": operation.to_string(),
                "safeTxnGas": "0",
                "baseGas": "0",
                "gasToken": Address::ZERO,
                "refundReceiver": Address::ZERO,
            },
            "type": "SAFE",
        }))
        .await
    }

    async fn wait_confirmed(&self, tx: &RelayerTx) -> Result<TxConfirmation> {
        for attempt in 1..=self.max_polls {
            match self
                .get_json::<Vec<TransactionRecord>>("transaction", &[("id", tx.transaction_id.as_str())])
                .await
            {
                Ok(records) => {
                    if let Some(record) = records.into_iter().next() {
                        match classify(&record.state) {
                            TxState::Succeeded => return record.into_confirmation(),
                            TxState::Failed => {
                                return Err(Error::TransactionFailed {
                                    transaction_id: tx.transaction_id.clone(),
                                    state: record.state,
                                })
                            }
                            TxState::Pending => {
                                debug!(transaction_id = %tx.transaction_id, attempt, state = %record.state, "Transaction pending");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(transaction_id = %tx.transaction_id, attempt, error = %e, "Transaction status poll failed");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(Error::ConfirmationTimeout {
            transaction_id: tx.transaction_id.clone(),
            attempts: self.max_polls,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Pending,
    Succeeded,
    Failed,
}

fn classify(state: &str) -> TxState {
    match state {
        "STATE_MINED" | "STATE_CONFIRMED" => TxState::Succeeded,
        "STATE_FAILED" | "STATE_INVALID" => TxState::Failed,
        _ => TxState::Pending,
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

    if !status.is_success() {
        return Err(Error::Relayer(format!("HTTP {status}: {body}")));
    }
    serde_json::from_str(&body).map_err(|e| Error::Relayer(format!("unexpected response: {e}")))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DeployedResponse {
    deployed: bool,
}

#[derive(Deserialize)]
struct NonceResponse {
    nonce: Value,
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(rename = "transactionID")]
    transaction_id: String,
    #[serde(rename = "transactionHash", default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Deserialize)]
struct TransactionRecord {
    #[serde(rename = "transactionID")]
    transaction_id: String,
    #[serde(rename = "transactionHash", default)]
    transaction_hash: Option<String>,
    state: String,
    #[serde(rename = "proxyAddress", default)]
    proxy_address: Option<String>,
}

impl TransactionRecord {
    fn into_confirmation(self) -> Result<TxConfirmation> {
        let proxy_address = match self.proxy_address.as_deref() {
            Some(p) if !p.is_empty() => Some(p.parse()?),
            _ => None,
        };
        Ok(TxConfirmation {
            transaction_id: self.transaction_id,
            transaction_hash: self.transaction_hash.filter(|h| !h.is_empty()),
            proxy_address,
            state: self.state,
        })
    }
}
