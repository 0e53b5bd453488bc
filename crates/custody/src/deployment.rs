use std::sync::Arc;

use tracing::{debug, info, warn};

use common::{Address, ContractConfig, Error, LedgerClient, RelayerClient, Result};

use crate::derivation::derive_safe_address;

/// Sources of truth for "does the custodial account exist", tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeploymentProbe {
    /// Ask the coordination service.
    Relayer,
    /// Look for contract bytecode on the ledger.
    Bytecode,
}

const PROBES: [DeploymentProbe; 2] = [DeploymentProbe::Relayer, DeploymentProbe::Bytecode];

/// Checks for and, when missing, deploys the owner's custodial account.
pub struct SafeDeployer {
    relayer: Arc<dyn RelayerClient>,
    ledger: Arc<dyn LedgerClient>,
    contracts: ContractConfig,
}

impl SafeDeployer {
    pub fn new(
        relayer: Arc<dyn RelayerClient>,
        ledger: Arc<dyn LedgerClient>,
        contracts: ContractConfig,
    ) -> Self {
        Self {
            relayer,
            ledger,
            contracts,
        }
    }

    /// Whether `safe` is deployed. Falls back from the relayer to a bytecode
    /// read; fails only when every probe fails.
    pub async fn is_deployed(&self, safe: &Address) -> Result<bool> {
        let mut last_err = None;
        for probe in PROBES {
            match self.probe(probe, safe).await {
                Ok(deployed) => {
                    debug!(safe = %safe, ?probe, deployed, "Deployment status resolved");
                    return Ok(deployed);
                }
                Err(e) => {
                    warn!(safe = %safe, ?probe, error = %e, "Deployment probe failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Relayer("no deployment probe configured".into())))
    }

    async fn probe(&self, probe: DeploymentProbe, safe: &Address) -> Result<bool> {
        match probe {
            DeploymentProbe::Relayer => self.relayer.is_deployed(safe).await,
            DeploymentProbe::Bytecode => Ok(!self.ledger.get_code(safe).await?.is_empty()),
        }
    }

    /// Submit the deployment and wait for it to be confirmed. Returns the
    /// custodial address only once the account is known to exist.
    pub async fn deploy(&self, owner: &Address) -> Result<Address> {
        let expected = derive_safe_address(owner, &self.contracts);
        info!(owner = %owner, safe = %expected, "Deploying custodial account");

        let tx = self.relayer.deploy(owner).await?;
        info!(transaction_id = %tx.transaction_id, "Deployment submitted, awaiting confirmation");

        let confirmation = self.relayer.wait_confirmed(&tx).await?;
        if let Some(proxy) = confirmation.proxy_address {
            if proxy != expected {
                return Err(Error::Integrity(format!(
                    "relayer deployed {proxy} but {expected} was derived for owner {owner}"
                )));
            }
        }

        info!(
            safe = %expected,
            tx_hash = confirmation.transaction_hash.as_deref().unwrap_or("-"),
            "Custodial account deployed"
        );
        Ok(expected)
    }
}
