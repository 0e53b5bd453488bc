use async_trait::async_trait;

use crate::{Address, ApiCredentials, RelayerTx, Result, SignRequest, TxConfirmation, TxRequest};

/// The authenticating externally-owned account.
///
/// `address()` returning `None` means no wallet is connected; the pipeline
/// treats that as a terminal precondition failure.
#[async_trait]
pub trait OwnerWallet: Send + Sync {
    fn address(&self) -> Option<Address>;

    /// Sign a request. A rejected or failed signature must surface as
    /// `Error::Authentication`.
    async fn sign(&self, request: &SignRequest) -> Result<String>;
}

/// Remote coordination service for custodial accounts (the relayer).
#[async_trait]
pub trait RelayerClient: Send + Sync {
    /// Ask the service whether the custodial account exists.
    async fn is_deployed(&self, safe: &Address) -> Result<bool>;

    /// Submit a deployment of the custodial account owned by `owner`.
    async fn deploy(&self, owner: &Address) -> Result<RelayerTx>;

    /// Submit `txs` as one atomic transaction from `safe`.
    async fn execute(&self, owner: &Address, safe: &Address, txs: &[TxRequest])
        -> Result<RelayerTx>;

    /// Block until the transaction is mined or confirmed.
    async fn wait_confirmed(&self, tx: &RelayerTx) -> Result<TxConfirmation>;
}

/// Read-only ledger access.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_code(&self, address: &Address) -> Result<Vec<u8>>;

    /// Execute a read-only call and return the raw return data.
    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>>;
}

/// Remote credential endpoints of the exchange's order-matching service.
#[async_trait]
pub trait CredentialService: Send + Sync {
    /// Look up credentials previously created for `owner`. `Ok(None)` when the
    /// service has none; a returned set may still be missing fields.
    async fn derive_api_key(&self, owner: &Address) -> Result<Option<ApiCredentials>>;

    async fn create_api_key(&self, owner: &Address) -> Result<ApiCredentials>;
}
