use thiserror::Error;

use crate::SessionStep;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Relayer error: {0}")]
    Relayer(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Transaction {transaction_id} not confirmed after {attempts} polls")]
    ConfirmationTimeout {
        transaction_id: String,
        attempts: u32,
    },

    #[error("Transaction {transaction_id} failed with state {state}")]
    TransactionFailed {
        transaction_id: String,
        state: String,
    },

    #[error("Data integrity error: {0}")]
    Integrity(String),

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: SessionStep, to: SessionStep },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Local failures that no amount of retrying will fix.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::WalletNotConnected | Error::InvalidAddress(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
