pub mod clients;
pub mod config;
pub mod contracts;
pub mod error;
pub mod types;

pub use clients::{CredentialService, LedgerClient, OwnerWallet, RelayerClient};
pub use config::Config;
pub use contracts::{ContractConfig, POLYGON_MAINNET};
pub use error::{Error, Result};
pub use types::*;
