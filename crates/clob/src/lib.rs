pub mod auth;
pub mod credentials;
pub mod trading;

pub use auth::ClobAuthClient;
pub use credentials::{CredentialAcquirer, CredentialSource};
pub use trading::TradingClient;
