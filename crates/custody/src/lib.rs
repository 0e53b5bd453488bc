pub mod abi;
pub mod approvals;
pub mod deployment;
pub mod derivation;
pub mod ledger;
pub mod relayer;

pub use approvals::{ApprovalReconciler, MIN_COLLATERAL_ALLOWANCE};
pub use deployment::SafeDeployer;
pub use derivation::derive_safe_address;
pub use ledger::JsonRpcLedger;
pub use relayer::RelayerHttpClient;
