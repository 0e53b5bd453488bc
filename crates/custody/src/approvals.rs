use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, warn};

use common::{
    Address, ApprovalStatus, ContractConfig, LedgerClient, RelayerClient, Result, TxRequest,
};

use crate::abi;

/// Collateral allowance at or above this many base units counts as approved
/// (1,000,000 units of a 6-decimal stable asset).
pub const MIN_COLLATERAL_ALLOWANCE: u128 = 1_000_000_000_000;

/// Checks and grants the spending approvals the exchange contracts need on
/// the custodial account.
pub struct ApprovalReconciler {
    relayer: Arc<dyn RelayerClient>,
    ledger: Arc<dyn LedgerClient>,
    contracts: ContractConfig,
}

impl ApprovalReconciler {
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

    /// Read every approval concurrently. A failed read counts as not approved.
    pub async fn check(&self, safe: &Address) -> ApprovalStatus {
        let spenders = self.contracts.token_spenders();
        let operators = self.contracts.token_operators();

        let allowance_reads = spenders.iter().map(|spender| self.allowance_ok(safe, spender));
        let operator_reads = operators.iter().map(|operator| self.operator_ok(safe, operator));
        let (allowances, operator_flags) =
            tokio::join!(join_all(allowance_reads), join_all(operator_reads));

        let status = ApprovalStatus::new(
            spenders.into_iter().zip(allowances).collect::<BTreeMap<_, _>>(),
            operators.into_iter().zip(operator_flags).collect::<BTreeMap<_, _>>(),
        );
        info!(
            safe = %safe,
            all_approved = status.all_approved,
            missing_allowances = status.missing_token_allowances().count(),
            missing_operators = status.missing_operator_approvals().count(),
            "Approval status checked"
        );
        status
    }

    async fn allowance_ok(&self, safe: &Address, spender: &Address) -> bool {
        let data = abi::encode_allowance(safe, spender);
        let read = self
            .ledger
            .call(&self.contracts.collateral, &data)
            .await
            .and_then(|ret| abi::decode_uint_at_least(&ret, MIN_COLLATERAL_ALLOWANCE));
        read.unwrap_or_else(|e| {
            warn!(spender = %spender, error = %e, "Allowance read failed, treating as unapproved");
            false
        })
    }

    async fn operator_ok(&self, safe: &Address, operator: &Address) -> bool {
        let data = abi::encode_is_approved_for_all(safe, operator);
        let read = self
            .ledger
            .call(&self.contracts.conditional_tokens, &data)
            .await
            .and_then(|ret| abi::decode_bool(&ret));
        read.unwrap_or_else(|e| {
            warn!(operator = %operator, error = %e, "Operator read failed, treating as unapproved");
            false
        })
    }

    /// Every approval the exchange needs, regardless of current state.
    pub fn approval_batch(&self) -> Vec<TxRequest> {
        let allowances = self
            .contracts
            .token_spenders()
            .into_iter()
            .map(|spender| {
                TxRequest::call(self.contracts.collateral, abi::encode_approve_max(&spender))
            });
        let operators = self.contracts.token_operators().into_iter().map(|operator| {
            TxRequest::call(
                self.contracts.conditional_tokens,
                abi::encode_set_approval_for_all(&operator, true),
            )
        });
        allowances.chain(operators).collect()
    }

    /// Submit the full approval batch as one transaction from `safe` and wait
    /// for it to confirm. Only call when `check` reported missing approvals.
    /// `Ok` means the batch confirmed and the account is fully approved.
    pub async fn reconcile(&self, owner: &Address, safe: &Address) -> Result<()> {
        let batch = self.approval_batch();
        info!(safe = %safe, calls = batch.len(), "Submitting approval batch");

        let tx = self.relayer.execute(owner, safe, &batch).await?;
        let confirmation = self.relayer.wait_confirmed(&tx).await?;

        info!(
            safe = %safe,
            transaction_id = %confirmation.transaction_id,
            state = %confirmation.state,
            "Approval batch confirmed"
        );
        Ok(())
    }
}
