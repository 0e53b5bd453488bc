use crate::types::decode_hex;
use crate::Address;

/// Fixed, versioned contract deployment for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractConfig {
    pub chain_id: u64,
    /// Central-limit order book exchange for binary markets.
    pub exchange: Address,
    /// Exchange for negative-risk (multi-outcome) markets.
    pub neg_risk_exchange: Address,
    pub neg_risk_adapter: Address,
    /// ERC-1155 conditional-token contract holding outcome positions.
    pub conditional_tokens: Address,
    /// ERC-20 stable asset used as collateral.
    pub collateral: Address,
    pub safe_factory: Address,
    pub safe_init_code_hash: [u8; 32],
    pub multi_send: Address,
}

pub const POLYGON_MAINNET: ContractConfig = ContractConfig {
    chain_id: 137,
    exchange: Address::from_hex_const("0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E"),
    neg_risk_exchange: Address::from_hex_const("0xC5d563A36AE78145C45a50134d48A1215220f80a"),
    neg_risk_adapter: Address::from_hex_const("0xd91E80cF2E7be2e162c6513ceD06f1dD0dA35296"),
    conditional_tokens: Address::from_hex_const("0x4D97DCd97eC945f40cF65F87097ACe5EA0476045"),
    collateral: Address::from_hex_const("0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174"),
    safe_factory: Address::from_hex_const("0xaacFeEa03eb1561C4e67d661e40682Bd20E3541b"),
    safe_init_code_hash: decode_hex::<32>(
        "0x2bce2127ff07fb632d16c8347c4ebf501f4841168bed00d9e6ef715ddb6fcecf",
    ),
    multi_send: Address::from_hex_const("0xA238CBeb142c10Ef7Ad8442C6D1f9E89e07e7761"),
};

impl ContractConfig {
    /// Spenders that need a collateral allowance.
    pub fn token_spenders(&self) -> [Address; 4] {
        [
            self.conditional_tokens,
            self.exchange,
            self.neg_risk_exchange,
            self.neg_risk_adapter,
        ]
    }

    /// Operators that need conditional-token `setApprovalForAll`.
    pub fn token_operators(&self) -> [Address; 3] {
        [self.exchange, self.neg_risk_exchange, self.neg_risk_adapter]
    }
}

impl Default for ContractConfig {
    fn default() -> Self {
        POLYGON_MAINNET
    }
}
