use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

// ─── Address ──────────────────────────────────────────────────────────────────

/// A 20-byte chain address. Always rendered as lower-case `0x`-prefixed hex so
/// that differently-cased inputs compare and hash identically.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Decode a hex literal in const context. Panics (at compile time when used
    /// in a `const`) on malformed input.
    pub const fn from_hex_const(s: &str) -> Self {
        Self(decode_hex::<20>(s))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| Error::InvalidAddress(format!("missing 0x prefix: '{trimmed}'")))?;
        if digits.len() != 40 {
            return Err(Error::InvalidAddress(format!(
                "expected 40 hex digits, got {}: '{trimmed}'",
                digits.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| Error::InvalidAddress(format!("'{trimmed}': {e}")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

pub(crate) const fn decode_hex<const N: usize>(s: &str) -> [u8; N] {
    let bytes = s.as_bytes();
    let offset = if bytes.len() >= 2 && bytes[0] == b'0' && (bytes[1] == b'x' || bytes[1] == b'X') {
        2
    } else {
        0
    };
    assert!(bytes.len() - offset == N * 2, "hex literal has the wrong length");

    let mut out = [0u8; N];
    let mut i = 0;
    while i < N {
        out[i] = (nibble(bytes[offset + 2 * i]) << 4) | nibble(bytes[offset + 2 * i + 1]);
        i += 1;
    }
    out
}

const fn nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex digit"),
    }
}

// ─── Credentials ──────────────────────────────────────────────────────────────

/// API credentials issued by the exchange's order-matching service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
    pub passphrase: String,
}

impl ApiCredentials {
    /// The only local validity check available: every field is present.
    pub fn is_complete(&self) -> bool {
        !self.key.trim().is_empty()
            && !self.secret.trim().is_empty()
            && !self.passphrase.trim().is_empty()
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

// ─── Session ──────────────────────────────────────────────────────────────────

/// A fully activated trading identity. One record per owner address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingSession {
    pub owner_address: Address,
    pub custodial_address: Address,
    pub is_custodial_deployed: bool,
    pub has_api_credentials: bool,
    pub has_approvals: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_credentials: Option<ApiCredentials>,
    pub last_checked: DateTime<Utc>,
}

impl TradingSession {
    /// Credentials that can actually be used. A record whose flag claims
    /// credentials but whose fields are missing yields `None`.
    pub fn usable_credentials(&self) -> Option<&ApiCredentials> {
        self.api_credentials
            .as_ref()
            .filter(|c| self.has_api_credentials && c.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.is_custodial_deployed && self.has_approvals && self.usable_credentials().is_some()
    }
}

// ─── Approvals ────────────────────────────────────────────────────────────────

/// Per-spender approval state for both approval classes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStatus {
    /// Collateral (ERC-20) allowance at or above the floor, per spender.
    pub token_allowances: BTreeMap<Address, bool>,
    /// Conditional-token (ERC-1155) operator approval, per operator.
    pub operator_approvals: BTreeMap<Address, bool>,
    pub all_approved: bool,
}

impl ApprovalStatus {
    pub fn new(
        token_allowances: BTreeMap<Address, bool>,
        operator_approvals: BTreeMap<Address, bool>,
    ) -> Self {
        let all_approved = token_allowances.values().all(|v| *v)
            && operator_approvals.values().all(|v| *v);
        Self {
            token_allowances,
            operator_approvals,
            all_approved,
        }
    }

    pub fn missing_token_allowances(&self) -> impl Iterator<Item = &Address> {
        self.token_allowances
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(spender, _)| spender)
    }

    pub fn missing_operator_approvals(&self) -> impl Iterator<Item = &Address> {
        self.operator_approvals
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(operator, _)| operator)
    }
}

// ─── Progress ─────────────────────────────────────────────────────────────────

/// Progress marker of the activation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStep {
    #[default]
    Idle,
    Checking,
    Deploying,
    Credentials,
    Approvals,
    Complete,
}

impl SessionStep {
    /// Transition table. Any step may fall back to `Idle`.
    pub fn can_transition_to(self, next: SessionStep) -> bool {
        use SessionStep::*;
        matches!(
            (self, next),
            (_, Idle)
                | (Idle, Checking)
                | (Checking, Deploying)
                | (Checking, Credentials)
                | (Checking, Complete)
                | (Deploying, Credentials)
                | (Credentials, Approvals)
                | (Approvals, Complete)
        )
    }

    pub fn transition(self, next: SessionStep) -> Result<SessionStep> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for SessionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStep::Idle => write!(f, "idle"),
            SessionStep::Checking => write!(f, "checking"),
            SessionStep::Deploying => write!(f, "deploying"),
            SessionStep::Credentials => write!(f, "credentials"),
            SessionStep::Approvals => write!(f, "approvals"),
            SessionStep::Complete => write!(f, "complete"),
        }
    }
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// One call to be executed from the custodial account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Vec<u8>,
    pub value: u128,
}

impl TxRequest {
    pub fn call(to: Address, data: Vec<u8>) -> Self {
        Self { to, data, value: 0 }
    }
}

/// Handle for a transaction accepted by the relayer, awaitable via
/// `RelayerClient::wait_confirmed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayerTx {
    pub transaction_id: String,
    pub transaction_hash: Option<String>,
}

/// Final state of a relayed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxConfirmation {
    pub transaction_id: String,
    pub transaction_hash: Option<String>,
    pub proxy_address: Option<Address>,
    pub state: String,
}

// ─── Signing ──────────────────────────────────────────────────────────────────

/// A payload the owner wallet is asked to sign. The typed-data construction
/// and hashing live behind the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignRequest {
    /// Signature challenge for the credential service.
    ClobAuth {
        address: Address,
        timestamp: i64,
        nonce: u64,
        chain_id: u64,
    },
    /// Authorises creation of the custodial account through the factory.
    SafeCreate {
        factory: Address,
        payment_token: Address,
        payment: String,
        payment_receiver: Address,
        chain_id: u64,
    },
    /// Authorises one (possibly multi-send) transaction from the custodial account.
    SafeTransaction {
        safe: Address,
        to: Address,
        value: String,
        data: String,
        operation: u8,
        nonce: u64,
        chain_id: u64,
    },
}
