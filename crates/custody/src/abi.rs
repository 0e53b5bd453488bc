//! Minimal calldata encoding for the handful of contract calls the
//! activation pipeline makes.

use common::{Address, Error, Result, TxRequest};

pub const ALLOWANCE: [u8; 4] = [0xdd, 0x62, 0xed, 0x3e];
pub const IS_APPROVED_FOR_ALL: [u8; 4] = [0xe9, 0x85, 0xe9, 0xc5];
pub const APPROVE: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];
pub const SET_APPROVAL_FOR_ALL: [u8; 4] = [0xa2, 0x2c, 0xb4, 0x65];
pub const MULTI_SEND: [u8; 4] = [0x8d, 0x80, 0xff, 0x0a];

pub const MAX_UINT256: [u8; 32] = [0xff; 32];

pub fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

pub fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn bool_word(value: bool) -> [u8; 32] {
    uint_word(value as u128)
}

fn call(selector: [u8; 4], words: &[[u8; 32]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 32 * words.len());
    out.extend_from_slice(&selector);
    for w in words {
        out.extend_from_slice(w);
    }
    out
}

/// `allowance(address owner, address spender)`
pub fn encode_allowance(owner: &Address, spender: &Address) -> Vec<u8> {
    call(ALLOWANCE, &[address_word(owner), address_word(spender)])
}

/// `isApprovedForAll(address account, address operator)`
pub fn encode_is_approved_for_all(account: &Address, operator: &Address) -> Vec<u8> {
    call(IS_APPROVED_FOR_ALL, &[address_word(account), address_word(operator)])
}

/// `approve(address spender, uint256 amount)` for the maximum amount.
pub fn encode_approve_max(spender: &Address) -> Vec<u8> {
    call(APPROVE, &[address_word(spender), MAX_UINT256])
}

/// `setApprovalForAll(address operator, bool approved)`
pub fn encode_set_approval_for_all(operator: &Address, approved: bool) -> Vec<u8> {
    call(SET_APPROVAL_FOR_ALL, &[address_word(operator), bool_word(approved)])
}

/// `multiSend(bytes transactions)` with every entry packed as a plain call.
pub fn encode_multi_send(txs: &[TxRequest]) -> Vec<u8> {
    let mut packed = Vec::new();
    for tx in txs {
        packed.push(0u8); // operation: call
        packed.extend_from_slice(tx.to.as_bytes());
        packed.extend_from_slice(&uint_word(tx.value));
        packed.extend_from_slice(&uint_word(tx.data.len() as u128));
        packed.extend_from_slice(&tx.data);
    }

    let padding = (32 - packed.len() % 32) % 32;
    let mut out = call(MULTI_SEND, &[uint_word(32), uint_word(packed.len() as u128)]);
    out.extend_from_slice(&packed);
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

fn first_word(data: &[u8]) -> Result<&[u8]> {
    data.get(..32)
        .ok_or_else(|| Error::Rpc(format!("expected a 32-byte word, got {} bytes", data.len())))
}

pub fn decode_bool(data: &[u8]) -> Result<bool> {
    let word = first_word(data)?;
    Ok(word.iter().any(|b| *b != 0))
}

/// True when the uint256 in `data` is at least `floor`.
pub fn decode_uint_at_least(data: &[u8], floor: u128) -> Result<bool> {
    let word = first_word(data)?;
    if word[..16].iter().any(|b| *b != 0) {
        return Ok(true);
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low) >= floor)
}

pub fn to_hex(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| Error::Rpc(format!("malformed hex '{s}': {e}")))
}
