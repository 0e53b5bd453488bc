use sha3::{Digest, Keccak256};

use common::{Address, ContractConfig};

use crate::abi::address_word;

fn keccak256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().into()
}

/// Deterministic CREATE2 address of the custodial account owned by `owner`.
///
/// `salt = keccak256(abi.encode(owner))`, deployed by the configured Safe
/// factory with the configured init-code hash. Pure: no I/O, same output for
/// the same inputs on every call and every device.
pub fn derive_safe_address(owner: &Address, contracts: &ContractConfig) -> Address {
    let salt = keccak256(&[&address_word(owner)]);
    let hash = keccak256(&[
        &[0xff],
        contracts.safe_factory.as_bytes(),
        &salt,
        &contracts.safe_init_code_hash,
    ]);

    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    Address::from_bytes(bytes)
}
