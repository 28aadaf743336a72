//! Commit-reveal outcome derivation.
//!
//! A commitment is `keccak256(secret)` over the raw 32-byte secret, so
//! commitments produced by EVM tooling verify unchanged. The winner of a
//! settled game is
//!
//!   `revealers[uint256(keccak256(s_0 ^ s_1 ^ ... ^ s_{n-1})) % n]`
//!
//! where `revealers` keeps join order. XOR is commutative, so the order in
//! which reveals landed has no influence on the result, and no revealer can
//! steer the digest without knowing every other revealed secret first.

use soroban_sdk::{Bytes, BytesN, Env, Vec};

/// Commitment a player publishes before revealing `secret`.
pub fn commitment_of(env: &Env, secret: &BytesN<32>) -> BytesN<32> {
    env.crypto()
        .keccak256(&Bytes::from_array(env, &secret.to_array()))
        .into()
}

/// XOR-fold all revealed secrets into one 32-byte value.
pub fn combine_secrets(secrets: &Vec<BytesN<32>>) -> [u8; 32] {
    let mut combined = [0u8; 32];
    for secret in secrets.iter() {
        for (acc, byte) in combined.iter_mut().zip(secret.to_array().iter()) {
            *acc ^= byte;
        }
    }
    combined
}

/// Index into the revealer list (join order) of the winning player.
///
/// Returns `None` when nobody revealed.
pub fn winner_index(env: &Env, secrets: &Vec<BytesN<32>>) -> Option<u32> {
    if secrets.is_empty() {
        return None;
    }
    let combined = combine_secrets(secrets);
    let digest: BytesN<32> = env
        .crypto()
        .keccak256(&Bytes::from_array(env, &combined))
        .into();
    Some(reduce_be(&digest.to_array(), secrets.len()))
}

/// Exact `value % modulus` for a big-endian 256-bit `value`.
fn reduce_be(value: &[u8; 32], modulus: u32) -> u32 {
    let m = modulus as u64;
    let mut rem = 0u64;
    for byte in value.iter() {
        rem = ((rem << 8) | *byte as u64) % m;
    }
    rem as u32
}
