//! Truncated base-36 hashing
//!
//! Produces short alphanumeric digests suitable for embedding in resource
//! names. The byte-to-symbol mapping is `byte % 36`, which is not an encoding:
//! distinct bytes can map to the same symbol. Collision resistance comes from
//! the digest length, not from the mapping.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;

use crate::error::{Error, Result};

const BASE36_SET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Largest output length BLAKE2b supports
pub const MAX_HASH_LENGTH: usize = 64;

/// Hash `data` with BLAKE2b to `length` bytes and map each byte onto `0-9a-z`
pub fn base36_truncated_hash(data: &[u8], length: usize) -> Result<String> {
    if length == 0 || length > MAX_HASH_LENGTH {
        return Err(Error::Naming(format!(
            "hash length {} outside 1..={}",
            length, MAX_HASH_LENGTH
        )));
    }

    let mut hasher = Blake2bVar::new(length)
        .map_err(|e| Error::Naming(format!("unable to create hash function: {}", e)))?;
    hasher.update(data);

    let mut digest = vec![0u8; length];
    hasher
        .finalize_variable(&mut digest)
        .map_err(|e| Error::Naming(format!("unable to write hash: {}", e)))?;

    Ok(base36_truncate(&digest))
}

/// Map each byte onto one base-36 symbol
fn base36_truncate(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| BASE36_SET[(*b as usize) % BASE36_SET.len()] as char)
        .collect()
}
