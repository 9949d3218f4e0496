//! Fingerprint digests

use ring::digest::{digest, SHA256};

/// Lower-case hex SHA-256 of `input`
pub fn sha256_hex(input: &str) -> String {
    hex::encode(digest(&SHA256, input.as_bytes()))
}
