//! Content hashing.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of signature HTML.
///
/// This is the value stored in the ledger and compared during conflict
/// checks, so it must be computed over exactly the bytes a store holds.
pub fn content_hash(html: &str) -> String {
    hex::encode(Sha256::digest(html.as_bytes()))
}
