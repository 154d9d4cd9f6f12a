//! Request fingerprinting

use govern_common::RequestInfo;
use sha2::{Digest, Sha256};

/// Principal used when the request is unauthenticated
pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";

/// `key_prefix` + hex SHA-256 over principal, method, path and body.
///
/// Each field is length-prefixed, so moving bytes from one field into its
/// neighbour always changes the digest.
pub fn fingerprint(key_prefix: &str, principal: Option<&str>, request: &RequestInfo) -> String {
    let mut hasher = Sha256::new();
    for field in [
        principal.unwrap_or(ANONYMOUS_PRINCIPAL),
        request.method.as_str(),
        request.path.as_str(),
        request.body.as_str(),
    ] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    format!("{}{}", key_prefix, hex::encode(hasher.finalize()))
}
