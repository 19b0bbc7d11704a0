//! API Key model for authentication.
//!
//! API keys authenticate tenants. Only the SHA-256 hash of a key is stored
//! (`api_keys.key_hash`); the plaintext is shown once when the key is issued.
//! Rotation deactivates previous keys instead of deleting them.

use sha2::{Digest, Sha256};

/// Prefix of every generated key, so leaked keys are easy to grep for.
pub const API_KEY_PREFIX: &str = "mc_";

/// Hash a plaintext key the way it is stored.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a new plaintext key: prefix plus 32 random bytes as hex.
pub fn generate_api_key() -> String {
    let bytes: [u8; 32] = rand::random();
    format!("{}{}", API_KEY_PREFIX, hex::encode(bytes))
}
