//! Correlation token generation.

use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Length of a generated token in hex digits.
pub const TOKEN_LEN: usize = 12;

/// Generate a fresh correlation token.
///
/// The token scopes every status query and destructive operation to one
/// deployment, so it only needs to be unique among concurrently live
/// environments.
pub fn generate_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    token_from_seed(&format!("{}:{nanos}", std::process::id()))
}

fn token_from_seed(seed: &str) -> String {
    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    digest[..TOKEN_LEN].to_string()
}
