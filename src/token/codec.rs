use crate::error::app_error::AppError;
use rand::RngCore;
use rand::rngs::OsRng;

/// Derives opaque client-facing tokens from random secrets and verifies
/// presented tokens against their stored bcrypt hashes.
///
/// Pure with respect to persisted state; the caller decides what to do with
/// the hash.
pub struct TokenCodec {
    cost: u32,
}

impl TokenCodec {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Generate a fresh token. Returns `(raw_token, token_hash)`: the raw
    /// token goes to the client exactly once and is never stored; only the
    /// cost-bound hash is persisted.
    pub fn issue(&self) -> Result<(String, String), AppError> {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let token = hex::encode(secret);

        let token_hash = bcrypt::hash(&token, self.cost)?;

        Ok((token, token_hash))
    }

    /// Check a presented token against a stored hash. A wrong token is an
    /// expected, frequent case: mismatches, malformed hashes, and unsupported
    /// hash versions all come back as `false`, never as an error.
    pub fn verify(&self, token: &str, stored_hash: &str) -> bool {
        bcrypt::verify(token, stored_hash).unwrap_or(false)
    }

    /// Burn the same amount of work as a real verification without any
    /// stored hash, so lookups for unknown users take as long as lookups for
    /// existing ones.
    pub fn dummy_verify(&self, token: &str) {
        let _ = bcrypt::hash(token, self.cost);
    }
}
