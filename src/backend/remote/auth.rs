//! Development-mode bearer token derivation
//!
//! When the caller supplies only a `user_name`, the SDK mints an HS256 JWT
//! deterministically from that name and a shared development secret. This
//! exists so a local development server can attribute writes without a real
//! authentication service; it is NOT an authentication mechanism and must
//! never be used against a production deployment.

use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{DreamlakeError, Result};

/// Shared secret the development server is configured with
const DEV_SECRET: &str = "your-secret-key-change-this-in-production";

/// Token lifetime: 30 days
const DEV_TOKEN_TTL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DevClaims {
    user_id: String,
    user_name: String,
    iat: u64,
    exp: u64,
}

/// Stable numeric-looking user id: the first 10 decimal digits of the
/// integer formed by the first 16 hex chars of `sha256(user_name)`.
fn derive_user_id(user_name: &str) -> String {
    let digest = hex::encode(Sha256::digest(user_name.as_bytes()));
    let value = u64::from_str_radix(&digest[..16], 16).unwrap_or(0);
    let decimal = value.to_string();
    decimal[..decimal.len().min(10)].to_string()
}

/// Mint a development bearer token for `user_name`
pub fn dev_token(user_name: &str, issued_at_secs: u64) -> Result<String> {
    let claims = DevClaims {
        user_id: derive_user_id(user_name),
        user_name: user_name.to_string(),
        iat: issued_at_secs,
        exp: issued_at_secs + DEV_TOKEN_TTL_SECS,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(DEV_SECRET.as_bytes()),
    )
    .map_err(|e| DreamlakeError::BadInput(format!("failed to mint dev token: {e}")))
}

/// Mint a development token issued now
pub fn dev_token_now(user_name: &str) -> Result<String> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dev_token(user_name, now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_is_deterministic_and_short() {
        let a = derive_user_id("alice");
        let b = derive_user_id("alice");
        assert_eq!(a, b);
        assert!(a.len() <= 10);
        assert!(a.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(derive_user_id("alice"), derive_user_id("bob"));
    }

    #[test]
    fn test_dev_token_is_deterministic_for_fixed_time() {
        let t1 = dev_token("alice", 1_700_000_000).unwrap();
        let t2 = dev_token("alice", 1_700_000_000).unwrap();
        assert_eq!(t1, t2);
        // JWT: three dot-separated base64 segments
        assert_eq!(t1.split('.').count(), 3);
    }

    #[test]
    fn test_dev_token_varies_by_user() {
        let alice = dev_token("alice", 1_700_000_000).unwrap();
        let bob = dev_token("bob", 1_700_000_000).unwrap();
        assert_ne!(alice, bob);
    }
}
