use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::KeeperError;
use crate::record::now_secs;

/// Tokens are good for a day; a restarted client logs in again anyway.
const TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: i64,
    exp: u64,
}

/// HS256 bearer tokens carrying the user id.
#[derive(Clone)]
pub struct TokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: i64) -> Result<String, KeeperError> {
        let claims = Claims {
            sub: user_id,
            exp: now_secs() + TOKEN_TTL_SECS,
        };

        encode(&Header::default(), &claims, &self.encoding).map_err(|e| {
            tracing::error!(error = %e, "Failed to sign token");
            KeeperError::Internal("token signing failed".to_string())
        })
    }

    /// Returns the user id for a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Result<i64, KeeperError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims.sub)
            .map_err(|_| KeeperError::NotAuthenticated)
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_verify_roundtrip() {
        let tokens = TokenManager::new("super-secret");
        let token = tokens.issue(42).unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), 42);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = TokenManager::new("secret-a").issue(1).unwrap();
        assert!(matches!(
            TokenManager::new("secret-b").verify(&token),
            Err(KeeperError::NotAuthenticated)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let tokens = TokenManager::new("secret");
        assert!(tokens.verify("not-a-token").is_err());
        assert!(tokens.verify("").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let tokens = TokenManager::new("secret");
        // Sign an already-expired claim directly; past the default leeway.
        let claims = Claims {
            sub: 1,
            exp: now_secs() - 600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        assert!(matches!(
            tokens.verify(&token),
            Err(KeeperError::NotAuthenticated)
        ));
    }
}
