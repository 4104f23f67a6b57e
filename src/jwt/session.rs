use std::time::Duration;

use jwt_simple::prelude::*;

use crate::error::{AppError, Result};

/// Verifies session tokens issued by the external identity service.
///
/// Session tokens are HS256 JWTs whose `sub` claim is the user id.
#[derive(Clone)]
pub struct SessionVerifier {
    key: HS256Key,
}

impl SessionVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: HS256Key::from_bytes(secret),
        }
    }

    /// Returns the authenticated user id.
    pub fn verify(&self, token: &str) -> Result<String> {
        let claims = self
            .key
            .verify_token::<NoCustomClaims>(token, None)
            .map_err(|_| AppError::Unauthorized("Invalid session token".into()))?;

        claims
            .subject
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Session token has no subject".into()))
    }

    /// Mint a session token. Used by dev routes and tests; production tokens
    /// come from the identity service.
    pub fn issue(&self, user_id: &str, ttl: Duration) -> Result<String> {
        let claims = Claims::create(jwt_simple::prelude::Duration::from_secs(ttl.as_secs()))
            .with_subject(user_id);
        self.key
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("Failed to issue session token: {}", e)))
    }
}
