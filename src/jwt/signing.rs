use std::time::Duration;

use ed25519_dalek::SigningKey;
use jwt_simple::prelude::*;

use crate::error::{AppError, Result};

use super::{STREAM_TOKEN_KIND, StreamClaims, VerifiedStreamToken};

/// Signs and verifies streaming tokens with an Ed25519 key.
#[derive(Clone)]
pub struct StreamSigner {
    key_pair: Ed25519KeyPair,
}

impl StreamSigner {
    /// Build from a 32-byte Ed25519 seed.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(seed);
        let key_pair = Ed25519KeyPair::from_bytes(&signing_key.to_keypair_bytes())
            .map_err(|e| AppError::Internal(format!("Invalid signing key: {}", e)))?;
        Ok(Self { key_pair })
    }

    /// Build from a hex-encoded 32-byte seed (the `STREAM_SIGNING_KEY` format).
    pub fn from_hex(seed_hex: &str) -> Result<Self> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|_| AppError::Internal("STREAM_SIGNING_KEY is not valid hex".into()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AppError::Internal("STREAM_SIGNING_KEY must be 32 bytes".into()))?;
        Self::from_seed(&seed)
    }

    pub fn sign(&self, claims: StreamClaims, jti: &str, ttl: Duration) -> Result<String> {
        let claims = Claims::with_custom_claims(claims, jwt_simple::prelude::Duration::from_secs(ttl.as_secs()))
            .with_jwt_id(jti);
        self.key_pair
            .sign(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Check signature and shape. Expired or tampered tokens are rejected here;
    /// liveness (revocation) is checked against the store by the caller.
    pub fn verify(&self, token: &str) -> Result<VerifiedStreamToken> {
        let claims = self
            .key_pair
            .public_key()
            .verify_token::<StreamClaims>(token, None)
            .map_err(|_| AppError::VideoAccess("Invalid streaming token".into()))?;

        if claims.custom.kind != STREAM_TOKEN_KIND {
            return Err(AppError::VideoAccess("Invalid streaming token".into()));
        }

        let jti = claims
            .jwt_id
            .ok_or_else(|| AppError::VideoAccess("Invalid streaming token".into()))?;

        Ok(VerifiedStreamToken {
            expires_at: claims.expires_at.map(|t| t.as_secs() as i64),
            claims: claims.custom,
            jti,
        })
    }
}
