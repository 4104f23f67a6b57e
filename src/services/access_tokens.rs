use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::jwt::{StreamClaims, StreamSigner};
use crate::store::KeyValueStore;
use crate::util::{random_hex, random_url_token};

use super::EntitlementGrant;

fn stream_token_key(jti: &str) -> String {
    format!("stream_token:{}", jti)
}

fn download_token_key(id: &str) -> String {
    format!("download_token:{}", id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

/// A streaming token that is live in the store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamAccess {
    pub video_id: String,
    pub user_id: String,
    pub expires_at: Option<i64>,
}

/// Payload of a redeemed download token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadAccess {
    pub video_id: String,
    pub user_id: String,
}

/// Mints streaming and download credentials for already-entitled users.
///
/// Holds no business rules: every issue call takes an [`EntitlementGrant`].
/// The store is authoritative for liveness; signatures only detect tampering.
pub struct AccessTokenIssuer {
    store: Arc<dyn KeyValueStore>,
    signer: StreamSigner,
    stream_ttl: Duration,
    download_ttl: Duration,
}

impl AccessTokenIssuer {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        signer: StreamSigner,
        stream_ttl: Duration,
        download_ttl: Duration,
    ) -> Self {
        Self {
            store,
            signer,
            stream_ttl,
            download_ttl,
        }
    }

    pub async fn issue_streaming_token(&self, grant: &EntitlementGrant) -> Result<IssuedToken> {
        let jti = random_hex(16);
        let token = self.signer.sign(
            StreamClaims::new(grant.video_id(), grant.user_id()),
            &jti,
            self.stream_ttl,
        )?;

        self.store
            .hash_set(
                &stream_token_key(&jti),
                &[("video_id", grant.video_id()), ("user_id", grant.user_id())],
                self.stream_ttl,
            )
            .await?;

        tracing::debug!("Issued streaming token {} for video {}", jti, grant.video_id());

        Ok(IssuedToken {
            token,
            expires_at: Utc::now().timestamp() + self.stream_ttl.as_secs() as i64,
        })
    }

    /// Valid only while its mirror entry exists and agrees with the claims.
    pub async fn validate_streaming_token(&self, token: &str) -> Result<StreamAccess> {
        let verified = self.signer.verify(token)?;

        let mirror = self
            .store
            .hash_get_all(&stream_token_key(&verified.jti))
            .await?
            .ok_or_else(|| AppError::VideoAccess("Streaming token expired or revoked".into()))?;

        if !mirror_matches(&mirror, &verified.claims) {
            tracing::warn!("Streaming token {} disagrees with its mirror entry", verified.jti);
            return Err(AppError::VideoAccess("Invalid streaming token".into()));
        }

        Ok(StreamAccess {
            video_id: verified.claims.video_id,
            user_id: verified.claims.user_id,
            expires_at: verified.expires_at,
        })
    }

    /// Revoke a streaming token held by `user_id`. Returns false if it was
    /// already expired or revoked.
    pub async fn revoke(&self, token: &str, user_id: &str) -> Result<bool> {
        let verified = self.signer.verify(token)?;
        if verified.claims.user_id != user_id {
            return Err(AppError::VideoAccess("Token belongs to another user".into()));
        }

        let removed = self.store.delete(&stream_token_key(&verified.jti)).await?;
        if removed {
            tracing::info!("Revoked streaming token {}", verified.jti);
        }
        Ok(removed)
    }

    pub async fn issue_download_token(&self, grant: &EntitlementGrant) -> Result<IssuedToken> {
        let id = random_url_token();
        let payload = serde_json::to_string(&DownloadAccess {
            video_id: grant.video_id().to_string(),
            user_id: grant.user_id().to_string(),
        })?;

        self.store
            .set(&download_token_key(&id), &payload, self.download_ttl)
            .await?;

        Ok(IssuedToken {
            token: id,
            expires_at: Utc::now().timestamp() + self.download_ttl.as_secs() as i64,
        })
    }

    /// Single use: the entry is read and deleted atomically, so of two
    /// concurrent redeemers exactly one succeeds.
    pub async fn redeem_download_token(&self, id: &str) -> Result<DownloadAccess> {
        let payload = self
            .store
            .take(&download_token_key(id))
            .await?
            .ok_or_else(|| AppError::VideoAccess("Download token invalid or already used".into()))?;

        Ok(serde_json::from_str(&payload)?)
    }
}

fn mirror_matches(mirror: &HashMap<String, String>, claims: &StreamClaims) -> bool {
    mirror.get("video_id") == Some(&claims.video_id) && mirror.get("user_id") == Some(&claims.user_id)
}
