use serde::{Deserialize, Serialize};

/// Value of the `kind` claim on streaming tokens.
pub const STREAM_TOKEN_KIND: &str = "stream";

/// Custom claims carried by a streaming token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamClaims {
    pub video_id: String,
    pub user_id: String,
    pub kind: String,
}

impl StreamClaims {
    pub fn new(video_id: &str, user_id: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            user_id: user_id.to_string(),
            kind: STREAM_TOKEN_KIND.to_string(),
        }
    }
}

/// A streaming token whose signature checked out. Says nothing about whether
/// it is still live; that is decided by the store mirror.
#[derive(Debug, Clone)]
pub struct VerifiedStreamToken {
    pub claims: StreamClaims,
    pub jti: String,
    pub expires_at: Option<i64>,
}
