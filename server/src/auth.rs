//! Bearer-token authentication and the on-disk token store.
//!
//! Exactly one credential exists: a hex SHA-256 digest of the shared bearer
//! token, stored under `auth.tokenHash` in the JSON config file. HTTP
//! requests present the plain token as `Authorization: Bearer <token>`;
//! WebSocket upgrades pass it as the `?token=` query parameter (browsers
//! can't set headers on WebSocket upgrades). Both paths go through
//! [`TokenStore::verify`] and therefore agree.
//!
//! The auth bootstrap endpoints (`status`, `init`, `verify`, rotate) are
//! never themselves token-gated; everything else runs behind
//! [`require_token`].

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::{AuthSection, ConfigStore};
use crate::routes::ApiError;
use crate::state::AppState;

/// Minimum accepted token length.
const MIN_TOKEN_LEN: usize = 8;

/// File name of the pre-JSON token store, a bare hex digest on one line.
const LEGACY_TOKEN_FILE: &str = ".clicast-token";

/// Failures of the token store operations, mapped to HTTP by [`ApiError`].
#[derive(Debug, PartialEq, Eq)]
pub enum TokenError {
    /// `init` was called but a token hash already exists.
    AlreadyExists,
    /// The submitted token is shorter than [`MIN_TOKEN_LEN`].
    WeakToken,
    /// The submitted token does not match the stored hash.
    Unauthorized,
    /// Config file I/O failed.
    Io(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::AlreadyExists => write!(f, "A token is already configured"),
            TokenError::WeakToken => {
                write!(f, "Token must be at least {MIN_TOKEN_LEN} characters")
            }
            TokenError::Unauthorized => write!(f, "Invalid token"),
            TokenError::Io(e) => write!(f, "Token store I/O error: {e}"),
        }
    }
}

/// Compute the hex SHA-256 digest of a plain token.
pub fn hash_token(plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plain.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
///
/// Always iterates over the full length of `expected` regardless of
/// `provided` length, so response times don't leak where the mismatch is.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for i in 0..expected.len() {
        let p = if i < provided.len() {
            provided[i]
        } else {
            0xff
        };
        diff |= expected[i] ^ p;
    }
    diff == 0
}

/// The single-credential token store, backed by the config file.
///
/// Cloneable — all clones share the same [`ConfigStore`].
#[derive(Clone)]
pub struct TokenStore {
    config: Arc<ConfigStore>,
}

impl TokenStore {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    /// Whether a token hash is present.
    pub async fn status(&self) -> bool {
        self.ensure_migrated().await;
        self.config.get().await.auth.is_some()
    }

    /// First-time token creation. Fails when a hash already exists or the
    /// token is too short.
    pub async fn init(&self, plain: &str) -> Result<(), TokenError> {
        self.ensure_migrated().await;
        if plain.len() < MIN_TOKEN_LEN {
            return Err(TokenError::WeakToken);
        }
        if self.config.get().await.auth.is_some() {
            return Err(TokenError::AlreadyExists);
        }
        let hash = hash_token(plain);
        self.config
            .update(|c| c.auth = Some(AuthSection { token_hash: hash }))
            .await
            .map_err(|e| TokenError::Io(e.to_string()))?;
        info!("Auth token initialized");
        Ok(())
    }

    /// Constant-time check of a plain token against the stored hash.
    /// Always false when no hash is configured.
    pub async fn verify(&self, plain: &str) -> bool {
        self.ensure_migrated().await;
        match self.config.get().await.auth {
            Some(auth) => {
                constant_time_eq(auth.token_hash.as_bytes(), hash_token(plain).as_bytes())
            }
            None => false,
        }
    }

    /// Replace the stored hash after proving possession of the current token.
    pub async fn rotate(&self, current: &str, next: &str) -> Result<(), TokenError> {
        if !self.verify(current).await {
            return Err(TokenError::Unauthorized);
        }
        if next.len() < MIN_TOKEN_LEN {
            return Err(TokenError::WeakToken);
        }
        let hash = hash_token(next);
        self.config
            .update(|c| c.auth = Some(AuthSection { token_hash: hash }))
            .await
            .map_err(|e| TokenError::Io(e.to_string()))?;
        info!("Auth token rotated");
        Ok(())
    }

    /// Remove the `auth` subtree entirely.
    pub async fn clear(&self) -> Result<(), TokenError> {
        self.config
            .update(|c| c.auth = None)
            .await
            .map_err(|e| TokenError::Io(e.to_string()))?;
        info!("Auth token cleared");
        Ok(())
    }

    /// One-shot migration of a legacy `.clicast-token` digest file into the
    /// JSON config. Only runs when the JSON has no `auth` entry — once the
    /// JSON carries a hash, it is authoritative and the legacy file is
    /// ignored.
    async fn ensure_migrated(&self) {
        if self.config.get().await.auth.is_some() {
            return;
        }
        let legacy = self.config.dir().join(LEGACY_TOKEN_FILE);
        let Ok(contents) = std::fs::read_to_string(&legacy) else {
            return;
        };
        let digest = contents.trim();
        if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            warn!("Ignoring malformed legacy token file {}", legacy.display());
            return;
        }
        let digest = digest.to_ascii_lowercase();
        match self
            .config
            .update(|c| {
                if c.auth.is_none() {
                    c.auth = Some(AuthSection { token_hash: digest });
                }
            })
            .await
        {
            Ok(_) => info!("Migrated legacy token file {}", legacy.display()),
            Err(e) => warn!("Failed to migrate legacy token file: {e}"),
        }
    }
}

/// Extract the plain token from an `Authorization: Bearer` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Axum middleware that rejects requests without a valid bearer token.
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = match bearer_token(request.headers()) {
        Some(t) => t,
        None => return ApiError::Unauthorized.into_response(),
    };
    if !state.tokens.verify(provided).await {
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

/// Hex-encode a byte slice (avoids pulling in the `hex` crate).
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().fold(
            String::with_capacity(bytes.as_ref().len() * 2),
            |mut s, b| {
                use std::fmt::Write;
                let _ = write!(s, "{b:02x}");
                s
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_store() -> (TokenStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("clicast-auth-{}", Uuid::new_v4()));
        let config = ConfigStore::open(dir.join("config.json")).unwrap();
        (TokenStore::new(Arc::new(config)), dir)
    }

    #[test]
    fn hash_is_hex_sha256() {
        let hash = hash_token("correcthorse");
        assert_eq!(hash.len(), 64);
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
        // Deterministic and input-sensitive.
        assert_eq!(hash, hash_token("correcthorse"));
        assert_ne!(hash, hash_token("correcthorsf"));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(!constant_time_eq(b"secret", b"secrex"));
        assert!(!constant_time_eq(b"secret", b""));
        assert!(constant_time_eq(b"", b""));
    }

    #[tokio::test]
    async fn init_verify_round_trip() {
        let (store, _dir) = temp_store();
        assert!(!store.status().await);
        assert!(!store.verify("correcthorse").await);

        store.init("correcthorse").await.unwrap();
        assert!(store.status().await);
        assert!(store.verify("correcthorse").await);
        assert!(!store.verify("wrong-token").await);
    }

    #[tokio::test]
    async fn init_rejects_weak_and_duplicate() {
        let (store, _dir) = temp_store();
        assert_eq!(store.init("short").await, Err(TokenError::WeakToken));
        store.init("correcthorse").await.unwrap();
        assert_eq!(
            store.init("othertoken").await,
            Err(TokenError::AlreadyExists)
        );
    }

    #[tokio::test]
    async fn rotate_swaps_credential() {
        let (store, _dir) = temp_store();
        store.init("correcthorse").await.unwrap();

        assert_eq!(
            store.rotate("wrong", "batterystaple").await,
            Err(TokenError::Unauthorized)
        );
        assert_eq!(
            store.rotate("correcthorse", "tiny").await,
            Err(TokenError::WeakToken)
        );

        store.rotate("correcthorse", "batterystaple").await.unwrap();
        assert!(store.verify("batterystaple").await);
        assert!(!store.verify("correcthorse").await);
    }

    #[tokio::test]
    async fn clear_removes_credential() {
        let (store, _dir) = temp_store();
        store.init("correcthorse").await.unwrap();
        store.clear().await.unwrap();
        assert!(!store.status().await);
        assert!(!store.verify("correcthorse").await);
    }

    #[tokio::test]
    async fn migrates_legacy_token_file() {
        let (store, dir) = temp_store();
        let digest = hash_token("legacytoken");
        std::fs::write(dir.join(LEGACY_TOKEN_FILE), format!("{digest}\n")).unwrap();

        assert!(store.status().await);
        assert!(store.verify("legacytoken").await);
    }

    #[tokio::test]
    async fn json_config_beats_legacy_file() {
        let (store, dir) = temp_store();
        store.init("correcthorse").await.unwrap();
        std::fs::write(dir.join(LEGACY_TOKEN_FILE), hash_token("legacytoken")).unwrap();

        assert!(store.verify("correcthorse").await);
        assert!(!store.verify("legacytoken").await);
    }

    #[tokio::test]
    async fn malformed_legacy_file_ignored() {
        let (store, dir) = temp_store();
        std::fs::write(dir.join(LEGACY_TOKEN_FILE), "not a digest").unwrap();
        assert!(!store.status().await);
    }
}
