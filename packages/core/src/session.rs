//! Session persistence and validation.
//!
//! The session store is the single source of truth for "is the user
//! authenticated". It owns the persisted token: `load` validates claims
//! and purges anything malformed or expired, `save` persists atomically,
//! `clear` logs out. Nothing here refreshes a token — an expired session
//! is observed by the backend rejecting a call, and the caller routes the
//! user back to the OTP flow.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

/// Durable key-value storage scoped to this device/app installation.
///
/// The core uses it only for the session token, but the interface is the
/// generic one the platform exposes.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> CoreResult<()>;

    /// Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> CoreResult<()>;
}

/// In-memory store for tests and previews.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> CoreResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// File-backed store: one JSON object in an app-owned file.
///
/// Writes go to a sibling temp file and then rename over the target, so a
/// `set` is atomic on the filesystem. All access is serialized through an
/// internal lock; a completed `set` is visible to the next `get`.
pub struct FileKeyValueStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_entries(&self) -> CoreResult<HashMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                serde_json::from_str(&raw).map_err(|e| CoreError::Storage(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(CoreError::Storage(e.to_string())),
        }
    }

    async fn write_entries(&self, entries: &HashMap<String, String>) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?;
        }
        let raw = serde_json::to_string(entries).map_err(|e| CoreError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_entries().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&entries).await
    }

    async fn remove(&self, key: &str) -> CoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        if entries.remove(key).is_some() {
            self.write_entries(&entries).await?;
        }
        Ok(())
    }
}

/// Claims we read out of the session token.
///
/// The client holds no signing key; claims are decoded without signature
/// verification and used only to derive expiry and subject locally. The
/// backend remains the authority on token validity.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    iat: Option<i64>,
}

fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .ok()
}

/// An authenticated session.
///
/// Either fully valid (non-expired token present) or absent — the store
/// never hands out a partially-populated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub subject_id: Option<String>,
}

impl Session {
    /// Derive a session from a token's claims. `None` if the token
    /// payload cannot be decoded at all.
    fn from_token(token: &str) -> Option<Self> {
        let claims = decode_claims(token)?;
        Some(Self {
            token: token.to_string(),
            issued_at: claims.iat.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            expires_at: claims.exp.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            subject_id: claims.sub.or(claims.user_id),
        })
    }

    /// A token without an `exp` claim never expires locally; the backend
    /// still rejects it once it is stale server-side.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }
}

/// Single source of truth for the authenticated session.
pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
    key: String,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// Read and validate the persisted session.
    ///
    /// Malformed and expired tokens are purged and reported as absent;
    /// bad data never surfaces as an error, only storage failures do.
    pub async fn load(&self) -> CoreResult<Option<Session>> {
        let Some(token) = self.storage.get(&self.key).await? else {
            return Ok(None);
        };

        match Session::from_token(&token) {
            Some(session) if !session.is_expired(Utc::now()) => Ok(Some(session)),
            Some(_) => {
                debug!("persisted session token expired, purging");
                self.storage.remove(&self.key).await?;
                Ok(None)
            }
            None => {
                warn!("persisted session token is malformed, purging");
                self.storage.remove(&self.key).await?;
                Ok(None)
            }
        }
    }

    /// Persist a fresh token, replacing any prior one.
    ///
    /// A token whose payload cannot be decoded is rejected without
    /// touching the stored value.
    pub async fn save(&self, token: &str) -> CoreResult<Session> {
        let session = Session::from_token(token)
            .ok_or_else(|| CoreError::validation("token", "session token is not decodable"))?;
        self.storage.set(&self.key, token).await?;
        debug!(expires_at = ?session.expires_at, "session saved");
        Ok(session)
    }

    /// Remove the persisted session. Idempotent.
    pub async fn clear(&self) -> CoreResult<()> {
        self.storage.remove(&self.key).await
    }

    /// The current session, or [`CoreError::SessionInvalid`] when absent.
    pub async fn require(&self) -> CoreResult<Session> {
        self.load().await?.ok_or(CoreError::SessionInvalid)
    }
}
