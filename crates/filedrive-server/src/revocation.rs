//! In-memory deny-list for credentials revoked by logout.
//!
//! Entries are keyed by credential id and live until the credential would
//! have expired anyway. The list is process-local: a restart forgets it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct RevocationList {
    /// Cache: credential id -> original expiry.
    entries: Arc<RwLock<HashMap<Uuid, DateTime<Utc>>>>,
}

impl RevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny `jti` until `expires_at`. Already-expired credentials are not stored.
    pub async fn revoke(&self, jti: Uuid, expires_at: DateTime<Utc>) {
        if expires_at <= Utc::now() {
            return;
        }
        self.entries.write().await.insert(jti, expires_at);
        debug!(jti = %jti, until = %expires_at, "credential revoked");
    }

    pub async fn is_revoked(&self, jti: Uuid) -> bool {
        self.entries.read().await.contains_key(&jti)
    }

    /// Remove entries whose credentials have expired on their own.
    pub async fn purge_expired(&self) {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Purged expired revocations");
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
