//! Two-tier schema cache.
//!
//! One fixed key per process holds the full [`SchemaSnapshot`]. Reads try the
//! external tier, then the in-process slot, then introspect. A fresh snapshot
//! is stored in the external tier when it accepts the write, otherwise in the
//! local slot; the two tiers are never both written by one fill.
//!
//! External tier failures are logged and absorbed. Only introspection errors
//! reach the caller.
//!
//! Concurrent misses may both introspect; the last store wins.

pub mod remote;

pub use remote::{RedisCache, RemoteCache};

use crate::db::schema::SchemaSource;
use crate::error::DbResult;
use crate::models::{DatabaseType, SchemaSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Cache key for a target database.
pub fn cache_key(db_type: DatabaseType, target_label: &str) -> String {
    format!("db-gateway:schema:{}:{}", db_type.tag(), target_label)
}

pub struct SchemaCache {
    source: Arc<dyn SchemaSource>,
    remote: Option<Arc<dyn RemoteCache>>,
    local: RwLock<Option<Arc<SchemaSnapshot>>>,
    key: String,
    ttl: Duration,
}

impl SchemaCache {
    pub fn new(source: Arc<dyn SchemaSource>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            source,
            remote: None,
            local: RwLock::new(None),
            key: key.into(),
            ttl,
        }
    }

    /// Enable the external tier.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteCache>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Return the cached snapshot, introspecting on a full miss.
    pub async fn get_full_schema(&self) -> DbResult<Arc<SchemaSnapshot>> {
        if let Some(snapshot) = self.read_remote().await {
            debug!(key = %self.key, "Schema cache hit (remote)");
            return Ok(snapshot);
        }

        if let Some(snapshot) = self.local.read().await.clone() {
            debug!(key = %self.key, "Schema cache hit (local)");
            return Ok(snapshot);
        }

        info!(key = %self.key, "Schema cache miss, introspecting");
        let snapshot = Arc::new(self.source.introspect().await?);
        self.store(&snapshot).await;
        Ok(snapshot)
    }

    /// Drop the cached snapshot from both tiers.
    pub async fn invalidate(&self) {
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(&self.key).await {
                warn!(key = %self.key, error = %e, "Failed to delete remote schema cache entry");
            }
        }
        *self.local.write().await = None;
        info!(key = %self.key, "Schema cache invalidated");
    }

    async fn read_remote(&self) -> Option<Arc<SchemaSnapshot>> {
        let remote = self.remote.as_ref()?;
        let raw = match remote.get(&self.key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Remote schema cache read failed");
                return None;
            }
        };
        match serde_json::from_str::<SchemaSnapshot>(&raw) {
            Ok(snapshot) => Some(Arc::new(snapshot)),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Remote schema cache entry is corrupt");
                None
            }
        }
    }

    async fn store(&self, snapshot: &Arc<SchemaSnapshot>) {
        if let Some(remote) = &self.remote {
            match serde_json::to_string(snapshot.as_ref()) {
                Ok(json) => match remote.set_with_ttl(&self.key, &json, self.ttl).await {
                    Ok(()) => {
                        debug!(key = %self.key, ttl_secs = self.ttl.as_secs(), "Schema stored in remote cache");
                        return;
                    }
                    Err(e) => {
                        warn!(key = %self.key, error = %e, "Remote schema cache write failed, keeping local copy");
                    }
                },
                Err(e) => warn!(error = %e, "Failed to encode schema snapshot"),
            }
        }
        *self.local.write().await = Some(Arc::clone(snapshot));
    }
}
