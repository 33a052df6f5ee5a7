use crate::config::GenerateMode;
use crate::store::{KvStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::rc::Rc;

/// Key namespace for enhancement entries inside the shared store.
pub const CACHE_PREFIX: &str = "cache/";

const FIELD_SEPARATOR: u8 = 0x1f;

/// One cached enhancement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub generated_message: String,
    pub original_message: String,
    pub created_at: DateTime<Utc>,
    /// `None` never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub session_tag: String,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Deterministic cache key for an enhancement request.
///
/// SHA-256 over the 0x1F-separated request fields; nothing time-varying
/// goes in.
pub fn fingerprint(
    project_id: &str,
    original: &str,
    custom_prompt: &str,
    mode: GenerateMode,
    pattern: &str,
) -> String {
    let mut hasher = Sha256::new();
    for (i, field) in [project_id, original, custom_prompt, mode.as_str(), pattern]
        .iter()
        .enumerate()
    {
        if i > 0 {
            hasher.update([FIELD_SEPARATOR]);
        }
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Enhancement cache over a [`KvStore`], scoped to one session tag.
pub struct Cache {
    store: Rc<dyn KvStore>,
    session_tag: String,
}

impl Cache {
    pub fn new(store: Rc<dyn KvStore>, session_tag: impl Into<String>) -> Self {
        Self {
            store,
            session_tag: session_tag.into(),
        }
    }

    pub fn session_tag(&self) -> &str {
        &self.session_tag
    }

    fn store_key(key: &str) -> String {
        format!("{CACHE_PREFIX}{key}")
    }

    pub fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        self.get_at(key, Utc::now())
    }

    /// Look up `key` as of `now`. Expired entries are deleted and reported
    /// as absent; undecodable entries are reported as absent.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> StoreResult<Option<CacheEntry>> {
        let store_key = Self::store_key(key);
        let Some(bytes) = self.store.get(&store_key)? else {
            return Ok(None);
        };
        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key, error = %e, "ignoring undecodable cache entry");
                return Ok(None);
            }
        };
        if entry.is_expired(now) {
            self.store.delete(&store_key)?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub fn put(&self, key: &str, entry: &CacheEntry) -> StoreResult<()> {
        let store_key = Self::store_key(key);
        let bytes = serde_json::to_vec(entry).map_err(|source| StoreError::Encode {
            key: store_key.clone(),
            source,
        })?;
        self.store.put(&store_key, &bytes)
    }

    /// Remove every entry tagged with this cache's session tag. Entries of
    /// other sessions are left alone. Returns how many were removed.
    pub fn clear_session_cache(&self) -> StoreResult<usize> {
        let mut removed = 0;
        for (key, bytes) in self.store.scan_prefix(CACHE_PREFIX)? {
            let owned = serde_json::from_slice::<CacheEntry>(&bytes)
                .is_ok_and(|entry| entry.session_tag == self.session_tag);
            if owned {
                self.store.delete(&key)?;
                removed += 1;
            }
        }
        tracing::debug!(session_tag = %self.session_tag, removed, "cleared session cache");
        Ok(removed)
    }

    pub fn close(self) -> StoreResult<()> {
        self.store.flush()
    }
}
