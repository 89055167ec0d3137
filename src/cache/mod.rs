// Short-TTL response cache shared by every adapter in the process.
//
// Entries are serialized response bodies, immutable once written; they age
// out rather than being updated, so concurrent ticks from multiple widget
// instances can read freely. The TTL sits below the poll interval, which
// makes the cache a per-tick deduplicator, not a staleness source.
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Sweep threshold; the map is tiny in normal operation
const MAX_ENTRIES: usize = 1024;

struct Entry {
    body: String,
    inserted_at: DateTime<Utc>,
}

pub struct ResponseCache {
    ttl: ChronoDuration,
    entries: RwLock<HashMap<String, Entry>>,
}

/// Cache key convention: `{provider}:{endpoint_shape}:{params-joined-by-:}`.
/// The provider namespace prevents cross-adapter collisions.
pub fn cache_key(provider: &str, endpoint: &str, params: &[&str]) -> String {
    format!("{}:{}:{}", provider, endpoint, params.join(":"))
}

impl ResponseCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: ChronoDuration::seconds(ttl_secs as i64),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get a cached response, deserialized. Expired entries read as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if Utc::now() - entry.inserted_at >= self.ttl {
            return None;
        }
        match serde_json::from_str(&entry.body) {
            Ok(value) => {
                debug!(key, "response cache hit");
                Some(value)
            }
            Err(_) => None,
        }
    }

    /// Store a response body. Existing live entries are left alone; a caller
    /// racing another widget's identical request simply keeps the first write.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) {
        let body = match serde_json::to_string(value) {
            Ok(body) => body,
            Err(_) => return,
        };

        let mut entries = self.entries.write().await;
        let now = Utc::now();
        if let Some(existing) = entries.get(key) {
            if now - existing.inserted_at < self.ttl {
                return;
            }
        }

        if entries.len() >= MAX_ENTRIES {
            let ttl = self.ttl;
            let before = entries.len();
            entries.retain(|_, e| now - e.inserted_at < ttl);
            debug!(
                evicted = before.saturating_sub(entries.len()),
                "response cache sweep"
            );
        }

        entries.insert(
            key.to_string(),
            Entry {
                body,
                inserted_at: now,
            },
        );
    }

}
