//! Two-level single-flight cache: container settings per container and
//! resolved client encryption keys per key id.
//!
//! Entries are memoized until invalidated. A container deleted and recreated
//! under the same id keeps serving the old settings until
//! [`EncryptionCache::invalidate_container`] is called.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::key_store::ResolvedKey;
use crate::settings::ContainerSettings;

/// Read-only view of cache contents.
#[cfg(test)]
pub(crate) trait CacheInspect {
    /// Number of entries, resolved or in flight.
    fn len(&self) -> usize;
    /// Entry keys, sorted.
    fn keys(&self) -> Vec<String>;
}

// ============================================================================
// AsyncCache
// ============================================================================

struct Resolved<V> {
    value: V,
    resolved_at: Instant,
}

type Slot<V> = Arc<OnceCell<Resolved<V>>>;

/// Async memoization keyed by string.
///
/// The first caller for a key runs the fetch; concurrent callers for the same
/// key await that fetch. Distinct keys resolve in parallel. A failed fetch
/// drops its slot so the next caller retries and misses do not accumulate.
pub struct AsyncCache<V> {
    name: &'static str,
    slots: Mutex<HashMap<String, Slot<V>>>,
    /// Age after which a resolved entry is fetched again.
    ttl: Option<Duration>,
}

impl<V: Clone + Send + Sync> AsyncCache<V> {
    pub fn new(name: &'static str, ttl: Option<Duration>) -> Self {
        Self {
            name,
            slots: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn slot(&self, key: &str) -> Slot<V> {
        let mut slots = self.slots.lock();
        let expired = match (slots.get(key), self.ttl) {
            (Some(slot), Some(ttl)) => slot
                .get()
                .is_some_and(|resolved| resolved.resolved_at.elapsed() >= ttl),
            _ => false,
        };
        if expired {
            debug!(cache = self.name, key, "entry expired");
            slots.remove(key);
        }
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Return the cached value for `key`, running `fetch` on a miss.
    pub async fn get_or_try_init<F, Fut>(&self, key: &str, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let slot = self.slot(key);
        let outcome = slot
            .get_or_try_init(|| async move {
                debug!(cache = self.name, key, "cache miss, fetching");
                let value = fetch().await?;
                Ok::<_, crate::error::EncryptionError>(Resolved {
                    value,
                    resolved_at: Instant::now(),
                })
            })
            .await;
        match outcome {
            Ok(resolved) => Ok(resolved.value.clone()),
            Err(err) => {
                self.discard_empty(key, &slot);
                Err(err)
            }
        }
    }

    /// Remove `slot` after a failed fetch unless it was replaced or a retry
    /// has since filled it.
    fn discard_empty(&self, key: &str, slot: &Slot<V>) {
        let mut slots = self.slots.lock();
        if slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized())
        {
            slots.remove(key);
        }
    }

    /// Drop one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.slots.lock().remove(key).is_some();
        if removed {
            debug!(cache = self.name, key, "entry invalidated");
        }
        removed
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

#[cfg(test)]
impl<V> CacheInspect for AsyncCache<V> {
    fn len(&self) -> usize {
        self.slots.lock().len()
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.slots.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

// ============================================================================
// EncryptionCache
// ============================================================================

struct CacheState {
    containers: AsyncCache<Arc<ContainerSettings>>,
    keys: AsyncCache<Arc<ResolvedKey>>,
}

/// Container settings and key caches shared by every client built with a
/// clone of the same `EncryptionCache`.
///
/// Keys: `"{databaseId}/{containerId}"` for containers and
/// `"{databaseId}/{keyId}"` for client encryption keys.
#[derive(Clone)]
pub struct EncryptionCache {
    state: Arc<CacheState>,
}

impl Default for EncryptionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptionCache {
    /// Cache whose entries live until invalidated.
    pub fn new() -> Self {
        Self::with_key_ttl(None)
    }

    /// Cache whose resolved keys are fetched again once older than `ttl`.
    pub fn with_key_ttl(ttl: Option<Duration>) -> Self {
        Self {
            state: Arc::new(CacheState {
                containers: AsyncCache::new("containers", None),
                keys: AsyncCache::new("keys", ttl),
            }),
        }
    }

    pub(crate) fn containers(&self) -> &AsyncCache<Arc<ContainerSettings>> {
        &self.state.containers
    }

    pub(crate) fn keys(&self) -> &AsyncCache<Arc<ResolvedKey>> {
        &self.state.keys
    }

    /// Forget a container's settings, e.g. after it was recreated.
    pub fn invalidate_container(&self, database_id: &str, container_id: &str) -> bool {
        self.state
            .containers
            .invalidate(&format!("{}/{}", database_id, container_id))
    }

    /// Forget a resolved client encryption key.
    pub fn invalidate_client_encryption_key(&self, database_id: &str, key_id: &str) -> bool {
        self.state
            .keys
            .invalidate(&format!("{}/{}", database_id, key_id))
    }

    pub fn clear(&self) {
        self.state.containers.clear();
        self.state.keys.clear();
    }

    /// Whether two handles share the same underlying caches.
    pub fn ptr_eq(&self, other: &EncryptionCache) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}
