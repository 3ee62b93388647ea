use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::api::types::{FlagEvaluationOptions, ResolvedFlag};
use crate::utils::clock::Clock;

/// Identity plus context of one flags request. Two requests with the same
/// context compare and hash equal regardless of map iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureFlagCacheKey {
    pub distinct_id: String,
    groups: Option<String>,
    person_properties: Option<String>,
    group_properties: Option<String>,
}

impl FeatureFlagCacheKey {
    pub fn new(distinct_id: &str, options: &FlagEvaluationOptions) -> Self {
        FeatureFlagCacheKey {
            distinct_id: distinct_id.to_string(),
            groups: canonical_json(options.groups.as_ref()),
            person_properties: canonical_json(options.person_properties.as_ref()),
            group_properties: canonical_json(options.group_properties.as_ref()),
        }
    }
}

fn canonical_json<T: Serialize>(value: Option<&T>) -> Option<String> {
    let value = serde_json::to_value(value?).ok()?;
    Some(sort_keys(value).to_string())
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureFlagCacheEntry {
    /// `None` when the request that produced this entry failed.
    pub flags: Option<HashMap<String, ResolvedFlag>>,
    pub timestamp: u64,
    pub expires_at: u64,
    pub request_id: Option<String>,
    pub evaluated_at: Option<u64>,
    pub error: Option<String>,
}

impl FeatureFlagCacheEntry {
    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis >= self.expires_at
    }
}

/// What a remote flags call produced, ready to be cached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedFlags {
    pub flags: Option<HashMap<String, ResolvedFlag>>,
    pub request_id: Option<String>,
    pub evaluated_at: Option<u64>,
    pub error: Option<String>,
}

/// LRU of remote flag results with a per-entry time to live.
///
/// Every operation takes the same lock. Expired entries are dropped lazily on
/// lookup; size pressure evicts the least recently used entry on insert.
pub struct FeatureFlagCache {
    entries: Mutex<LruCache<FeatureFlagCacheKey, FeatureFlagCacheEntry>>,
    max_age_ms: u64,
    clock: Arc<dyn Clock>,
}

impl FeatureFlagCache {
    pub fn new(max_size: usize, max_age_ms: u64, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        FeatureFlagCache {
            entries: Mutex::new(LruCache::new(capacity)),
            max_age_ms,
            clock,
        }
    }

    /// Cached flags for this context, if present and fresh. Touches recency.
    pub fn get(&self, key: &FeatureFlagCacheKey) -> Option<HashMap<String, ResolvedFlag>> {
        self.get_entry(key).and_then(|entry| entry.flags)
    }

    /// The whole entry, including the request id and error of the call that produced it.
    pub fn get_entry(&self, key: &FeatureFlagCacheKey) -> Option<FeatureFlagCacheEntry> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        purge_expired(&mut entries, now);
        entries.get(key).cloned()
    }

    pub fn put(&self, key: FeatureFlagCacheKey, flags: HashMap<String, ResolvedFlag>) {
        self.put_entry(
            key,
            CachedFlags {
                flags: Some(flags),
                ..Default::default()
            },
        );
    }

    pub fn put_entry(&self, key: FeatureFlagCacheKey, cached: CachedFlags) {
        let now = self.clock.now_millis();
        let entry = FeatureFlagCacheEntry {
            flags: cached.flags,
            timestamp: now,
            expires_at: now.saturating_add(self.max_age_ms),
            request_id: cached.request_id,
            evaluated_at: cached.evaluated_at,
            error: cached.error,
        };
        self.entries.lock().put(key, entry);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn purge_expired(
    entries: &mut LruCache<FeatureFlagCacheKey, FeatureFlagCacheEntry>,
    now_millis: u64,
) {
    let expired: Vec<FeatureFlagCacheKey> = entries
        .iter()
        .filter(|(_, entry)| entry.is_expired(now_millis))
        .map(|(key, _)| key.clone())
        .collect();
    for key in expired {
        entries.pop(&key);
    }
}
