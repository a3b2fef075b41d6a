//! Decision cache
//!
//! An in-memory LRU in front of the durable store, keyed by
//! (url, mission fingerprint). Because the fingerprint is part of the key, a
//! mission change turns every old entry into a miss without touching storage.
//! Store failures are logged and otherwise ignored: caching is best effort.

use crate::features::FeatureVector;
use crate::mission::Fingerprint;
use crate::storage::{DecisionStore, FeatureBlob};
use crate::types::{Decision, DecisionId, DecisionState};
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

type CacheKey = (String, Fingerprint);

/// Write-through cache over a [`DecisionStore`]
pub struct DecisionCache {
    store: Arc<dyn DecisionStore>,
    front: Mutex<LruCache<CacheKey, Decision>>,
    /// Decisions with feedback whose store row may not say so yet
    retired: Mutex<LruCache<DecisionId, ()>>,
    ttl: chrono::Duration,
}

impl DecisionCache {
    pub fn new(store: Arc<dyn DecisionStore>, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            front: Mutex::new(LruCache::new(capacity)),
            retired: Mutex::new(LruCache::new(capacity)),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
        }
    }

    fn front(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, Decision>> {
        self.front.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn retired(&self) -> std::sync::MutexGuard<'_, LruCache<DecisionId, ()>> {
        self.retired.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Valid entry for the key, or `None`. Expired entries and decisions with feedback are misses.
    pub async fn get(&self, url: &str, fingerprint: &Fingerprint, now: DateTime<Utc>) -> Option<Decision> {
        let key = (url.to_string(), fingerprint.clone());

        let hit = {
            let mut front = self.front();
            match front.get(&key) {
                Some(d) if !d.is_expired(self.ttl, now) && !self.retired().contains(&d.id) => Some(d.clone()),
                Some(_) => {
                    front.pop(&key);
                    None
                }
                None => None,
            }
        };
        if hit.is_some() {
            return hit;
        }

        match self.store.get_decision(url, fingerprint).await {
            Ok(Some(stored))
                if stored.state != DecisionState::FedBack
                    && !stored.decision.is_expired(self.ttl, now)
                    && !self.retired().contains(&stored.decision.id) =>
            {
                debug!(url, "Decision cache hit from store");
                self.front().put(key, stored.decision.clone());
                Some(stored.decision)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(url, "Decision cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    /// Write-through. Returns whether the durable write succeeded.
    pub async fn put(&self, decision: &Decision, features: Option<&FeatureVector>) -> bool {
        let key = (decision.url.clone(), decision.mission_fingerprint.clone());
        self.front().put(key, decision.clone());

        let blob = features.map(FeatureBlob::from_vector);
        match self
            .store
            .put_decision(decision, DecisionState::Cached, blob.as_ref())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(url = %decision.url, "Decision cache write failed: {}", e);
                false
            }
        }
    }

    /// Retire a decision that received feedback. It is never served again,
    /// even before the store row is marked fed back.
    pub fn invalidate(&self, decision: &Decision) {
        self.retired().put(decision.id, ());
        self.front()
            .pop(&(decision.url.clone(), decision.mission_fingerprint.clone()));
    }

    /// Eagerly drop entries of every mission except `current`
    pub async fn purge_other_missions(&self, current: &Fingerprint) -> usize {
        {
            let mut front = self.front();
            let stale: Vec<CacheKey> = front
                .iter()
                .filter(|((_, fp), _)| fp != current)
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                front.pop(&key);
            }
        }

        match self.store.purge_other_missions(current).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to purge stale decisions: {}", e);
                0
            }
        }
    }

    /// Delete durable entries older than the TTL
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        match self.store.purge_expired(now - self.ttl).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to purge expired decisions: {}", e);
                0
            }
        }
    }

    pub fn len(&self) -> usize {
        self.front().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
