//! # Rating Cache
//!
//! In-memory `track id -> (rating, fetched at)` store sitting in front of the
//! rating service.
//!
//! ## Freshness
//!
//! An entry is served from memory only while caching is enabled *and* its age
//! is below `cache_duration` minutes. Both values are read from the
//! [`ConfigSource`] on every [`RatingCache::get`], so changing them affects the
//! very next lookup. Entries are never removed; a stale entry is treated
//! exactly like a missing one and gets replaced by the next fetch.
//!
//! ## Batching
//!
//! Each `get` issues at most one request, covering every stale or missing id
//! of that call. Calls are not coalesced with each other: two overlapping
//! lookups running at the same time each fetch their own stale set.
//!
//! The lock is only held while partitioning and while merging results, never
//! across the network call.

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigSource, Settings};
use crate::rating::{CacheEntry, Rating};
use crate::rating_client::{RatingSource, ServiceError};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

pub struct RatingCache {
    source: Arc<dyn RatingSource>,
    config: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl RatingCache {
    /// Create a cache using wall-clock time
    pub fn new(source: Arc<dyn RatingSource>, config: Arc<dyn ConfigSource>) -> Self {
        Self::with_clock(source, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        source: Arc<dyn RatingSource>,
        config: Arc<dyn ConfigSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            config,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve ratings for `track_ids`.
    ///
    /// Fresh entries are served from memory; everything else (or everything,
    /// when `ignore_cache` is set) is fetched in one batch. Ids the service
    /// doesn't return are recorded as unrated. The returned map holds exactly
    /// one rating per distinct requested id.
    ///
    /// # Errors
    ///
    /// Propagates the fetch failure. A failed batch leaves the cache untouched.
    pub fn get(&self, track_ids: &[String], ignore_cache: bool) -> Result<HashMap<String, Rating>, ServiceError> {
        let settings = self.config.settings();
        let (mut resolved, stale) = self.partition(track_ids, ignore_cache, &settings);

        if stale.is_empty() {
            debug!("All {} ratings served from cache", resolved.len());
            return Ok(resolved);
        }

        debug!("Fetching {} stale or missing ratings ({} cached)", stale.len(), resolved.len());
        let fetched = self.source.fetch_batch(&stale)?;
        let fetched_at = self.clock.now();

        // Records for ids nobody asked about are dropped
        let mut by_id: HashMap<String, Rating> = fetched
            .into_iter()
            .filter(|rating| stale.contains(&rating.track_id))
            .map(|rating| (rating.track_id.clone(), rating))
            .collect();
        for id in &stale {
            by_id.entry(id.clone()).or_insert_with(|| Rating::unrated(id.as_str()));
        }

        let mut entries = self.lock();
        for (id, rating) in by_id {
            resolved.insert(id.clone(), rating.clone());
            entries.insert(id, CacheEntry { rating, fetched_at });
        }

        Ok(resolved)
    }

    /// Look at an entry without fetching or checking freshness
    pub fn peek(&self, track_id: &str) -> Option<CacheEntry> {
        self.lock().get(track_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Split the request into served-from-memory ratings and ids to fetch
    fn partition(
        &self,
        track_ids: &[String],
        ignore_cache: bool,
        settings: &Settings,
    ) -> (HashMap<String, Rating>, Vec<String>) {
        let now = self.clock.now();
        let entries = self.lock();

        let mut fresh = HashMap::new();
        let mut stale = Vec::new();
        let mut seen = HashSet::new();

        for id in track_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            match entries.get(id) {
                Some(entry) if !ignore_cache && is_fresh(entry, settings, now) => {
                    fresh.insert(id.clone(), entry.rating.clone());
                }
                _ => stale.push(id.clone()),
            }
        }

        (fresh, stale)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        // Entries are replaced whole, a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Whether `entry` may be served without a re-fetch
pub fn is_fresh(entry: &CacheEntry, settings: &Settings, now: SystemTime) -> bool {
    if !settings.enable_cache {
        return false;
    }
    // A clock that went backwards makes the entry look brand new
    let age = now.duration_since(entry.fetched_at).unwrap_or_default();
    age < settings.cache_ttl()
}
