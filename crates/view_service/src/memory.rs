//! In-process implementations of the storage seams, backed by DashMap.
//!
//! Used for local development (`STORE_BACKEND=memory`) and by the test
//! suite. Increment atomicity comes from mutating the row while holding the
//! DashMap shard entry, so concurrent callers never lose updates.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::error::Result;
use crate::traits::{FilterStore, ViewCountCache, ViewStore};
use crate::types::{
    canonical_listing_id, day_bucket, hour_bucket, legacy_listing_id, parse_aggregate_id,
    EntityType, TrendingEntry, ViewMetadata, ViewTracking,
};

/// In-memory durable counter store.
pub struct MemoryViewStore {
    rows: DashMap<(EntityType, String), ViewTracking>,
    track_metadata: bool,
}

impl MemoryViewStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            track_metadata: true,
        }
    }

    pub fn with_metadata(track_metadata: bool) -> Self {
        Self {
            rows: DashMap::new(),
            track_metadata,
        }
    }

    /// Resolve the row key for a listing id: canonical when the canonical row
    /// exists (or nothing exists yet), legacy only when a pre-normalization
    /// row is still around. Keeps one live row per logical listing.
    fn resolve_key(&self, entity_type: EntityType, listing_id: &str) -> String {
        let canonical = canonical_listing_id(listing_id);
        if self.rows.contains_key(&(entity_type, canonical.clone())) {
            return canonical;
        }
        if let Some(legacy) = legacy_listing_id(listing_id) {
            if self.rows.contains_key(&(entity_type, legacy.clone())) {
                return legacy;
            }
        }
        canonical
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl Default for MemoryViewStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ViewStore for MemoryViewStore {
    async fn increment_view(
        &self,
        entity_type: EntityType,
        listing_id: &str,
        viewer: Option<&str>,
    ) -> Result<ViewTracking> {
        let key = self.resolve_key(entity_type, listing_id);
        let now = Utc::now().timestamp_millis();

        let mut entry = self
            .rows
            .entry((entity_type, key.clone()))
            .or_insert_with(|| ViewTracking::new(entity_type, &key, now));

        entry.view_count += 1;
        entry.last_viewed_at = now;
        entry.updated_at = now;
        if self.track_metadata {
            let metadata = entry.metadata.get_or_insert_with(ViewMetadata::default);
            *metadata.hourly.entry(hour_bucket(now)).or_insert(0) += 1;
            *metadata.daily.entry(day_bucket(now)).or_insert(0) += 1;
            if let Some(viewer) = viewer {
                metadata.viewers.insert(viewer.to_string());
            }
        }

        Ok(entry.clone())
    }

    async fn get_view_count(&self, entity_type: EntityType, listing_id: &str) -> Result<i64> {
        let key = self.resolve_key(entity_type, listing_id);
        Ok(self
            .rows
            .get(&(entity_type, key))
            .map(|row| row.view_count)
            .unwrap_or(0))
    }

    async fn find_by_entity_and_listing(
        &self,
        entity_type: EntityType,
        listing_id: &str,
    ) -> Result<Option<ViewTracking>> {
        let key = self.resolve_key(entity_type, listing_id);
        Ok(self.rows.get(&(entity_type, key)).map(|row| row.clone()))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ViewTracking>> {
        let Some((entity_type, listing_id)) = parse_aggregate_id(id) else {
            return Ok(None);
        };
        self.find_by_entity_and_listing(entity_type, listing_id).await
    }

    async fn get_bulk_view_counts(
        &self,
        entity_type: EntityType,
        listing_ids: &[String],
    ) -> Result<HashMap<String, i64>> {
        let mut counts = HashMap::new();
        for raw in listing_ids {
            let canonical = canonical_listing_id(raw);
            let key = self.resolve_key(entity_type, raw);
            let count = self
                .rows
                .get(&(entity_type, key))
                .map(|row| row.view_count)
                .unwrap_or(0);
            counts.insert(canonical, count);
        }
        Ok(counts)
    }

    async fn get_top_trending(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> Result<Vec<ViewTracking>> {
        let mut rows: Vec<ViewTracking> = self
            .rows
            .iter()
            .filter(|entry| entity_type.map_or(true, |e| entry.key().0 == e))
            .map(|entry| entry.value().clone())
            .collect();

        rows.sort_by(|a, b| {
            b.view_count
                .cmp(&a.view_count)
                .then_with(|| b.last_viewed_at.cmp(&a.last_viewed_at))
        });
        rows.truncate(limit);
        Ok(rows)
    }
}

/// In-memory cache with per-entry expiry.
pub struct MemoryCache {
    counts: DashMap<String, (i64, Instant)>,
    trending: DashMap<String, (Vec<TrendingEntry>, Instant)>,
    count_ttl: Duration,
    trending_ttl: Duration,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
            trending: DashMap::new(),
            count_ttl: Duration::from_secs(60),
            trending_ttl: Duration::from_secs(300),
        }
    }

    fn count_key(entity_type: EntityType, listing_id: &str) -> String {
        format!("viewcount:{entity_type}:{listing_id}")
    }

    fn trending_key(entity_type: Option<EntityType>, limit: usize) -> String {
        let scope = entity_type.map_or("all".to_string(), |e| e.to_string());
        format!("trending:{scope}:{limit}")
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ViewCountCache for MemoryCache {
    async fn get_view_count(
        &self,
        entity_type: EntityType,
        listing_id: &str,
    ) -> Result<Option<i64>> {
        let key = Self::count_key(entity_type, listing_id);
        let now = Instant::now();
        if let Some(entry) = self.counts.get(&key) {
            if entry.1 > now {
                return Ok(Some(entry.0));
            }
        }
        self.counts.remove_if(&key, |_, (_, deadline)| *deadline <= now);
        Ok(None)
    }

    async fn set_view_count(
        &self,
        entity_type: EntityType,
        listing_id: &str,
        count: i64,
    ) -> Result<()> {
        let key = Self::count_key(entity_type, listing_id);
        self.counts.insert(key, (count, Instant::now() + self.count_ttl));
        Ok(())
    }

    async fn get_bulk_view_counts(
        &self,
        entity_type: EntityType,
        listing_ids: &[String],
    ) -> Result<HashMap<String, i64>> {
        let mut hits = HashMap::new();
        for listing_id in listing_ids {
            if let Some(count) = self.get_view_count(entity_type, listing_id).await? {
                hits.insert(listing_id.clone(), count);
            }
        }
        Ok(hits)
    }

    async fn set_bulk_view_counts(
        &self,
        entity_type: EntityType,
        counts: &HashMap<String, i64>,
    ) -> Result<()> {
        for (listing_id, count) in counts {
            self.set_view_count(entity_type, listing_id, *count).await?;
        }
        Ok(())
    }

    async fn get_trending(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> Result<Option<Vec<TrendingEntry>>> {
        let key = Self::trending_key(entity_type, limit);
        let now = Instant::now();
        if let Some(entry) = self.trending.get(&key) {
            if entry.1 > now {
                return Ok(Some(entry.0.clone()));
            }
        }
        self.trending.remove_if(&key, |_, (_, deadline)| *deadline <= now);
        Ok(None)
    }

    async fn set_trending(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
        entries: &[TrendingEntry],
    ) -> Result<()> {
        let key = Self::trending_key(entity_type, limit);
        self.trending
            .insert(key, (entries.to_vec(), Instant::now() + self.trending_ttl));
        Ok(())
    }

    async fn invalidate_listing(&self, entity_type: EntityType, listing_id: &str) -> Result<()> {
        self.counts.remove(&Self::count_key(entity_type, listing_id));
        // coarse invalidation: every cached trending list may contain it
        self.trending.clear();
        Ok(())
    }
}

/// In-memory rate-limit counters and dedup markers.
pub struct MemoryFilterStore {
    counters: DashMap<String, (i64, Instant)>,
    markers: DashMap<String, Instant>,
}

impl MemoryFilterStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            markers: DashMap::new(),
        }
    }
}

impl Default for MemoryFilterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FilterStore for MemoryFilterStore {
    async fn bump_counter(&self, key: &str, ttl: Duration) -> Result<i64> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| (0, now + ttl));
        if entry.1 <= now {
            // window elapsed, start a fresh one
            *entry = (0, now + ttl);
        }
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn marker_exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        if let Some(deadline) = self.markers.get(key) {
            if *deadline > now {
                return Ok(true);
            }
        }
        self.markers.remove_if(key, |_, deadline| *deadline <= now);
        Ok(false)
    }

    async fn set_marker(&self, key: &str, ttl: Duration) -> Result<()> {
        self.markers.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_increment_creates_row_implicitly() {
        let store = MemoryViewStore::new();
        let row = store
            .increment_view(EntityType::Product, "listing-1", Some("10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(row.view_count, 1);
        assert_eq!(row.listing_id, "listing-1");
        assert_eq!(row.created_at, row.updated_at);

        let row = store
            .increment_view(EntityType::Product, "listing-1", Some("10.0.0.2"))
            .await
            .unwrap();
        assert_eq!(row.view_count, 2);

        let metadata = row.metadata.unwrap();
        assert_eq!(metadata.viewers.len(), 2);
        assert_eq!(metadata.daily.values().sum::<i64>(), 2);
    }

    #[tokio::test]
    async fn test_same_listing_different_entities_are_distinct() {
        let store = MemoryViewStore::new();
        store
            .increment_view(EntityType::Product, "shared", None)
            .await
            .unwrap();
        store
            .increment_view(EntityType::Job, "shared", None)
            .await
            .unwrap();

        assert_eq!(store.get_view_count(EntityType::Product, "shared").await.unwrap(), 1);
        assert_eq!(store.get_view_count(EntityType::Job, "shared").await.unwrap(), 1);
        assert_eq!(store.row_count(), 2);
    }

    #[tokio::test]
    async fn test_mixed_case_database_id_normalizes_to_one_row() {
        let store = MemoryViewStore::new();
        store
            .increment_view(EntityType::Product, "507F1F77BCF86CD799439011", None)
            .await
            .unwrap();
        store
            .increment_view(EntityType::Product, "507f1f77bcf86cd799439011", None)
            .await
            .unwrap();

        assert_eq!(store.row_count(), 1);
        assert_eq!(
            store
                .get_view_count(EntityType::Product, "507F1F77BCF86CD799439011")
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_legacy_row_is_found_and_not_fragmented() {
        let store = MemoryViewStore::new();
        // simulate a row created before id normalization, keyed by the
        // as-given mixed-case form
        let legacy_key = "507F1F77BCF86CD799439011".to_string();
        let mut row = ViewTracking::new(EntityType::Product, &legacy_key, 1_000);
        row.view_count = 4;
        store.rows.insert((EntityType::Product, legacy_key.clone()), row);

        // lookups via either representation resolve to the legacy row
        assert_eq!(
            store
                .get_view_count(EntityType::Product, &legacy_key)
                .await
                .unwrap(),
            4
        );

        // increments target the legacy row instead of creating a second one
        let updated = store
            .increment_view(EntityType::Product, &legacy_key, None)
            .await
            .unwrap();
        assert_eq!(updated.view_count, 5);
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test]
    async fn test_bulk_counts_default_to_zero() {
        let store = MemoryViewStore::new();
        store
            .increment_view(EntityType::Product, "known", None)
            .await
            .unwrap();

        let ids = vec!["known".to_string(), "missing".to_string()];
        let counts = store
            .get_bulk_view_counts(EntityType::Product, &ids)
            .await
            .unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["known"], 1);
        assert_eq!(counts["missing"], 0);
    }

    #[tokio::test]
    async fn test_top_trending_orders_by_count_then_recency() {
        let store = MemoryViewStore::new();
        for _ in 0..3 {
            store.increment_view(EntityType::Job, "hot", None).await.unwrap();
        }
        store.increment_view(EntityType::Job, "cold", None).await.unwrap();
        store.increment_view(EntityType::Product, "other", None).await.unwrap();

        let rows = store.get_top_trending(Some(EntityType::Job), 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].listing_id, "hot");

        let all = store.get_top_trending(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_increments_never_lose_updates() {
        let store = Arc::new(MemoryViewStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store
                        .increment_view(EntityType::Event, "busy", None)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get_view_count(EntityType::Event, "busy").await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_cache_miss_after_invalidation() {
        let cache = MemoryCache::new();
        cache
            .set_view_count(EntityType::Product, "listing-1", 7)
            .await
            .unwrap();
        assert_eq!(
            cache.get_view_count(EntityType::Product, "listing-1").await.unwrap(),
            Some(7)
        );

        cache
            .set_trending(Some(EntityType::Product), 10, &[])
            .await
            .unwrap();
        cache
            .invalidate_listing(EntityType::Product, "listing-1")
            .await
            .unwrap();

        assert_eq!(
            cache.get_view_count(EntityType::Product, "listing-1").await.unwrap(),
            None
        );
        assert_eq!(
            cache.get_trending(Some(EntityType::Product), 10).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_bulk_cache_is_partial() {
        let cache = MemoryCache::new();
        cache.set_view_count(EntityType::Product, "a", 1).await.unwrap();

        let ids = vec!["a".to_string(), "b".to_string()];
        let hits = cache
            .get_bulk_view_counts(EntityType::Product, &ids)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits["a"], 1);
        assert!(!hits.contains_key("b"));
    }
}
