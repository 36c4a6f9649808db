//! View tracking orchestration.
//!
//! The increment pipeline runs `BotCheck -> DedupCheck -> Increment ->
//! RecordDedup`, falling back to a read-only path at every stage. Counting is
//! a best-effort side channel: no failure here may propagate to the caller —
//! a page render must never fail because view counting is unavailable. Every
//! degraded path still answers with a plausible count (the current persisted
//! value, or `0` as a last resort).

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tracing::{debug, error, warn};

use crate::abuse::{AbuseFilter, BlockReason, Verdict};
use crate::traits::{ViewCountCache, ViewStore};
use crate::trending;
use crate::types::{canonical_listing_id, EntityType, TrendingEntry, ViewEvent};

/// Service tuning knobs.
#[derive(Debug, Clone)]
pub struct ViewServiceConfig {
    /// Candidate rows fetched per trending query, as a multiple of the
    /// requested limit. The decayed re-ranking needs headroom beyond the raw
    /// count ordering.
    pub trending_candidate_multiplier: usize,
    pub default_trending_limit: usize,
    pub max_trending_limit: usize,
    /// Upper bound on ids per bulk request.
    pub max_bulk_ids: usize,
}

impl Default for ViewServiceConfig {
    fn default() -> Self {
        Self {
            trending_candidate_multiplier: 3,
            default_trending_limit: 10,
            max_trending_limit: 50,
            max_bulk_ids: 500,
        }
    }
}

/// Result of one inbound view request. Never an error: rejected or failed
/// requests still carry the current count.
#[derive(Debug, Clone)]
pub struct ViewOutcome {
    pub entity_type: EntityType,
    /// Canonical listing id.
    pub listing_id: String,
    pub view_count: i64,
    /// Whether this request actually incremented the counter.
    pub counted: bool,
    /// Why the increment was skipped, when it was skipped by the filter.
    pub skipped: Option<BlockReason>,
    /// Domain event for analytics consumers, present only when counted.
    pub event: Option<ViewEvent>,
}

/// Orchestrates the abuse filter, cache layer and durable store.
pub struct ViewTrackingService {
    store: Arc<dyn ViewStore>,
    cache: Arc<dyn ViewCountCache>,
    filter: AbuseFilter,
    config: ViewServiceConfig,
}

impl ViewTrackingService {
    pub fn new(
        store: Arc<dyn ViewStore>,
        cache: Arc<dyn ViewCountCache>,
        filter: AbuseFilter,
        config: ViewServiceConfig,
    ) -> Self {
        Self {
            store,
            cache,
            filter,
            config,
        }
    }

    pub fn config(&self) -> &ViewServiceConfig {
        &self.config
    }

    /// Process one inbound view.
    pub async fn record_view(
        &self,
        entity_type: EntityType,
        listing_id: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> ViewOutcome {
        let raw = listing_id.trim();
        let canonical = canonical_listing_id(raw);

        match self.filter.check_request(client_ip, user_agent).await {
            Verdict::Blocked(reason) => {
                counter!("views_bot_blocked_total", "reason" => reason.as_str()).increment(1);
                debug!("blocked view from {client_ip}: {}", reason.as_str());
                return self.skipped_outcome(entity_type, raw, &canonical, reason).await;
            }
            Verdict::Indeterminate => {
                // fail open: a broken filter must not block genuine users
                counter!("views_filter_indeterminate_total").increment(1);
            }
            Verdict::Allowed => {}
        }

        match self
            .filter
            .check_duplicate(client_ip, entity_type, &canonical)
            .await
        {
            Verdict::Blocked(reason) => {
                counter!("views_duplicate_skipped_total").increment(1);
                return self.skipped_outcome(entity_type, raw, &canonical, reason).await;
            }
            Verdict::Indeterminate | Verdict::Allowed => {}
        }

        match self
            .store
            .increment_view(entity_type, raw, Some(client_ip))
            .await
        {
            Ok(row) => {
                self.filter
                    .record_view(client_ip, entity_type, &canonical)
                    .await;
                if let Err(e) = self
                    .cache
                    .set_view_count(entity_type, &canonical, row.view_count)
                    .await
                {
                    debug!("cache write-through failed for {canonical}: {e}");
                }
                counter!("views_increment_total", "entity" => entity_type.as_str()).increment(1);

                let event = ViewEvent {
                    entity_type,
                    listing_id: row.listing_id.clone(),
                    view_count: row.view_count,
                    occurred_at: row.last_viewed_at,
                };
                ViewOutcome {
                    entity_type,
                    listing_id: row.listing_id,
                    view_count: row.view_count,
                    counted: true,
                    skipped: None,
                    event: Some(event),
                }
            }
            Err(e) => {
                error!("view increment failed for {entity_type}:{canonical}: {e}");
                counter!("views_errors_total", "stage" => "increment").increment(1);
                let count = self.current_count(entity_type, raw, &canonical).await;
                ViewOutcome {
                    entity_type,
                    listing_id: canonical,
                    view_count: count,
                    counted: false,
                    skipped: None,
                    event: None,
                }
            }
        }
    }

    /// Current count via cache-aside. Infallible: degraded paths answer `0`.
    pub async fn get_view_count(&self, entity_type: EntityType, listing_id: &str) -> i64 {
        let raw = listing_id.trim();
        let canonical = canonical_listing_id(raw);
        self.current_count(entity_type, raw, &canonical).await
    }

    /// Counts for a batch of listings. The result keys are exactly the
    /// deduplicated canonical ids, with `0` for anything not found in cache
    /// or store — even when the store call fails after a partial cache hit.
    pub async fn get_bulk_view_counts(
        &self,
        entity_type: EntityType,
        listing_ids: &[String],
    ) -> std::collections::HashMap<String, i64> {
        use std::collections::HashMap;

        // dedupe on the canonical form, remembering one as-given spelling so
        // the store can still try a legacy representation
        let mut raw_by_canonical: HashMap<String, String> = HashMap::new();
        for raw in listing_ids {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            raw_by_canonical
                .entry(canonical_listing_id(trimmed))
                .or_insert_with(|| trimmed.to_string());
        }
        if raw_by_canonical.is_empty() {
            return HashMap::new();
        }
        let canonicals: Vec<String> = raw_by_canonical.keys().cloned().collect();

        let mut result = match self
            .cache
            .get_bulk_view_counts(entity_type, &canonicals)
            .await
        {
            Ok(hits) => {
                counter!("views_cache_hits_total", "kind" => "bulk").increment(hits.len() as u64);
                hits
            }
            Err(e) => {
                debug!("bulk cache read failed, treating as miss: {e}");
                counter!("views_cache_misses_total", "kind" => "bulk").increment(1);
                HashMap::new()
            }
        };

        let missing: Vec<String> = canonicals
            .iter()
            .filter(|id| !result.contains_key(*id))
            .map(|id| raw_by_canonical[id].clone())
            .collect();

        if !missing.is_empty() {
            match self.store.get_bulk_view_counts(entity_type, &missing).await {
                Ok(fetched) => {
                    if let Err(e) = self
                        .cache
                        .set_bulk_view_counts(entity_type, &fetched)
                        .await
                    {
                        debug!("bulk cache repopulation failed: {e}");
                    }
                    result.extend(fetched);
                }
                Err(e) => {
                    error!("bulk store read failed, defaulting misses to 0: {e}");
                    counter!("views_errors_total", "stage" => "bulk_read").increment(1);
                }
            }
        }

        // deterministic key set: every requested id answers, 0 as default
        for canonical in canonicals {
            result.entry(canonical).or_insert(0);
        }
        result
    }

    /// Top trending listings, cache-aside with derived-score re-ranking.
    pub async fn get_trending(
        &self,
        entity_type: Option<EntityType>,
        limit: Option<usize>,
    ) -> Vec<TrendingEntry> {
        let limit = limit
            .unwrap_or(self.config.default_trending_limit)
            .clamp(1, self.config.max_trending_limit);

        match self.cache.get_trending(entity_type, limit).await {
            Ok(Some(entries)) => {
                counter!("views_cache_hits_total", "kind" => "trending").increment(1);
                return entries;
            }
            Ok(None) => {
                counter!("views_cache_misses_total", "kind" => "trending").increment(1);
            }
            Err(e) => {
                debug!("trending cache read failed, treating as miss: {e}");
                counter!("views_cache_misses_total", "kind" => "trending").increment(1);
            }
        }

        let candidates = limit * self.config.trending_candidate_multiplier;
        match self.store.get_top_trending(entity_type, candidates).await {
            Ok(rows) => {
                let now = Utc::now().timestamp_millis();
                let ranked = trending::rank(rows, limit, now);
                if let Err(e) = self.cache.set_trending(entity_type, limit, &ranked).await {
                    debug!("trending cache repopulation failed: {e}");
                }
                ranked
            }
            Err(e) => {
                error!("trending store read failed: {e}");
                counter!("views_errors_total", "stage" => "trending").increment(1);
                Vec::new()
            }
        }
    }

    /// Proactively drop cached state for a listing after a profile-level
    /// mutation.
    pub async fn invalidate_listing(&self, entity_type: EntityType, listing_id: &str) {
        let canonical = canonical_listing_id(listing_id.trim());
        if let Err(e) = self.cache.invalidate_listing(entity_type, &canonical).await {
            warn!("cache invalidation failed for {entity_type}:{canonical}: {e}");
        }
    }

    async fn skipped_outcome(
        &self,
        entity_type: EntityType,
        raw: &str,
        canonical: &str,
        reason: BlockReason,
    ) -> ViewOutcome {
        let count = self.current_count(entity_type, raw, canonical).await;
        ViewOutcome {
            entity_type,
            listing_id: canonical.to_string(),
            view_count: count,
            counted: false,
            skipped: Some(reason),
            event: None,
        }
    }

    async fn current_count(&self, entity_type: EntityType, raw: &str, canonical: &str) -> i64 {
        match self.cache.get_view_count(entity_type, canonical).await {
            Ok(Some(count)) => {
                counter!("views_cache_hits_total", "kind" => "count").increment(1);
                return count;
            }
            Ok(None) => {
                counter!("views_cache_misses_total", "kind" => "count").increment(1);
            }
            Err(e) => {
                debug!("count cache read failed, treating as miss: {e}");
                counter!("views_cache_misses_total", "kind" => "count").increment(1);
            }
        }

        match self.store.get_view_count(entity_type, raw).await {
            Ok(count) => {
                if let Err(e) = self.cache.set_view_count(entity_type, canonical, count).await {
                    debug!("count cache repopulation failed: {e}");
                }
                count
            }
            Err(e) => {
                error!("count read fallback failed for {entity_type}:{canonical}: {e}");
                counter!("views_errors_total", "stage" => "read_fallback").increment(1);
                0
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abuse::AbuseConfig;
    use crate::error::{Error, Result};
    use crate::memory::{MemoryCache, MemoryFilterStore, MemoryViewStore};
    use crate::traits::{FilterStore, ViewStore};
    use crate::types::ViewTracking;
    use async_trait::async_trait;
    use std::collections::HashMap;

    const UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36";

    struct FailingStore;

    #[async_trait]
    impl ViewStore for FailingStore {
        async fn increment_view(
            &self,
            _entity_type: EntityType,
            _listing_id: &str,
            _viewer: Option<&str>,
        ) -> Result<ViewTracking> {
            Err(Error::Storage("store down".into()))
        }
        async fn get_view_count(&self, _entity_type: EntityType, _listing_id: &str) -> Result<i64> {
            Err(Error::Storage("store down".into()))
        }
        async fn find_by_entity_and_listing(
            &self,
            _entity_type: EntityType,
            _listing_id: &str,
        ) -> Result<Option<ViewTracking>> {
            Err(Error::Storage("store down".into()))
        }
        async fn find_by_id(&self, _id: &str) -> Result<Option<ViewTracking>> {
            Err(Error::Storage("store down".into()))
        }
        async fn get_bulk_view_counts(
            &self,
            _entity_type: EntityType,
            _listing_ids: &[String],
        ) -> Result<HashMap<String, i64>> {
            Err(Error::Storage("store down".into()))
        }
        async fn get_top_trending(
            &self,
            _entity_type: Option<EntityType>,
            _limit: usize,
        ) -> Result<Vec<ViewTracking>> {
            Err(Error::Storage("store down".into()))
        }
    }

    struct FailingCache;

    #[async_trait]
    impl ViewCountCache for FailingCache {
        async fn get_view_count(
            &self,
            _entity_type: EntityType,
            _listing_id: &str,
        ) -> Result<Option<i64>> {
            Err(Error::Storage("cache down".into()))
        }
        async fn set_view_count(
            &self,
            _entity_type: EntityType,
            _listing_id: &str,
            _count: i64,
        ) -> Result<()> {
            Err(Error::Storage("cache down".into()))
        }
        async fn get_bulk_view_counts(
            &self,
            _entity_type: EntityType,
            _listing_ids: &[String],
        ) -> Result<HashMap<String, i64>> {
            Err(Error::Storage("cache down".into()))
        }
        async fn set_bulk_view_counts(
            &self,
            _entity_type: EntityType,
            _counts: &HashMap<String, i64>,
        ) -> Result<()> {
            Err(Error::Storage("cache down".into()))
        }
        async fn get_trending(
            &self,
            _entity_type: Option<EntityType>,
            _limit: usize,
        ) -> Result<Option<Vec<TrendingEntry>>> {
            Err(Error::Storage("cache down".into()))
        }
        async fn set_trending(
            &self,
            _entity_type: Option<EntityType>,
            _limit: usize,
            _entries: &[TrendingEntry],
        ) -> Result<()> {
            Err(Error::Storage("cache down".into()))
        }
        async fn invalidate_listing(
            &self,
            _entity_type: EntityType,
            _listing_id: &str,
        ) -> Result<()> {
            Err(Error::Storage("cache down".into()))
        }
    }

    struct FailingFilterStore;

    #[async_trait]
    impl FilterStore for FailingFilterStore {
        async fn bump_counter(&self, _key: &str, _ttl: std::time::Duration) -> Result<i64> {
            Err(Error::Storage("filter store down".into()))
        }
        async fn marker_exists(&self, _key: &str) -> Result<bool> {
            Err(Error::Storage("filter store down".into()))
        }
        async fn set_marker(&self, _key: &str, _ttl: std::time::Duration) -> Result<()> {
            Err(Error::Storage("filter store down".into()))
        }
    }

    struct Harness {
        store: Arc<MemoryViewStore>,
        cache: Arc<MemoryCache>,
        service: ViewTrackingService,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryViewStore::new());
        let cache = Arc::new(MemoryCache::new());
        let filter = AbuseFilter::new(
            Arc::new(MemoryFilterStore::new()),
            AbuseConfig::default(),
        );
        let service = ViewTrackingService::new(
            store.clone(),
            cache.clone(),
            filter,
            ViewServiceConfig::default(),
        );
        Harness {
            store,
            cache,
            service,
        }
    }

    fn service_with(
        store: Arc<dyn ViewStore>,
        cache: Arc<dyn ViewCountCache>,
    ) -> ViewTrackingService {
        let filter = AbuseFilter::new(
            Arc::new(MemoryFilterStore::new()),
            AbuseConfig::default(),
        );
        ViewTrackingService::new(store, cache, filter, ViewServiceConfig::default())
    }

    #[tokio::test]
    async fn test_first_view_counts() {
        let h = harness();
        let outcome = h
            .service
            .record_view(EntityType::Product, "listing-1", "10.0.0.1", UA)
            .await;
        assert!(outcome.counted);
        assert_eq!(outcome.view_count, 1);
        let event = outcome.event.unwrap();
        assert_eq!(event.listing_id, "listing-1");
        assert_eq!(event.view_count, 1);
    }

    #[tokio::test]
    async fn test_dedup_is_idempotent_within_window() {
        let h = harness();
        let first = h
            .service
            .record_view(EntityType::Product, "listing-1", "10.0.0.1", UA)
            .await;
        assert!(first.counted);
        assert_eq!(first.view_count, 1);

        let second = h
            .service
            .record_view(EntityType::Product, "listing-1", "10.0.0.1", UA)
            .await;
        assert!(!second.counted);
        assert_eq!(second.skipped, Some(BlockReason::Duplicate));
        assert_eq!(second.view_count, 1);
        assert!(second.event.is_none());

        // a different client still counts
        let other = h
            .service
            .record_view(EntityType::Product, "listing-1", "10.0.0.2", UA)
            .await;
        assert!(other.counted);
        assert_eq!(other.view_count, 2);
    }

    #[tokio::test]
    async fn test_bot_short_circuits_before_the_store() {
        let h = harness();
        // seed: five genuine views from distinct clients
        for i in 0..5 {
            h.service
                .record_view(EntityType::Product, "listing-1", &format!("10.0.1.{i}"), UA)
                .await;
        }

        let outcome = h
            .service
            .record_view(EntityType::Product, "listing-1", "10.0.0.9", "Googlebot/2.1")
            .await;
        assert!(!outcome.counted);
        assert_eq!(outcome.skipped, Some(BlockReason::BotSignature));
        // the pre-existing count is returned and unchanged
        assert_eq!(outcome.view_count, 5);
        assert_eq!(
            h.store
                .get_view_count(EntityType::Product, "listing-1")
                .await
                .unwrap(),
            5
        );
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_eleventh_view_from_same_ip() {
        let h = harness();
        // 11 distinct listings so deduplication never interferes
        for i in 0..10 {
            let outcome = h
                .service
                .record_view(EntityType::Job, &format!("listing-{i}"), "10.0.0.1", UA)
                .await;
            assert!(outcome.counted, "view {i} should be accepted");
        }

        let eleventh = h
            .service
            .record_view(EntityType::Job, "listing-10", "10.0.0.1", UA)
            .await;
        assert!(!eleventh.counted);
        assert_eq!(eleventh.skipped, Some(BlockReason::RateLimited));
        // that listing was never incremented
        assert_eq!(eleventh.view_count, 0);
    }

    #[tokio::test]
    async fn test_store_failure_falls_back_to_zero() {
        let service = service_with(Arc::new(FailingStore), Arc::new(MemoryCache::new()));
        let outcome = service
            .record_view(EntityType::Event, "listing-1", "10.0.0.1", UA)
            .await;
        assert!(!outcome.counted);
        assert_eq!(outcome.skipped, None);
        assert_eq!(outcome.view_count, 0);

        assert_eq!(service.get_view_count(EntityType::Event, "listing-1").await, 0);
    }

    #[tokio::test]
    async fn test_filter_store_down_fails_open_and_counts() {
        let store = Arc::new(MemoryViewStore::new());
        let filter = AbuseFilter::new(Arc::new(FailingFilterStore), AbuseConfig::default());
        let service = ViewTrackingService::new(
            store.clone(),
            Arc::new(MemoryCache::new()),
            filter,
            ViewServiceConfig::default(),
        );

        // a broken filter store must never block a genuine view
        let outcome = service
            .record_view(EntityType::Product, "listing-1", "10.0.0.1", UA)
            .await;
        assert!(outcome.counted);
        assert_eq!(outcome.view_count, 1);
        assert_eq!(outcome.skipped, None);
        assert_eq!(
            store
                .get_view_count(EntityType::Product, "listing-1")
                .await
                .unwrap(),
            1
        );

        // dedup markers can't be consulted or written, so repeats keep
        // counting rather than being dropped
        let repeat = service
            .record_view(EntityType::Product, "listing-1", "10.0.0.1", UA)
            .await;
        assert!(repeat.counted);
        assert_eq!(repeat.view_count, 2);
    }

    #[tokio::test]
    async fn test_everything_down_still_answers() {
        let service = service_with(Arc::new(FailingStore), Arc::new(FailingCache));
        let outcome = service
            .record_view(EntityType::Event, "listing-1", "10.0.0.1", UA)
            .await;
        assert!(!outcome.counted);
        assert_eq!(outcome.view_count, 0);

        let counts = service
            .get_bulk_view_counts(EntityType::Event, &["a".to_string(), "b".to_string()])
            .await;
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["a"], 0);
        assert_eq!(counts["b"], 0);

        assert!(service.get_trending(None, Some(5)).await.is_empty());
    }

    #[tokio::test]
    async fn test_get_view_count_repopulates_cache() {
        let h = harness();
        h.store
            .increment_view(EntityType::Product, "listing-1", None)
            .await
            .unwrap();

        assert_eq!(h.service.get_view_count(EntityType::Product, "listing-1").await, 1);
        assert_eq!(
            h.cache
                .get_view_count(EntityType::Product, "listing-1")
                .await
                .unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_bulk_merges_cache_and_store_with_zero_defaults() {
        let h = harness();
        // cache knows abc-123, the store knows the hex listing
        h.cache
            .set_view_count(EntityType::Product, "abc-123", 2)
            .await
            .unwrap();
        for _ in 0..7 {
            h.store
                .increment_view(EntityType::Product, "507f1f77bcf86cd799439011", None)
                .await
                .unwrap();
        }

        let ids = vec![
            "abc-123".to_string(),
            "507f1f77bcf86cd799439011".to_string(),
            "missing-id".to_string(),
        ];
        let counts = h.service.get_bulk_view_counts(EntityType::Product, &ids).await;

        assert_eq!(counts.len(), 3);
        assert_eq!(counts["abc-123"], 2);
        assert_eq!(counts["507f1f77bcf86cd799439011"], 7);
        assert_eq!(counts["missing-id"], 0);
    }

    #[tokio::test]
    async fn test_bulk_partial_cache_hit_survives_store_failure() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .set_view_count(EntityType::Product, "abc-123", 2)
            .await
            .unwrap();
        let service = service_with(Arc::new(FailingStore), cache);

        let ids = vec!["abc-123".to_string(), "missing-id".to_string()];
        let counts = service.get_bulk_view_counts(EntityType::Product, &ids).await;

        assert_eq!(counts.len(), 2);
        assert_eq!(counts["abc-123"], 2);
        assert_eq!(counts["missing-id"], 0);
    }

    #[tokio::test]
    async fn test_bulk_cache_failure_still_reads_store() {
        let store = Arc::new(MemoryViewStore::new());
        store
            .increment_view(EntityType::Product, "abc-123", None)
            .await
            .unwrap();
        let service = service_with(store, Arc::new(FailingCache));

        let ids = vec!["abc-123".to_string(), "missing-id".to_string()];
        let counts = service.get_bulk_view_counts(EntityType::Product, &ids).await;

        assert_eq!(counts.len(), 2);
        assert_eq!(counts["abc-123"], 1);
        assert_eq!(counts["missing-id"], 0);
    }

    #[tokio::test]
    async fn test_bulk_dedupes_requested_ids() {
        let h = harness();
        let ids = vec![
            "abc-123".to_string(),
            "abc-123".to_string(),
            " abc-123 ".to_string(),
            "".to_string(),
        ];
        let counts = h.service.get_bulk_view_counts(EntityType::Product, &ids).await;
        assert_eq!(counts.len(), 1);
        assert_eq!(counts["abc-123"], 0);
    }

    #[tokio::test]
    async fn test_trending_ranks_and_caches() {
        let h = harness();
        for _ in 0..5 {
            h.store
                .increment_view(EntityType::Product, "hot", None)
                .await
                .unwrap();
        }
        h.store
            .increment_view(EntityType::Product, "cold", None)
            .await
            .unwrap();

        let trending = h.service.get_trending(Some(EntityType::Product), Some(1)).await;
        assert_eq!(trending.len(), 1);
        assert_eq!(trending[0].listing_id, "hot");
        assert_eq!(trending[0].view_count, 5);
        // just-viewed rows score at their raw count
        assert_eq!(trending[0].trending_score, 5.0);

        // result is now cached under (entity, limit)
        let cached = h
            .cache
            .get_trending(Some(EntityType::Product), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached[0].listing_id, "hot");
    }

    #[tokio::test]
    async fn test_invalidate_listing_drops_cached_state() {
        let h = harness();
        h.service
            .record_view(EntityType::Product, "listing-1", "10.0.0.1", UA)
            .await;
        assert_eq!(
            h.cache
                .get_view_count(EntityType::Product, "listing-1")
                .await
                .unwrap(),
            Some(1)
        );

        h.service.invalidate_listing(EntityType::Product, "listing-1").await;
        assert_eq!(
            h.cache
                .get_view_count(EntityType::Product, "listing-1")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_mixed_case_hex_ids_share_one_counter() {
        let h = harness();
        let upper = h
            .service
            .record_view(EntityType::Product, "507F1F77BCF86CD799439011", "10.0.0.1", UA)
            .await;
        assert!(upper.counted);
        assert_eq!(upper.listing_id, "507f1f77bcf86cd799439011");

        let lower = h
            .service
            .record_view(EntityType::Product, "507f1f77bcf86cd799439011", "10.0.0.2", UA)
            .await;
        assert!(lower.counted);
        assert_eq!(lower.view_count, 2);
    }
}
