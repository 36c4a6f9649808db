//! Trait seams between the service layer and its backing stores.
//!
//! Production uses the Redis implementations in [`crate::redis_client`]; the
//! DashMap implementations in [`crate::memory`] back local development and
//! the test suite.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{EntityType, TrendingEntry, ViewTracking};

/// Durable counter storage.
///
/// Implementations must make `increment_view` a single atomic
/// upsert-and-add: correctness under concurrent callers for the same
/// `(entity_type, listing_id)` rests entirely on this primitive, not on any
/// in-process lock.
#[async_trait]
pub trait ViewStore: Send + Sync {
    /// Atomically add one view and stamp `last_viewed_at`, creating the row
    /// with `view_count = 1` if absent. `viewer` feeds the advisory distinct
    /// viewer set when metadata tracking is enabled.
    ///
    /// Lookups tolerate both listing-id representations: the canonical form
    /// is tried first, and a legacy row is targeted only when it exists and
    /// no canonical row does.
    async fn increment_view(
        &self,
        entity_type: EntityType,
        listing_id: &str,
        viewer: Option<&str>,
    ) -> Result<ViewTracking>;

    /// Current count for a listing, `0` when no row exists.
    async fn get_view_count(&self, entity_type: EntityType, listing_id: &str) -> Result<i64>;

    /// Full counter row, trying canonical then legacy id representations.
    async fn find_by_entity_and_listing(
        &self,
        entity_type: EntityType,
        listing_id: &str,
    ) -> Result<Option<ViewTracking>>;

    /// Point lookup by storage identity.
    async fn find_by_id(&self, id: &str) -> Result<Option<ViewTracking>>;

    /// Counts for a batch of listings. Every requested id (deduplicated,
    /// canonical form) is present in the result, `0` for absent rows.
    async fn get_bulk_view_counts(
        &self,
        entity_type: EntityType,
        listing_ids: &[String],
    ) -> Result<HashMap<String, i64>>;

    /// Candidate rows for trending, ordered by `(view_count desc,
    /// last_viewed_at desc)`. `None` spans all entity types.
    async fn get_top_trending(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> Result<Vec<ViewTracking>>;
}

/// Short-TTL cache in front of [`ViewStore`]. All operations are advisory:
/// the service treats any error as a miss.
#[async_trait]
pub trait ViewCountCache: Send + Sync {
    async fn get_view_count(
        &self,
        entity_type: EntityType,
        listing_id: &str,
    ) -> Result<Option<i64>>;

    async fn set_view_count(
        &self,
        entity_type: EntityType,
        listing_id: &str,
        count: i64,
    ) -> Result<()>;

    /// Partial result: only ids with a live cache entry appear. Missing keys
    /// are cache misses, never zeros.
    async fn get_bulk_view_counts(
        &self,
        entity_type: EntityType,
        listing_ids: &[String],
    ) -> Result<HashMap<String, i64>>;

    async fn set_bulk_view_counts(
        &self,
        entity_type: EntityType,
        counts: &HashMap<String, i64>,
    ) -> Result<()>;

    async fn get_trending(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> Result<Option<Vec<TrendingEntry>>>;

    async fn set_trending(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
        entries: &[TrendingEntry],
    ) -> Result<()>;

    /// Proactive invalidation for profile-level mutations: drops the count
    /// entry and coarsely clears cached trending lists.
    async fn invalidate_listing(&self, entity_type: EntityType, listing_id: &str) -> Result<()>;
}

/// Keyed counters and markers backing rate limiting and deduplication.
/// Externally owned state, scoped by key, not by process.
#[async_trait]
pub trait FilterStore: Send + Sync {
    /// Increment a counter, setting `ttl` on first use. Returns the value
    /// after the increment.
    async fn bump_counter(&self, key: &str, ttl: Duration) -> Result<i64>;

    /// Whether a live marker exists for `key`.
    async fn marker_exists(&self, key: &str) -> Result<bool>;

    /// Set a marker that expires after `ttl`.
    async fn set_marker(&self, key: &str, ttl: Duration) -> Result<()>;
}
