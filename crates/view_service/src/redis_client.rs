//! Redis-backed implementations of the storage seams.
//!
//! Key layout:
//! - `views:{entity}:{listing}`      hash: count, last_viewed_at, created_at,
//!                                   updated_at, plus `h:YYYYMMDDHH` /
//!                                   `d:YYYYMMDD` buckets when metadata
//!                                   tracking is enabled
//! - `viewindex:{entity}`            sorted set mirroring counts, trending
//!                                   candidate index
//! - `viewers:{entity}:{listing}`    set of distinct viewer identifiers
//! - `viewcount:{entity}:{listing}`  cached count, 60s TTL
//! - `trending:{entity|all}:{limit}` cached trending list (JSON), 300s TTL
//! - `ratelimit:{ip}` / `viewdedup:{ip}:{entity}:{listing}` filter state
//!
//! The increment runs as one MULTI/EXEC pipeline, so concurrent writers for
//! the same listing can never lose an update or race row creation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, AsyncConnectionConfig};
use tracing::debug;

use crate::error::Result;
use crate::traits::{FilterStore, ViewCountCache, ViewStore};
use crate::types::{
    aggregate_id, canonical_listing_id, day_bucket, hour_bucket, legacy_listing_id,
    parse_aggregate_id, EntityType, TrendingEntry, ViewMetadata, ViewTracking,
};

/// Key prefix for counter rows: views:{entity}:{listing}
pub const VIEW_KEY_PREFIX: &str = "views:";

/// Key prefix for per-entity trending indexes: viewindex:{entity}
pub const INDEX_KEY_PREFIX: &str = "viewindex:";

/// Key prefix for distinct viewer sets: viewers:{entity}:{listing}
pub const VIEWERS_KEY_PREFIX: &str = "viewers:";

/// Key prefix for cached counts: viewcount:{entity}:{listing}
pub const COUNT_CACHE_PREFIX: &str = "viewcount:";

/// Key prefix for cached trending lists: trending:{entity|all}:{limit}
pub const TRENDING_CACHE_PREFIX: &str = "trending:";

const COUNT_CACHE_TTL_SECS: u64 = 60;
const TRENDING_CACHE_TTL_SECS: u64 = 300;

// External calls are bounded so a stalled Redis degrades into the normal
// failure path instead of hanging request handlers.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared Redis handle; connections are multiplexed and time-bounded.
#[derive(Clone)]
pub struct RedisBackend {
    client: Arc<redis::Client>,
}

impl RedisBackend {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let config = AsyncConnectionConfig::new()
            .set_connection_timeout(CONNECTION_TIMEOUT)
            .set_response_timeout(RESPONSE_TIMEOUT);
        let conn = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;
        Ok(conn)
    }
}

fn view_key(entity_type: EntityType, listing_id: &str) -> String {
    format!("{VIEW_KEY_PREFIX}{entity_type}:{listing_id}")
}

fn index_key(entity_type: EntityType) -> String {
    format!("{INDEX_KEY_PREFIX}{entity_type}")
}

fn viewers_key(entity_type: EntityType, listing_id: &str) -> String {
    format!("{VIEWERS_KEY_PREFIX}{entity_type}:{listing_id}")
}

fn count_cache_key(entity_type: EntityType, listing_id: &str) -> String {
    format!("{COUNT_CACHE_PREFIX}{entity_type}:{listing_id}")
}

fn trending_cache_key(entity_type: Option<EntityType>, limit: usize) -> String {
    let scope = entity_type.map_or("all".to_string(), |e| e.to_string());
    format!("{TRENDING_CACHE_PREFIX}{scope}:{limit}")
}

// ============================================================================
// Durable counter store
// ============================================================================

/// Durable, atomically-updated counter storage.
#[derive(Clone)]
pub struct RedisViewStore {
    backend: RedisBackend,
    track_metadata: bool,
}

impl RedisViewStore {
    pub fn new(backend: RedisBackend, track_metadata: bool) -> Self {
        Self {
            backend,
            track_metadata,
        }
    }

    /// Canonical key unless a pre-normalization row still exists under the
    /// as-given representation. Legacy rows stopped being created when writes
    /// were normalized, so the existence probe cannot race row creation.
    async fn resolve_listing(
        &self,
        conn: &mut MultiplexedConnection,
        entity_type: EntityType,
        listing_id: &str,
    ) -> Result<String> {
        let canonical = canonical_listing_id(listing_id);
        if let Some(legacy) = legacy_listing_id(listing_id) {
            let canonical_exists: bool = conn.exists(view_key(entity_type, &canonical)).await?;
            if !canonical_exists {
                let legacy_exists: bool = conn.exists(view_key(entity_type, &legacy)).await?;
                if legacy_exists {
                    return Ok(legacy);
                }
            }
        }
        Ok(canonical)
    }

    async fn fetch_row(
        &self,
        conn: &mut MultiplexedConnection,
        entity_type: EntityType,
        listing_id: &str,
    ) -> Result<Option<ViewTracking>> {
        let key = view_key(entity_type, listing_id);
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let get = |name: &str| -> i64 {
            fields
                .get(name)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
        };

        let metadata = if self.track_metadata {
            let mut metadata = ViewMetadata::default();
            for (field, value) in &fields {
                let count = value.parse::<i64>().unwrap_or(0);
                if let Some(bucket) = field.strip_prefix("h:") {
                    metadata.hourly.insert(bucket.to_string(), count);
                } else if let Some(bucket) = field.strip_prefix("d:") {
                    metadata.daily.insert(bucket.to_string(), count);
                }
            }
            let viewers: Vec<String> = conn
                .smembers(viewers_key(entity_type, listing_id))
                .await?;
            metadata.viewers = viewers.into_iter().collect();
            Some(metadata)
        } else {
            None
        };

        Ok(Some(ViewTracking {
            id: aggregate_id(entity_type, listing_id),
            entity_type,
            listing_id: listing_id.to_string(),
            view_count: get("count"),
            last_viewed_at: get("last_viewed_at"),
            metadata,
            created_at: get("created_at"),
            updated_at: get("updated_at"),
        }))
    }
}

#[async_trait]
impl ViewStore for RedisViewStore {
    async fn increment_view(
        &self,
        entity_type: EntityType,
        listing_id: &str,
        viewer: Option<&str>,
    ) -> Result<ViewTracking> {
        let mut conn = self.backend.connection().await?;
        let listing = self.resolve_listing(&mut conn, entity_type, listing_id).await?;
        let key = view_key(entity_type, &listing);
        let now = Utc::now().timestamp_millis();

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hincr(&key, "count", 1);
        pipe.hset_nx(&key, "created_at", now).ignore();
        pipe.hset(&key, "last_viewed_at", now).ignore();
        pipe.hset(&key, "updated_at", now).ignore();
        pipe.zincr(index_key(entity_type), &listing, 1).ignore();
        if self.track_metadata {
            pipe.hincr(&key, format!("h:{}", hour_bucket(now)), 1).ignore();
            pipe.hincr(&key, format!("d:{}", day_bucket(now)), 1).ignore();
            if let Some(viewer) = viewer {
                pipe.sadd(viewers_key(entity_type, &listing), viewer).ignore();
            }
        }
        pipe.hget(&key, "created_at");

        let (count, created_at): (i64, i64) = pipe.query_async(&mut conn).await?;
        debug!("incremented {key} to {count}");

        Ok(ViewTracking {
            id: aggregate_id(entity_type, &listing),
            entity_type,
            listing_id: listing,
            view_count: count,
            last_viewed_at: now,
            metadata: None,
            created_at,
            updated_at: now,
        })
    }

    async fn get_view_count(&self, entity_type: EntityType, listing_id: &str) -> Result<i64> {
        let mut conn = self.backend.connection().await?;
        let canonical = canonical_listing_id(listing_id);
        let count: Option<i64> = conn.hget(view_key(entity_type, &canonical), "count").await?;
        if let Some(count) = count {
            return Ok(count);
        }
        if let Some(legacy) = legacy_listing_id(listing_id) {
            let count: Option<i64> = conn.hget(view_key(entity_type, &legacy), "count").await?;
            return Ok(count.unwrap_or(0));
        }
        Ok(0)
    }

    async fn find_by_entity_and_listing(
        &self,
        entity_type: EntityType,
        listing_id: &str,
    ) -> Result<Option<ViewTracking>> {
        let mut conn = self.backend.connection().await?;
        let canonical = canonical_listing_id(listing_id);
        if let Some(row) = self.fetch_row(&mut conn, entity_type, &canonical).await? {
            return Ok(Some(row));
        }
        if let Some(legacy) = legacy_listing_id(listing_id) {
            return self.fetch_row(&mut conn, entity_type, &legacy).await;
        }
        Ok(None)
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
        if listing_ids.is_empty() {
            return Ok(counts);
        }
        let mut conn = self.backend.connection().await?;

        let canonicals: Vec<String> = {
            let mut seen = Vec::new();
            for raw in listing_ids {
                let canonical = canonical_listing_id(raw);
                if !seen.contains(&canonical) {
                    seen.push(canonical);
                }
            }
            seen
        };

        let mut pipe = redis::pipe();
        for canonical in &canonicals {
            pipe.hget(view_key(entity_type, canonical), "count");
        }
        let fetched: Vec<Option<i64>> = pipe.query_async(&mut conn).await?;

        // retry canonical misses under the legacy representation, if one
        // exists for the id as originally requested
        let mut legacy_lookups: Vec<(String, String)> = Vec::new();
        for (canonical, count) in canonicals.iter().zip(fetched) {
            match count {
                Some(count) => {
                    counts.insert(canonical.clone(), count);
                }
                None => {
                    let legacy = listing_ids
                        .iter()
                        .find(|raw| canonical_listing_id(raw) == *canonical)
                        .and_then(|raw| legacy_listing_id(raw));
                    if let Some(legacy) = legacy {
                        legacy_lookups.push((canonical.clone(), legacy));
                    } else {
                        counts.insert(canonical.clone(), 0);
                    }
                }
            }
        }

        if !legacy_lookups.is_empty() {
            let mut pipe = redis::pipe();
            for (_, legacy) in &legacy_lookups {
                pipe.hget(view_key(entity_type, legacy), "count");
            }
            let fetched: Vec<Option<i64>> = pipe.query_async(&mut conn).await?;
            for ((canonical, _), count) in legacy_lookups.into_iter().zip(fetched) {
                counts.insert(canonical, count.unwrap_or(0));
            }
        }

        Ok(counts)
    }

    async fn get_top_trending(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> Result<Vec<ViewTracking>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.backend.connection().await?;
        let entities: Vec<EntityType> = match entity_type {
            Some(entity) => vec![entity],
            None => EntityType::ALL.to_vec(),
        };

        let mut rows = Vec::new();
        for entity in entities {
            let members: Vec<(String, f64)> = conn
                .zrevrange_withscores(index_key(entity), 0, limit as isize - 1)
                .await?;
            if members.is_empty() {
                continue;
            }

            const STAMP_FIELDS: &[&str] = &["last_viewed_at", "created_at", "updated_at"];
            let mut pipe = redis::pipe();
            for (listing, _) in &members {
                pipe.hget(view_key(entity, listing), STAMP_FIELDS);
            }
            let stamps: Vec<(Option<i64>, Option<i64>, Option<i64>)> =
                pipe.query_async(&mut conn).await?;

            for ((listing, score), (last_viewed_at, created_at, updated_at)) in
                members.into_iter().zip(stamps)
            {
                rows.push(ViewTracking {
                    id: aggregate_id(entity, &listing),
                    entity_type: entity,
                    listing_id: listing,
                    view_count: score as i64,
                    last_viewed_at: last_viewed_at.unwrap_or(0),
                    metadata: None,
                    created_at: created_at.unwrap_or(0),
                    updated_at: updated_at.unwrap_or(0),
                });
            }
        }

        rows.sort_by(|a, b| {
            b.view_count
                .cmp(&a.view_count)
                .then_with(|| b.last_viewed_at.cmp(&a.last_viewed_at))
        });
        rows.truncate(limit);
        Ok(rows)
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Cache-aside layer for counts and trending lists.
#[derive(Clone)]
pub struct RedisCountCache {
    backend: RedisBackend,
}

impl RedisCountCache {
    pub fn new(backend: RedisBackend) -> Self {
        Self { backend }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        let mut conn = self.backend.connection().await?;
        let keys: Vec<String> = conn.keys(pattern).await?;
        if !keys.is_empty() {
            conn.del::<_, ()>(keys).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ViewCountCache for RedisCountCache {
    async fn get_view_count(
        &self,
        entity_type: EntityType,
        listing_id: &str,
    ) -> Result<Option<i64>> {
        let mut conn = self.backend.connection().await?;
        let count: Option<i64> = conn.get(count_cache_key(entity_type, listing_id)).await?;
        Ok(count)
    }

    async fn set_view_count(
        &self,
        entity_type: EntityType,
        listing_id: &str,
        count: i64,
    ) -> Result<()> {
        let mut conn = self.backend.connection().await?;
        conn.set_ex::<_, _, ()>(
            count_cache_key(entity_type, listing_id),
            count,
            COUNT_CACHE_TTL_SECS,
        )
        .await?;
        Ok(())
    }

    async fn get_bulk_view_counts(
        &self,
        entity_type: EntityType,
        listing_ids: &[String],
    ) -> Result<HashMap<String, i64>> {
        let mut hits = HashMap::new();
        if listing_ids.is_empty() {
            return Ok(hits);
        }
        let mut conn = self.backend.connection().await?;
        let keys: Vec<String> = listing_ids
            .iter()
            .map(|id| count_cache_key(entity_type, id))
            .collect();
        let values: Vec<Option<i64>> = conn.mget(keys).await?;
        for (listing_id, value) in listing_ids.iter().zip(values) {
            if let Some(count) = value {
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
        if counts.is_empty() {
            return Ok(());
        }
        let mut conn = self.backend.connection().await?;
        let mut pipe = redis::pipe();
        for (listing_id, count) in counts {
            pipe.set_ex(
                count_cache_key(entity_type, listing_id),
                *count,
                COUNT_CACHE_TTL_SECS,
            )
            .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get_trending(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> Result<Option<Vec<TrendingEntry>>> {
        let mut conn = self.backend.connection().await?;
        let json: Option<String> = conn.get(trending_cache_key(entity_type, limit)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_trending(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
        entries: &[TrendingEntry],
    ) -> Result<()> {
        let mut conn = self.backend.connection().await?;
        let json = serde_json::to_string(entries)?;
        conn.set_ex::<_, _, ()>(
            trending_cache_key(entity_type, limit),
            json,
            TRENDING_CACHE_TTL_SECS,
        )
        .await?;
        Ok(())
    }

    async fn invalidate_listing(&self, entity_type: EntityType, listing_id: &str) -> Result<()> {
        let mut conn = self.backend.connection().await?;
        conn.del::<_, ()>(count_cache_key(entity_type, listing_id)).await?;
        drop(conn);
        // coarse invalidation: every cached trending list may contain it
        self.delete_pattern(&format!("{TRENDING_CACHE_PREFIX}*")).await
    }
}

// ============================================================================
// Filter state
// ============================================================================

/// Rate-limit counters and dedup markers.
#[derive(Clone)]
pub struct RedisFilterStore {
    backend: RedisBackend,
}

impl RedisFilterStore {
    pub fn new(backend: RedisBackend) -> Self {
        Self { backend }
    }
}

/// INCR plus `EXPIRE NX` in one transaction: the window TTL lands with the
/// first increment and survives partial failures, so a counter can never be
/// left behind without an expiry.
fn rate_counter_pipe(key: &str, ttl: Duration) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    pipe.incr(key, 1);
    pipe.cmd("EXPIRE")
        .arg(key)
        .arg(ttl.as_secs() as i64)
        .arg("NX")
        .ignore();
    pipe
}

#[async_trait]
impl FilterStore for RedisFilterStore {
    async fn bump_counter(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.backend.connection().await?;
        let (value,): (i64,) = rate_counter_pipe(key, ttl).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn marker_exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.backend.connection().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn set_marker(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.backend.connection().await?;
        conn.set_ex::<_, _, ()>(key, 1, ttl.as_secs()).await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
