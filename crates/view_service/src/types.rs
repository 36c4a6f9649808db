//! Common types for view tracking.
//!
//! The aggregate here is one counter per `(entity_type, listing_id)` pair.
//! Listing ids historically arrived in two representations (an arbitrary
//! string or a 24-hex database id with inconsistent casing), so all writes
//! normalize to a single canonical form and reads keep a legacy-lookup shim
//! for rows created before normalization.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Closed set of trackable listing categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Product,
    Realestate,
    Job,
    Professional,
    Event,
}

impl EntityType {
    /// All entity types, for fan-out queries ("all entities" trending).
    pub const ALL: [EntityType; 5] = [
        EntityType::Product,
        EntityType::Realestate,
        EntityType::Job,
        EntityType::Professional,
        EntityType::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Product => "product",
            EntityType::Realestate => "realestate",
            EntityType::Job => "job",
            EntityType::Professional => "professional",
            EntityType::Event => "event",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "product" => Ok(EntityType::Product),
            "realestate" => Ok(EntityType::Realestate),
            "job" => Ok(EntityType::Job),
            "professional" => Ok(EntityType::Professional),
            "event" => Ok(EntityType::Event),
            other => Err(Error::UnknownEntityType(other.to_string())),
        }
    }
}

/// Returns true when the value looks like a 24-hex database id.
pub fn is_database_id(value: &str) -> bool {
    value.len() == 24 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Canonical representation of a listing id.
///
/// Database-id values are lowercased so the same logical listing always maps
/// to one counter row; every other id is kept as given (trimmed).
pub fn canonical_listing_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if is_database_id(trimmed) {
        trimmed.to_ascii_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// The legacy representation of a listing id, when it differs from the
/// canonical one. Used only as a read-time fallback for rows written before
/// id normalization; new rows are never created under this form.
pub fn legacy_listing_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if is_database_id(trimmed) && trimmed != canonical_listing_id(trimmed) {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Advisory per-counter metadata. Not required for `view_count` correctness.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewMetadata {
    /// Views per hour bucket ("YYYYMMDDHH").
    pub hourly: HashMap<String, i64>,
    /// Views per day bucket ("YYYYMMDD").
    pub daily: HashMap<String, i64>,
    /// Distinct viewer identifiers observed for this listing.
    pub viewers: HashSet<String>,
}

/// One listing's counter state. One live row per `(entity_type, listing_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewTracking {
    /// Opaque identity assigned at creation, immutable.
    pub id: String,
    pub entity_type: EntityType,
    /// Canonical listing id (see [`canonical_listing_id`]).
    pub listing_id: String,
    /// Monotonically non-decreasing view counter.
    pub view_count: i64,
    /// Epoch milliseconds of the most recent accepted view.
    pub last_viewed_at: i64,
    pub metadata: Option<ViewMetadata>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ViewTracking {
    pub fn new(entity_type: EntityType, listing_id: &str, now: i64) -> Self {
        Self {
            id: aggregate_id(entity_type, listing_id),
            entity_type,
            listing_id: listing_id.to_string(),
            view_count: 0,
            last_viewed_at: now,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage identity of a counter row.
pub fn aggregate_id(entity_type: EntityType, listing_id: &str) -> String {
    format!("{}:{}", entity_type, listing_id)
}

/// Splits a storage identity back into its `(entity_type, listing_id)` pair.
pub fn parse_aggregate_id(id: &str) -> Option<(EntityType, &str)> {
    let (entity, listing) = id.split_once(':')?;
    let entity = EntityType::from_str(entity).ok()?;
    if listing.is_empty() {
        return None;
    }
    Some((entity, listing))
}

/// Domain event produced by a successful increment.
///
/// Emitted as an explicit return value so the caller decides whether and how
/// to dispatch it to analytics consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewEvent {
    pub entity_type: EntityType,
    pub listing_id: String,
    pub view_count: i64,
    /// Epoch milliseconds.
    pub occurred_at: i64,
}

/// A trending result row. `trending_score` is derived at read time and never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingEntry {
    pub entity_type: EntityType,
    pub listing_id: String,
    pub view_count: i64,
    pub trending_score: f64,
    /// Epoch milliseconds.
    pub last_viewed_at: i64,
}

/// Hour bucket key ("YYYYMMDDHH") for a timestamp in epoch milliseconds.
pub fn hour_bucket(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y%m%d%H").to_string())
        .unwrap_or_else(|| "0".to_string())
}

/// Day bucket key ("YYYYMMDD") for a timestamp in epoch milliseconds.
pub fn day_bucket(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "0".to_string())
}

// ============================================================================
// Tests
// ============================================================================
