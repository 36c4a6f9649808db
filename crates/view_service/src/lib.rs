//! View tracking service library.
//!
//! Records listing views, filters bot and duplicate traffic, serves counts
//! cache-aside and ranks listings by a recency-decayed trending score.

pub mod abuse;
pub mod api;
pub mod error;
pub mod memory;
pub mod redis_client;
pub mod service;
pub mod traits;
pub mod trending;
pub mod types;

pub use abuse::{AbuseConfig, AbuseFilter, BlockReason, Verdict};
pub use api::{create_router, AppState};
pub use error::{Error, Result};
pub use memory::{MemoryCache, MemoryFilterStore, MemoryViewStore};
pub use redis_client::{RedisBackend, RedisCountCache, RedisFilterStore, RedisViewStore};
pub use service::{ViewOutcome, ViewServiceConfig, ViewTrackingService};
pub use traits::{FilterStore, ViewCountCache, ViewStore};
pub use types::{EntityType, TrendingEntry, ViewEvent, ViewTracking};
