//! Bot detection and view deduplication.
//!
//! The filter reduces noise, it is not a security boundary: false negatives
//! are acceptable, false positives are not. Infrastructure failure therefore
//! never yields `Blocked` — it yields [`Verdict::Indeterminate`] and the
//! caller's policy decides (the service treats it as allowed).

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::traits::FilterStore;
use crate::types::EntityType;

/// User-agent fragments that mark automated traffic. Matched
/// case-insensitively as substrings.
const BOT_SIGNATURES: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "scraper",
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "go-http-client",
    "java/",
    "okhttp",
    "httpclient",
    "axios",
    "node-fetch",
    "libwww",
    "headless",
    "phantomjs",
    "selenium",
];

/// Outcome of an abuse check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked(BlockReason),
    /// The backing store could not be consulted; the caller decides whether
    /// this behaves as allowed (fail open) or blocked.
    Indeterminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    EmptyUserAgent,
    BotSignature,
    RateLimited,
    Duplicate,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::EmptyUserAgent => "empty_user_agent",
            BlockReason::BotSignature => "bot_signature",
            BlockReason::RateLimited => "rate_limited",
            BlockReason::Duplicate => "duplicate",
        }
    }
}

/// Returns true when the user-agent matches a known automation signature.
pub fn matches_bot_signature(user_agent: &str) -> bool {
    let lowered = user_agent.to_ascii_lowercase();
    BOT_SIGNATURES.iter().any(|sig| lowered.contains(sig))
}

/// Filter configuration.
#[derive(Debug, Clone)]
pub struct AbuseConfig {
    /// Maximum attempted views per IP inside the rate window.
    pub rate_limit_max: i64,
    pub rate_limit_window: Duration,
    /// Window during which repeat views of the same listing from the same IP
    /// are not re-counted.
    pub dedup_window: Duration,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            rate_limit_max: 10,
            rate_limit_window: Duration::from_secs(60),
            dedup_window: Duration::from_secs(300),
        }
    }
}

/// Per-request abuse filter: user-agent heuristics, a sliding per-IP rate
/// limit and a view deduplication marker.
pub struct AbuseFilter {
    store: Arc<dyn FilterStore>,
    config: AbuseConfig,
}

impl AbuseFilter {
    pub fn new(store: Arc<dyn FilterStore>, config: AbuseConfig) -> Self {
        Self { store, config }
    }

    /// Bot check for an inbound view. Every call bumps the per-IP counter,
    /// so attempted views count against the rate window too.
    pub async fn check_request(&self, client_ip: &str, user_agent: &str) -> Verdict {
        if user_agent.trim().is_empty() {
            return Verdict::Blocked(BlockReason::EmptyUserAgent);
        }
        if matches_bot_signature(user_agent) {
            return Verdict::Blocked(BlockReason::BotSignature);
        }

        let key = rate_limit_key(client_ip);
        match self
            .store
            .bump_counter(&key, self.config.rate_limit_window)
            .await
        {
            Ok(attempts) if attempts > self.config.rate_limit_max => {
                Verdict::Blocked(BlockReason::RateLimited)
            }
            Ok(_) => Verdict::Allowed,
            Err(e) => {
                warn!("rate limit store unavailable, failing open: {e}");
                Verdict::Indeterminate
            }
        }
    }

    /// Whether this `(ip, entity, listing)` view was already counted inside
    /// the dedup window.
    pub async fn check_duplicate(
        &self,
        client_ip: &str,
        entity_type: EntityType,
        listing_id: &str,
    ) -> Verdict {
        let key = dedup_key(client_ip, entity_type, listing_id);
        match self.store.marker_exists(&key).await {
            Ok(true) => Verdict::Blocked(BlockReason::Duplicate),
            Ok(false) => Verdict::Allowed,
            Err(e) => {
                warn!("dedup store unavailable, failing open: {e}");
                Verdict::Indeterminate
            }
        }
    }

    /// Record that a view was counted. Best effort: the view is already in
    /// the store, so a failure here is logged and swallowed.
    pub async fn record_view(
        &self,
        client_ip: &str,
        entity_type: EntityType,
        listing_id: &str,
    ) {
        let key = dedup_key(client_ip, entity_type, listing_id);
        if let Err(e) = self.store.set_marker(&key, self.config.dedup_window).await {
            warn!("failed to record dedup marker for {key}: {e}");
        }
    }
}

fn rate_limit_key(client_ip: &str) -> String {
    format!("ratelimit:{client_ip}")
}

fn dedup_key(client_ip: &str, entity_type: EntityType, listing_id: &str) -> String {
    format!("viewdedup:{client_ip}:{entity_type}:{listing_id}")
}

// ============================================================================
// Tests
// ============================================================================
