//! Recency-weighted trending score.
//!
//! The score is a pure function of `(view_count, last_viewed_at, now)` and is
//! recomputed on every read; it is never persisted. The store hands back a
//! candidate set pre-sorted by raw view count and recency, and [`rank`]
//! re-orders it by decayed score.

use std::cmp::Ordering;

use crate::types::{TrendingEntry, ViewTracking};

/// Multiplier applied per full day since the last view.
pub const DECAY_FACTOR: f64 = 0.9;

const MS_PER_DAY: i64 = 86_400_000;

/// Whole days elapsed between `last_viewed_at` and `now` (both epoch ms).
/// Clock skew into the future counts as zero days.
pub fn days_since(last_viewed_at: i64, now: i64) -> i64 {
    (now - last_viewed_at).max(0) / MS_PER_DAY
}

/// `view_count * DECAY_FACTOR^days_since_last_view`.
///
/// For `days == 0` the score equals the raw view count; for a fixed count it
/// strictly decreases as days increase.
pub fn trending_score(view_count: i64, last_viewed_at: i64, now: i64) -> f64 {
    let days = days_since(last_viewed_at, now).min(i32::MAX as i64) as i32;
    view_count as f64 * DECAY_FACTOR.powi(days)
}

/// Score a candidate set, sort by score descending and truncate to `limit`.
///
/// Ties break on raw view count, then recency, so the ordering is
/// deterministic for equal scores.
pub fn rank(candidates: Vec<ViewTracking>, limit: usize, now: i64) -> Vec<TrendingEntry> {
    let mut entries: Vec<TrendingEntry> = candidates
        .into_iter()
        .map(|row| TrendingEntry {
            entity_type: row.entity_type,
            listing_id: row.listing_id,
            view_count: row.view_count,
            trending_score: trending_score(row.view_count, row.last_viewed_at, now),
            last_viewed_at: row.last_viewed_at,
        })
        .collect();

    entries.sort_by(|a, b| {
        b.trending_score
            .partial_cmp(&a.trending_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.view_count.cmp(&a.view_count))
            .then_with(|| b.last_viewed_at.cmp(&a.last_viewed_at))
    });
    entries.truncate(limit);
    entries
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityType;

    fn row(listing: &str, count: i64, last_viewed_at: i64) -> ViewTracking {
        let mut row = ViewTracking::new(EntityType::Product, listing, last_viewed_at);
        row.view_count = count;
        row
    }

    #[test]
    fn test_score_equals_count_on_day_zero() {
        let now = 1_704_067_200_000;
        assert_eq!(trending_score(42, now, now), 42.0);
        // less than a full day still counts as day zero
        assert_eq!(trending_score(42, now - MS_PER_DAY + 1, now), 42.0);
    }

    #[test]
    fn test_score_strictly_decreases_with_age() {
        let now = 1_704_067_200_000;
        let mut previous = f64::MAX;
        for days in 0..30 {
            let score = trending_score(100, now - days * MS_PER_DAY, now);
            assert!(score < previous, "score must decay at day {days}");
            previous = score;
        }
    }

    #[test]
    fn test_score_future_timestamp_is_day_zero() {
        let now = 1_704_067_200_000;
        assert_eq!(trending_score(5, now + MS_PER_DAY, now), 5.0);
    }

    #[test]
    fn test_rank_reorders_by_decayed_score() {
        let now = 1_704_067_200_000;
        // "stale" has more raw views but decays below "fresh":
        // 100 * 0.9^10 ~= 34.9 < 40.
        let candidates = vec![
            row("stale", 100, now - 10 * MS_PER_DAY),
            row("fresh", 40, now),
        ];

        let ranked = rank(candidates, 10, now);
        assert_eq!(ranked[0].listing_id, "fresh");
        assert_eq!(ranked[0].trending_score, 40.0);
        assert_eq!(ranked[1].listing_id, "stale");
        assert!(ranked[1].trending_score < 35.0);
    }

    #[test]
    fn test_rank_truncates_to_limit() {
        let now = 1_704_067_200_000;
        let candidates = (0..20).map(|i| row(&format!("l{i}"), i, now)).collect();
        let ranked = rank(candidates, 5, now);
        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0].view_count, 19);
    }

    #[test]
    fn test_rank_ties_break_on_recency() {
        let now = 1_704_067_200_000;
        let candidates = vec![
            row("older", 10, now - 1000),
            row("newer", 10, now),
        ];
        let ranked = rank(candidates, 2, now);
        assert_eq!(ranked[0].listing_id, "newer");
    }
}
