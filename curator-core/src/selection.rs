use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::archive::CandidateVideo;

/// Builds the selection pool from raw search records: dedupe by identifier
/// keeping the first occurrence, drop clips whose known duration exceeds
/// the cap, sort by popularity descending, truncate to the top `pool_size`.
///
/// A duration of 0 means the archive did not report one; those are kept.
pub fn build_pool(
    records: Vec<CandidateVideo>,
    max_duration_seconds: u64,
    pool_size: usize,
) -> Vec<CandidateVideo> {
    let mut seen = HashSet::new();
    let mut pool = Vec::new();
    for record in records {
        if !seen.insert(record.identifier.clone()) {
            continue;
        }
        if record.duration_seconds > 0 && record.duration_seconds > max_duration_seconds {
            continue;
        }
        pool.push(record);
    }
    pool.sort_by(|a, b| b.popularity.cmp(&a.popularity));
    pool.truncate(pool_size);
    pool
}

/// Draws up to `k` distinct candidates uniformly without replacement.
///
/// Deterministic as long as the RNG is seeded with a reproducible seed.
pub fn draw_candidates<R>(pool: &[CandidateVideo], k: usize, rng: &mut R) -> Vec<CandidateVideo>
where
    R: Rng + ?Sized,
{
    if pool.is_empty() || k == 0 {
        return Vec::new();
    }
    let limit = k.min(pool.len());
    pool.choose_multiple(rng, limit).cloned().collect()
}
