//! Metadata narrowing of retrieval candidates.
//!
//! Filtering is a pure narrowing step: survivors keep their input order and
//! score, and nothing is ever added or re-sorted.

use anyhow::Result;

use crate::index::IndexHit;
use crate::models::{Chunk, QueryFilters, RankedChunk};
use crate::store::Store;

/// Whether `chunk` satisfies every predicate present in `filters`.
///
/// Empty strings are treated as absent predicates.
pub fn matches(chunk: &Chunk, filters: &QueryFilters) -> bool {
    if let Some(ids) = &filters.material_ids {
        if !ids.contains(&chunk.material_id) {
            return false;
        }
    }

    let meta = &chunk.metadata;

    if let Some(material_type) = filters.material_type.as_deref().filter(|s| !s.is_empty()) {
        if meta.material_type != material_type {
            return false;
        }
    }

    if let Some(lecture) = filters.lecture_number {
        if meta.lecture_number != Some(lecture) {
            return false;
        }
    }

    if let Some(topic) = filters.topic.as_deref().filter(|s| !s.is_empty()) {
        let chunk_topic = meta.topic.as_deref().unwrap_or("").to_lowercase();
        if !chunk_topic.contains(&topic.to_lowercase()) {
            return false;
        }
    }

    true
}

/// Resolve `hits` against the store and keep those matching `filters`.
///
/// Ids with no stored chunk are stale and silently skipped.
pub async fn resolve_and_filter(
    store: &dyn Store,
    hits: &[IndexHit],
    filters: &QueryFilters,
) -> Result<Vec<RankedChunk>> {
    let mut survivors = Vec::with_capacity(hits.len());
    let mut stale = 0usize;

    for hit in hits {
        let Some(chunk) = store.get_chunk(&hit.chunk_id).await? else {
            stale += 1;
            continue;
        };
        if matches(&chunk, filters) {
            survivors.push(RankedChunk {
                chunk,
                score: f64::from(hit.score),
            });
        }
    }

    if stale > 0 {
        tracing::warn!(stale, "index references chunks missing from the store");
    }
    tracing::debug!(
        candidates = hits.len(),
        survivors = survivors.len(),
        "metadata filter applied"
    );

    Ok(survivors)
}
