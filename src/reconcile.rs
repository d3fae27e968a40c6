//! Merging a freshly fetched company list with locally tracked state.
//!
//! The server knows nothing about what this device has seen or clapped, so
//! every refresh copies those flags across from the previous snapshot and
//! re-partitions the strip so unfinished companies come first.

use std::collections::{HashMap, HashSet};

use crate::cache::ContentCache;
use crate::model::Company;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderMode {
    /// After a refresh: keep server order inside each partition.
    Refresh,
    /// After a viewing session: fully seen companies fall back to server rank.
    SessionExit,
}

/// Drop companies whose story count disagrees with their stories, or that
/// have none.
pub fn validate(companies: Vec<Company>) -> Vec<Company> {
    let before = companies.len();
    let valid: Vec<Company> = companies
        .into_iter()
        .filter(|c| {
            !c.stories.is_empty()
                && usize::try_from(c.story_count).is_ok_and(|n| n == c.stories.len())
        })
        .collect();

    let dropped = before - valid.len();
    if dropped > 0 {
        tracing::debug!(dropped, kept = valid.len(), "Dropped malformed companies");
    }
    valid
}

/// Order each company's stories oldest first. Ties keep feed order.
pub fn sort_stories(companies: &mut [Company]) {
    for company in companies {
        company.stories.sort_by_key(|s| s.created_at);
    }
}

/// Carry `is_seen` / `is_clapped` over from `prior` for every
/// `(company_id, story_id)` pair that still exists. New pairs stay unset.
pub fn merge_local_state(fresh: &mut [Company], prior: &[Company]) {
    let flags: HashMap<(i64, &str), (bool, bool)> = prior
        .iter()
        .flat_map(|c| {
            c.stories
                .iter()
                .map(move |s| ((c.company_id, s.story_id.as_str()), (s.is_seen, s.is_clapped)))
        })
        .collect();

    let mut carried = 0usize;
    for company in fresh.iter_mut() {
        for story in company.stories.iter_mut() {
            match flags.get(&(company.company_id, story.story_id.as_str())) {
                Some(&(seen, clapped)) => {
                    story.is_seen = seen;
                    story.is_clapped = clapped;
                    carried += 1;
                }
                None => {
                    story.is_seen = false;
                    story.is_clapped = false;
                }
            }
        }
    }
    tracing::trace!(carried, "Merged local story state");
}

/// Stable partition: companies with something left to watch, then fully
/// seen ones.
pub fn reorder(companies: Vec<Company>, mode: ReorderMode) -> Vec<Company> {
    let (mut unseen, mut seen): (Vec<Company>, Vec<Company>) =
        companies.into_iter().partition(|c| !c.all_seen());

    if mode == ReorderMode::SessionExit {
        seen.sort_by_key(|c| c.rank);
    }

    unseen.append(&mut seen);
    unseen
}

/// Full refresh pipeline: validate, sort, merge flags, reorder.
pub fn reconcile(fresh: Vec<Company>, prior: &[Company]) -> Vec<Company> {
    let mut companies = validate(fresh);
    sort_stories(&mut companies);
    merge_local_state(&mut companies, prior);
    reorder(companies, ReorderMode::Refresh)
}

/// Keys the cache is allowed to hold for `companies`: logos and story media.
pub fn valid_cache_keys(companies: &[Company]) -> HashSet<String> {
    companies
        .iter()
        .flat_map(|c| {
            std::iter::once(c.external_id.clone())
                .chain(c.stories.iter().map(|s| s.story_id.clone()))
        })
        .collect()
}

/// Evict every cached blob that no longer belongs to a company or story in
/// `companies`. Returns how many were evicted.
pub async fn purge_cache(companies: &[Company], cache: &ContentCache) -> usize {
    let valid = valid_cache_keys(companies);
    let mut evicted = 0;

    for key in cache.list_keys().await {
        if valid.contains(&key) {
            continue;
        }
        match cache.evict(&key).await {
            Ok(()) => evicted += 1,
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to evict stale cache entry"),
        }
    }

    if evicted > 0 {
        tracing::info!(evicted, "Purged stale cache entries");
    }
    evicted
}
