//! Gap bridging for active key windows.
//!
//! A fetch strategy produces a target window such as `[2, 7]`. If pages 3 and
//! 5 are already loaded (or loading), dropping them would punch a hole into
//! the flattened list, so they are bridged in: the published window becomes
//! `[2, 3, 5, 7]`. Keys that are neither loaded nor loading are not added;
//! bridging never starts new loads.
//!
//! Walks use the key space's `next_key` and are bounded by `max_steps`. A walk
//! only contributes keys when it actually arrives at the following window
//! key. Walks that run into "no next key" or exhaust the bound contribute
//! nothing, since there is no evidence the keys they visited lie between the
//! pair.

use crate::PageKey;
use std::collections::HashSet;

/// Keys strictly between `from` and `to` that satisfy `is_present`, in walk
/// order. Empty unless `to` is reached within `max_steps` applications of
/// `next`.
pub fn bridged_between<K, N, P>(from: &K, to: &K, next: N, is_present: P, max_steps: usize) -> Vec<K>
where
    K: PageKey,
    N: Fn(&K) -> Option<K>,
    P: Fn(&K) -> bool,
{
    let mut found = Vec::new();
    let mut current = next(from);
    let mut steps = 1;

    while let Some(key) = current {
        if key == *to {
            return found;
        }
        if steps >= max_steps {
            break;
        }
        if is_present(&key) {
            found.push(key.clone());
        }
        current = next(&key);
        steps += 1;
    }

    Vec::new()
}

/// Whether `to` is reachable from `from` within `max_steps` applications of `next`.
pub fn reaches<K, N>(from: &K, to: &K, next: N, max_steps: usize) -> bool
where
    K: PageKey,
    N: Fn(&K) -> Option<K>,
{
    let mut current = next(from);
    let mut steps = 1;

    while let Some(key) = current {
        if key == *to {
            return true;
        }
        if steps >= max_steps {
            return false;
        }
        current = next(&key);
        steps += 1;
    }

    false
}

/// Insert bridged keys between every adjacent pair of `target`.
///
/// The result keeps every target key, places bridged keys right after the
/// pair member that discovered them, and drops duplicates keeping the first
/// occurrence.
pub fn bridge_window<K, N, P>(target: &[K], next: N, is_present: P, max_steps: usize) -> Vec<K>
where
    K: PageKey,
    N: Fn(&K) -> Option<K>,
    P: Fn(&K) -> bool,
{
    let mut merged = Vec::with_capacity(target.len());
    let mut seen = HashSet::with_capacity(target.len());

    for (i, key) in target.iter().enumerate() {
        if seen.insert(key.clone()) {
            merged.push(key.clone());
        }

        let Some(following) = target.get(i + 1) else {
            continue;
        };

        for bridged in bridged_between(key, following, &next, &is_present, max_steps) {
            if seen.insert(bridged.clone()) {
                merged.push(bridged);
            }
        }
    }

    merged
}

/// Place `key` into `window` at its natural position.
///
/// The key goes in front of the first window key reachable from it, or at
/// the end when none is. A key already in the window leaves it unchanged.
pub fn insert_key<K, N>(window: &[K], key: K, next: N, max_steps: usize) -> Vec<K>
where
    K: PageKey,
    N: Fn(&K) -> Option<K>,
{
    if window.contains(&key) {
        return window.to_vec();
    }

    let position = window
        .iter()
        .position(|existing| reaches(&key, existing, &next, max_steps))
        .unwrap_or(window.len());

    let mut merged = Vec::with_capacity(window.len() + 1);
    merged.extend_from_slice(&window[..position]);
    merged.push(key);
    merged.extend_from_slice(&window[position..]);
    merged
}

// =============================================================================
// TESTS
// =============================================================================
