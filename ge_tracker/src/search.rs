//! Ranked item name search over the in-memory directory

use crate::directory::DirectorySnapshot;
use crate::models::Item;

/// Queries shorter than this return nothing
pub const MIN_QUERY_LEN: usize = 2;

/// Case-insensitive name search
///
/// The query is matched as given, surrounding whitespace included.
/// Prefix matches come first, then names that merely contain the query, each
/// group in directory order. Stops as soon as `limit` items are collected.
pub fn search(snapshot: &DirectorySnapshot, query: &str, limit: usize) -> Vec<Item> {
    let query = query.to_lowercase();
    if query.chars().count() < MIN_QUERY_LEN || limit == 0 {
        return Vec::new();
    }

    let mut results = Vec::with_capacity(limit.min(snapshot.len()));

    for (name, item) in snapshot.entries() {
        if name.starts_with(&query) {
            results.push(item.clone());
            if results.len() >= limit {
                return results;
            }
        }
    }

    for (name, item) in snapshot.entries() {
        if !name.starts_with(&query) && name.contains(&query) {
            results.push(item.clone());
            if results.len() >= limit {
                return results;
            }
        }
    }

    results
}
