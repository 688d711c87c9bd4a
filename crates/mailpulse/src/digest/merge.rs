//! Pure merge of category buckets.

use std::collections::HashSet;

use super::model::{CategoryBuckets, SummaryEntry};

/// Priority assumed for entries that carry none.
pub const DEFAULT_PRIORITY: u8 = 50;

fn effective_priority(entry: &SummaryEntry) -> u8 {
    entry.priority.unwrap_or(DEFAULT_PRIORITY)
}

/// Merges `incoming` into `existing`.
///
/// Source message ids are unique across the whole result: an incoming entry
/// whose id is already present anywhere is dropped. Every bucket comes back
/// sorted by priority, highest first; equal priorities keep arrival order.
/// Buckets left empty are omitted.
pub fn merge_buckets(existing: &CategoryBuckets, incoming: CategoryBuckets) -> CategoryBuckets {
    let mut merged = existing.clone();
    let mut seen: HashSet<String> = existing
        .values()
        .flatten()
        .map(|e| e.source_message_id.clone())
        .collect();

    for (category, entries) in incoming {
        for entry in entries {
            if seen.insert(entry.source_message_id.clone()) {
                merged.entry(category.clone()).or_default().push(entry);
            }
        }
    }

    merged.retain(|_, entries| !entries.is_empty());
    for entries in merged.values_mut() {
        entries.sort_by_key(|e| std::cmp::Reverse(effective_priority(e)));
    }
    merged
}
