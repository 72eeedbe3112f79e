//! Boot-time priority compaction and slot reorder
//!
//! Both are pure functions over plain arrays so they can be reasoned about
//! and tested without any storage behind them.

use crate::data::DeviceId;

/// Remove empty entries and duplicates from a priority list
///
/// Non-zero ids keep their relative order and move to the front. The first
/// occurrence of a duplicated id wins. The result has the same length as
/// the input, padded with empty entries.
pub fn compact_priority(list: &[DeviceId]) -> Vec<DeviceId> {
    let mut out: Vec<DeviceId> = Vec::with_capacity(list.len());
    for &id in list {
        if !id.is_none() && !out.contains(&id) {
            out.push(id);
        }
    }
    out.resize(list.len(), DeviceId::NONE);
    out
}

/// Permute `items` so the item whose id equals `priority[r]` sits at index `r`
///
/// One pass over the ranks with at most one swap per rank. Ranks whose id is
/// empty or not present among the items are left alone. `priority` must be
/// free of duplicates (see [`compact_priority`]). Returns the swaps
/// performed as `(rank, from)` pairs; running it again on the result
/// performs none.
pub fn reorder_by_priority<T>(
    priority: &[DeviceId],
    items: &mut [T],
    id_of: impl Fn(&T) -> DeviceId,
) -> Vec<(usize, usize)> {
    let mut swaps = Vec::new();
    for (rank, &wanted) in priority.iter().enumerate().take(items.len()) {
        if wanted.is_none() || id_of(&items[rank]) == wanted {
            continue;
        }
        let found = (0..items.len()).find(|&j| j != rank && id_of(&items[j]) == wanted);
        if let Some(from) = found {
            items.swap(rank, from);
            swaps.push((rank, from));
        }
    }
    swaps
}
