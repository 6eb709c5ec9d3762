//! Downstream filter groups.
//!
//! A node may have several downstream edges gated by filter predicates,
//! grouped either `Mutex` (exactly one edge in the group should end up
//! taking the packet; a miss rotates to the next filter in the group) or
//! `Equal` (the group always rotates round-robin, e.g. load balancing
//! across equivalent consumers). Each filter's mask bit is cleared from
//! `next_hop_filter` once that edge is confirmed to take the packet, by
//! XORing `universe_mask` with that specific filter's own bit — every
//! filter gets its own complement, not just the group's first member.

use crate::packet::Packet;
use std::collections::HashSet;
use std::sync::Arc;

pub type Filter = Arc<dyn Fn(*const Packet) -> bool + Send + Sync>;

pub fn default_filter() -> Filter {
    Arc::new(|_packet| true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterGroupType {
    /// Exactly one filter in the group should match; on a miss, try the
    /// next filter in rotation starting after the last match.
    Mutex,
    /// Every call rotates to the next filter regardless of match.
    Equal,
}

pub struct FilterGroup {
    filters: Vec<Filter>,
    filter_masks: Vec<u32>,
    universe_mask: u32,
    group_type: FilterGroupType,
    last_apply: usize,
}

impl FilterGroup {
    pub fn new(
        filters: Vec<Filter>,
        mut filter_masks: Vec<u32>,
        group_type: FilterGroupType,
    ) -> Self {
        let universe_mask = filter_masks.iter().fold(0u32, |acc, m| acc | m);
        for mask in filter_masks.iter_mut() {
            *mask ^= universe_mask;
        }
        Self {
            filters,
            filter_masks,
            universe_mask,
            group_type,
            last_apply: 0,
        }
    }
}

/// Build the filter groups for a module's downstream edges.
///
/// `groups` gives, for each group, the set of indices into `filters` /
/// `filter_masks` that belong to it.
pub fn register_downstream_filters(
    filters: &[Filter],
    filter_masks: &[u32],
    groups: &[HashSet<usize>],
    group_types: &[FilterGroupType],
) -> Vec<FilterGroup> {
    groups
        .iter()
        .zip(group_types.iter())
        .map(|(group_ids, &group_type)| {
            let mut group_filters = Vec::with_capacity(group_ids.len());
            let mut group_masks = Vec::with_capacity(group_ids.len());
            for &idx in group_ids {
                group_filters.push(filters[idx].clone());
                group_masks.push(filter_masks[idx]);
            }
            FilterGroup::new(group_filters, group_masks, group_type)
        })
        .collect()
}

/// Apply every filter group to `packet`, clearing `mask`'s bits for edges
/// whose filter accepted the packet.
pub fn apply_downstream_filters(groups: &mut [FilterGroup], mask: &mut u32, packet: *const Packet) {
    for group in groups.iter_mut() {
        if *mask & group.universe_mask == 0 {
            continue;
        }
        match group.group_type {
            FilterGroupType::Mutex => {
                let idx = group.last_apply;
                if (group.filters[idx])(packet) {
                    *mask ^= group.filter_masks[idx];
                    continue;
                }
                for _ in 1..group.filters.len() {
                    group.last_apply = (group.last_apply + 1) % group.filters.len();
                    let idx = group.last_apply;
                    if (group.filters[idx])(packet) {
                        *mask ^= group.filter_masks[idx];
                        break;
                    }
                }
            }
            FilterGroupType::Equal => {
                group.last_apply = (group.last_apply + 1) % group.filters.len();
                let idx = group.last_apply;
                *mask ^= group.filter_masks[idx];
            }
        }
    }
}
