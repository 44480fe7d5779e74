//! Multi-channel quota merging
//!
//! Co-registered channels share one brick grid. While interacting, each
//! channel is allowed a quota of bricks per slice; the merger builds one
//! deduplicated, view-ordered brick list that every channel then draws, so
//! all channels cover the same region in the same order.

use std::collections::HashSet;

use crate::core::config::UpdateOrder;
use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::math::ViewState;
use crate::volume::{BrickCatalog, BrickId};
use super::view_sort::{rank_by_center, rank_by_view};

/// Split a slice's brick quota between channels
///
/// The selected channel is served first, then its neighbours alternately
/// above and below (+1, -1, +2, -2, ...), each up to its own brick count,
/// until the quota is used up. Channels not reached get 0.
pub fn distribute_channel_quota(
    total: usize,
    brick_counts: &[usize],
    selected: usize,
) -> Result<Vec<usize>> {
    let mut quotas = vec![0; brick_counts.len()];
    let Some(&selected_count) = brick_counts.get(selected) else {
        return Err(Error::UnknownChannel(selected));
    };
    if brick_counts.len() == 1 {
        quotas[0] = total;
        return Ok(quotas);
    }

    quotas[selected] = selected_count.min(total);
    let mut assigned = selected_count;
    let mut visited = 1;
    let mut step = 0usize;
    while assigned < total && visited < brick_counts.len() {
        let offset = step / 2 + 1;
        let index = if step % 2 == 0 {
            selected.checked_add(offset)
        } else {
            selected.checked_sub(offset)
        };
        step += 1;

        let Some(index) = index.filter(|&i| i < brick_counts.len()) else {
            continue;
        };
        let share = brick_counts[index].min(total - assigned);
        quotas[index] = share;
        assigned += share;
        visited += 1;
    }
    Ok(quotas)
}

/// Builds one shared quota list for channels on the same brick grid
#[derive(Clone, Debug, Default)]
pub struct MultiChannelQuotaMerger {
    order: UpdateOrder,
    merged: Vec<BrickId>,
}

impl MultiChannelQuotaMerger {
    pub fn new(order: UpdateOrder) -> Self {
        Self { order, merged: Vec::new() }
    }

    pub fn set_order(&mut self, order: UpdateOrder) {
        self.order = order;
    }

    /// Last merged list
    pub fn merged(&self) -> &[BrickId] {
        &self.merged
    }

    /// Merge per-channel quotas around `center` into one view-ordered list
    ///
    /// Each channel contributes up to `quotas[i]` drawable bricks nearest to
    /// `center` that no earlier channel already selected. The result is
    /// stored as the quota of every channel. When channel 0 does not need a
    /// resort, the previous list is returned untouched.
    pub fn merge(
        &mut self,
        channels: &mut [BrickCatalog],
        quotas: &[usize],
        center: Vec3,
        view: &ViewState,
    ) -> Result<&[BrickId]> {
        let Some((first, rest)) = channels.split_first() else {
            self.merged.clear();
            return Ok(&self.merged);
        };
        for (i, channel) in rest.iter().enumerate() {
            if !channel.shares_partition(first) {
                return Err(Error::GridMismatch {
                    channel: i + 1,
                    expected: first.len(),
                    found: channel.len(),
                });
            }
        }
        if !first.needs_resort() {
            return Ok(&self.merged);
        }

        let mut merged = Vec::new();
        let mut selected = HashSet::new();
        for (i, channel) in channels.iter_mut().enumerate() {
            let quota = quotas.get(i).copied().unwrap_or(0);
            let nearest = rank_by_center(channel.bricks_mut(), center);

            let mut count = 0;
            for id in nearest {
                if count == quota {
                    break;
                }
                if !channel.bricks()[id.index()].is_drawable() || !selected.insert(id) {
                    continue;
                }
                merged.push(id);
                count += 1;
            }
        }

        let ray = view.ray();
        rank_by_view(channels[0].bricks_mut(), &mut merged, &ray, view.orthographic, self.order);

        for channel in channels.iter_mut() {
            channel.quota.clone_from(&merged);
            channel.clear_needs_resort();
        }
        log::debug!(
            "Merged quota of {} bricks across {} channels",
            merged.len(), channels.len()
        );

        self.merged = merged;
        Ok(&self.merged)
    }
}
