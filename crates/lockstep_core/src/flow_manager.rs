//! Flow-field pooling and lifecycle.
//!
//! Fields are created lazily on first request for a target cell and
//! shared by every agent heading there (reference counted). Map changes
//! mark overlapping fields dirty; recomputation is budgeted per tick so
//! a wall placed across ten fields does not stall a frame. Fields with
//! no users are evicted when the pool is full.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::flow::{self, FieldId, FlowField};
use crate::map::{GridMap, GridRect};
use crate::math::{Fixed, FixedVec2};
use crate::world::Tick;

/// Snapshot of one field's bookkeeping, for debug UIs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowFieldInfo {
    /// Pool handle.
    pub id: FieldId,
    /// Target cell x.
    pub target_x: i32,
    /// Target cell y.
    pub target_y: i32,
    /// Live users.
    pub ref_count: u32,
    /// Whether a recompute is pending.
    pub dirty: bool,
    /// Tick of the last recompute.
    pub last_update_tick: Tick,
}

/// Owner of all pooled flow fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowFieldManager {
    /// Target cell to field handle.
    cache: BTreeMap<(i32, i32), FieldId>,
    /// All live fields by handle.
    fields: BTreeMap<FieldId, FlowField>,
    /// Recompute queue, drained under the per-tick budget.
    dirty_queue: VecDeque<FieldId>,
    /// Guard against double-enqueueing a dirty field.
    dirty_set: BTreeSet<FieldId>,
    next_field_id: FieldId,
    max_cached_fields: usize,
    max_updates_per_frame: u32,
}

impl FlowFieldManager {
    /// Create a pool with the given cache capacity and per-tick
    /// recompute budget.
    #[must_use]
    pub fn new(max_cached_fields: usize, max_updates_per_frame: u32) -> Self {
        Self {
            cache: BTreeMap::new(),
            fields: BTreeMap::new(),
            dirty_queue: VecDeque::new(),
            dirty_set: BTreeSet::new(),
            next_field_id: 0,
            max_cached_fields,
            max_updates_per_frame,
        }
    }

    /// Request a field toward a world position.
    pub fn request_flow_field(
        &mut self,
        map: &impl GridMap,
        target: FixedVec2,
        tick: Tick,
    ) -> FieldId {
        let (grid_x, grid_y) = map.world_to_grid(target);
        self.request_flow_field_to_grid(map, grid_x, grid_y, tick)
    }

    /// Request a field toward a grid cell.
    ///
    /// An existing field for the cell is shared with its reference
    /// count incremented; otherwise a new field is computed, evicting
    /// zero-reference fields first when the pool is full.
    pub fn request_flow_field_to_grid(
        &mut self,
        map: &impl GridMap,
        target_x: i32,
        target_y: i32,
        tick: Tick,
    ) -> FieldId {
        if let Some(&id) = self.cache.get(&(target_x, target_y)) {
            if let Some(field) = self.fields.get_mut(&id) {
                field.ref_count += 1;
                return id;
            }
        }

        if self.fields.len() >= self.max_cached_fields {
            self.cleanup_unused();
        }

        let id = self.next_field_id;
        self.next_field_id += 1;

        let mut field = FlowField::new(id, map.width(), map.height());
        field.ref_count = 1;
        flow::calculate(&mut field, map, target_x, target_y);
        field.last_update_tick = tick;

        tracing::debug!(field = id, target_x, target_y, "Flow field computed");
        self.cache.insert((target_x, target_y), id);
        self.fields.insert(id, field);
        id
    }

    /// Drop one reference to a field.
    ///
    /// At zero references the field becomes eligible for eviction; it
    /// is never sampled again through a released handle by well-behaved
    /// callers, and stale handles degrade to zero vectors.
    pub fn release_flow_field(&mut self, id: FieldId) {
        match self.fields.get_mut(&id) {
            Some(field) => {
                if field.ref_count == 0 {
                    tracing::warn!(field = id, "Release of flow field with no references");
                } else {
                    field.ref_count -= 1;
                }
            }
            None => tracing::warn!(field = id, "Release of unknown flow field"),
        }
    }

    /// Direction toward the target at a world position.
    ///
    /// Zero for stale handles, out-of-field positions, unreachable
    /// cells, and the target cell itself.
    #[must_use]
    pub fn sample_direction(
        &self,
        map: &impl GridMap,
        id: FieldId,
        world_pos: FixedVec2,
    ) -> FixedVec2 {
        let Some(field) = self.fields.get(&id) else {
            tracing::warn!(field = id, "Sampled direction from unknown flow field");
            return FixedVec2::ZERO;
        };
        let (grid_x, grid_y) = map.world_to_grid(world_pos);
        field.direction_at(grid_x, grid_y)
    }

    /// Cost to the target at a world position, `Fixed::INFINITY` when
    /// unknown or unreachable.
    #[must_use]
    pub fn sample_cost(&self, map: &impl GridMap, id: FieldId, world_pos: FixedVec2) -> Fixed {
        let Some(field) = self.fields.get(&id) else {
            return Fixed::INFINITY;
        };
        let (grid_x, grid_y) = map.world_to_grid(world_pos);
        field.cost_at(grid_x, grid_y)
    }

    /// Whether a position is within `threshold` cost of the target.
    #[must_use]
    pub fn is_at_target(
        &self,
        map: &impl GridMap,
        id: FieldId,
        world_pos: FixedVec2,
        threshold: Fixed,
    ) -> bool {
        self.sample_cost(map, id, world_pos) < threshold
    }

    /// Flag referenced fields whose target lies in the dirtied rect.
    ///
    /// Recomputation happens over subsequent [`Self::tick`] calls under
    /// the per-tick budget, not immediately.
    pub fn mark_region_dirty(&mut self, rect: GridRect) {
        for (&id, field) in &mut self.fields {
            if field.ref_count == 0 {
                continue;
            }
            if rect.contains(field.target_x, field.target_y) {
                field.dirty = true;
                if self.dirty_set.insert(id) {
                    self.dirty_queue.push_back(id);
                }
            }
        }
    }

    /// Per-tick maintenance: recompute at most `max_updates_per_frame`
    /// dirty fields.
    pub fn tick(&mut self, map: &impl GridMap, current_tick: Tick) {
        let mut updated = 0;
        while updated < self.max_updates_per_frame {
            let Some(id) = self.dirty_queue.pop_front() else {
                break;
            };
            self.dirty_set.remove(&id);

            if let Some(field) = self.fields.get_mut(&id) {
                if field.dirty {
                    let (target_x, target_y) = (field.target_x, field.target_y);
                    flow::calculate(field, map, target_x, target_y);
                    field.last_update_tick = current_tick;
                    updated += 1;
                    tracing::debug!(field = id, tick = current_tick, "Flow field recomputed");
                }
            }
        }
    }

    /// Recompute one field immediately, outside the budget.
    pub fn force_update(&mut self, map: &impl GridMap, id: FieldId, current_tick: Tick) {
        if let Some(field) = self.fields.get_mut(&id) {
            let (target_x, target_y) = (field.target_x, field.target_y);
            flow::calculate(field, map, target_x, target_y);
            field.last_update_tick = current_tick;
        }
    }

    /// Bookkeeping snapshot for a field.
    #[must_use]
    pub fn field_info(&self, id: FieldId) -> Option<FlowFieldInfo> {
        self.fields.get(&id).map(|field| FlowFieldInfo {
            id: field.id,
            target_x: field.target_x,
            target_y: field.target_y,
            ref_count: field.ref_count,
            dirty: field.dirty,
            last_update_tick: field.last_update_tick,
        })
    }

    /// Direct field access for tests and debug overlays.
    #[must_use]
    pub fn field(&self, id: FieldId) -> Option<&FlowField> {
        self.fields.get(&id)
    }

    /// Number of live fields.
    #[must_use]
    pub fn active_field_count(&self) -> usize {
        self.fields.len()
    }

    /// Evict every field with no references.
    pub fn cleanup_unused(&mut self) {
        let unused: Vec<FieldId> = self
            .fields
            .iter()
            .filter(|(_, field)| field.ref_count == 0)
            .map(|(&id, _)| id)
            .collect();

        for id in unused {
            self.fields.remove(&id);
            self.cache.retain(|_, &mut cached| cached != id);
            self.dirty_set.remove(&id);
            tracing::debug!(field = id, "Flow field evicted");
        }
        self.dirty_queue.retain(|id| self.fields.contains_key(id));
    }

    /// Drop every field.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.fields.clear();
        self.dirty_queue.clear();
        self.dirty_set.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{CellType, WorldMap};

    fn setup() -> (WorldMap, FlowFieldManager) {
        (
            WorldMap::new(16, 16, Fixed::ONE),
            FlowFieldManager::new(4, 2),
        )
    }

    #[test]
    fn test_request_shares_fields_and_counts_references() {
        let (map, mut manager) = setup();
        let target = FixedVec2::from_ints(8, 8);

        let a = manager.request_flow_field(&map, target, 0);
        let b = manager.request_flow_field(&map, target, 0);
        assert_eq!(a, b);
        assert_eq!(manager.field_info(a).unwrap().ref_count, 2);
        assert_eq!(manager.active_field_count(), 1);

        manager.release_flow_field(a);
        assert_eq!(manager.field_info(a).unwrap().ref_count, 1);
        manager.release_flow_field(a);
        assert_eq!(manager.field_info(a).unwrap().ref_count, 0);

        // Underflow is clamped and logged, not fatal
        manager.release_flow_field(a);
        assert_eq!(manager.field_info(a).unwrap().ref_count, 0);
    }

    #[test]
    fn test_zero_ref_fields_evicted_when_pool_full() {
        let (map, mut manager) = setup();

        let first = manager.request_flow_field(&map, FixedVec2::from_ints(1, 1), 0);
        manager.release_flow_field(first);

        for i in 2..6 {
            manager.request_flow_field(&map, FixedVec2::from_ints(i, i), 0);
        }

        // Capacity is 4: the released field must have been evicted
        assert!(manager.field_info(first).is_none());
        assert_eq!(manager.sample_cost(&map, first, FixedVec2::ZERO), Fixed::INFINITY);
    }

    #[test]
    fn test_dirty_region_recompute_respects_budget() {
        let (mut map, mut manager) = setup();

        let ids: Vec<_> = (0..3)
            .map(|i| manager.request_flow_field(&map, FixedVec2::from_ints(2 + i, 2), 0))
            .collect();

        map.set_cell(5, 5, CellType::Blocked);
        manager.mark_region_dirty(GridRect::new(0, 0, 15, 15));
        for &id in &ids {
            assert!(manager.field_info(id).unwrap().dirty);
        }

        // Budget is 2 per tick: one field stays dirty after the first
        manager.tick(&map, 1);
        let dirty_after: usize = ids
            .iter()
            .filter(|&&id| manager.field_info(id).unwrap().dirty)
            .count();
        assert_eq!(dirty_after, 1);

        manager.tick(&map, 2);
        assert!(ids.iter().all(|&id| !manager.field_info(id).unwrap().dirty));
        assert_eq!(manager.field_info(ids[2]).unwrap().last_update_tick, 2);
    }

    #[test]
    fn test_dirty_marking_skips_unreferenced_and_outside_targets() {
        let (map, mut manager) = setup();

        let kept = manager.request_flow_field(&map, FixedVec2::from_ints(2, 2), 0);
        let released = manager.request_flow_field(&map, FixedVec2::from_ints(3, 3), 0);
        let outside = manager.request_flow_field(&map, FixedVec2::from_ints(12, 12), 0);
        manager.release_flow_field(released);

        manager.mark_region_dirty(GridRect::new(0, 0, 5, 5));

        assert!(manager.field_info(kept).unwrap().dirty);
        assert!(!manager.field_info(released).unwrap().dirty);
        assert!(!manager.field_info(outside).unwrap().dirty);
    }

    #[test]
    fn test_recompute_follows_map_change() {
        let (mut map, mut manager) = setup();
        let target = FixedVec2::from_ints(8, 8);
        let id = manager.request_flow_field(&map, target, 0);

        let probe = FixedVec2::from_ints(2, 8);
        let before = manager.sample_cost(&map, id, probe);
        assert!(before < Fixed::INFINITY);

        // Wall off the probe column, then recompute
        map.set_rect(GridRect::new(5, 0, 5, 15), CellType::Blocked);
        manager.mark_region_dirty(GridRect::new(0, 0, 15, 15));
        manager.tick(&map, 1);

        assert_eq!(manager.sample_cost(&map, id, probe), Fixed::INFINITY);
        assert_eq!(
            manager.sample_direction(&map, id, probe),
            FixedVec2::ZERO
        );
    }

    #[test]
    fn test_is_at_target() {
        let (map, mut manager) = setup();
        let target = FixedVec2::from_ints(8, 8);
        let id = manager.request_flow_field(&map, target, 0);

        assert!(manager.is_at_target(&map, id, target, Fixed::HALF));
        assert!(!manager.is_at_target(&map, id, FixedVec2::from_ints(1, 1), Fixed::HALF));
    }
}
