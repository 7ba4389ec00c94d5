//! Flow-field generation.
//!
//! A flow field stores, for every grid cell, the cost to a target cell
//! and a normalized direction toward it. One field serves every agent
//! heading to the same target, which is what makes large group moves
//! affordable. Cost propagation is Dijkstra from the target outward;
//! the direction pass then points each cell at its cheapest strictly
//! cheaper neighbor.
//!
//! The neighbor scan order is part of the deterministic contract: on
//! cost plateaus the earliest scan position wins ties, and every peer
//! must agree on the result.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::map::GridMap;
use crate::math::{Fixed, FixedVec2};
use crate::world::Tick;

/// Handle to a pooled flow field.
pub type FieldId = u32;

/// Neighbor offsets in the fixed scan order: cardinals first, then
/// diagonals. Do not reorder; direction tie-breaking depends on it.
pub(crate) const NEIGHBOR_DX: [i32; 8] = [0, 1, 0, -1, 1, 1, -1, -1];
/// Y offsets matching [`NEIGHBOR_DX`].
pub(crate) const NEIGHBOR_DY: [i32; 8] = [1, 0, -1, 0, 1, -1, 1, -1];

/// Per-target cost and direction grids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowField {
    /// Pool handle.
    pub id: FieldId,
    /// Target cell x.
    pub target_x: i32,
    /// Target cell y.
    pub target_y: i32,
    /// Grid width in cells.
    pub width: u32,
    /// Grid height in cells.
    pub height: u32,
    /// Cost to target per cell, `Fixed::INFINITY` when unreachable.
    pub costs: Vec<Fixed>,
    /// Normalized direction toward the target per cell.
    pub directions: Vec<FixedVec2>,
    /// Number of live users sharing this field.
    pub ref_count: u32,
    /// Whether the field needs recomputation.
    pub dirty: bool,
    /// Tick of the last recompute.
    pub last_update_tick: Tick,
}

impl FlowField {
    /// Create an empty field covering a `width` x `height` grid.
    #[must_use]
    pub fn new(id: FieldId, width: u32, height: u32) -> Self {
        let cells = (width as usize) * (height as usize);
        Self {
            id,
            target_x: 0,
            target_y: 0,
            width,
            height,
            costs: vec![Fixed::INFINITY; cells],
            directions: vec![FixedVec2::ZERO; cells],
            ref_count: 0,
            dirty: false,
            last_update_tick: 0,
        }
    }

    /// Row-major cell index.
    #[must_use]
    pub fn index(&self, x: i32, y: i32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Whether the cell lies inside the field.
    #[must_use]
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && (x as u32) < self.width && y >= 0 && (y as u32) < self.height
    }

    /// Cost at a cell, `Fixed::INFINITY` out of bounds.
    #[must_use]
    pub fn cost_at(&self, x: i32, y: i32) -> Fixed {
        if self.in_bounds(x, y) {
            self.costs[self.index(x, y)]
        } else {
            Fixed::INFINITY
        }
    }

    /// Direction at a cell, zero out of bounds.
    #[must_use]
    pub fn direction_at(&self, x: i32, y: i32) -> FixedVec2 {
        if self.in_bounds(x, y) {
            self.directions[self.index(x, y)]
        } else {
            FixedVec2::ZERO
        }
    }
}

/// Open-set entry for the Dijkstra pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FlowNode {
    cost: Fixed,
    x: i32,
    y: i32,
}

impl Ord for FlowNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for min-heap behavior, with
        // a coordinate tie-breaker so equal costs pop deterministically.
        match other.cost.cmp(&self.cost) {
            Ordering::Equal => (other.y, other.x).cmp(&(self.y, self.x)),
            ord => ord,
        }
    }
}

impl PartialOrd for FlowNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Recompute a field's cost and direction grids for a target cell.
pub fn calculate(field: &mut FlowField, map: &impl GridMap, target_x: i32, target_y: i32) {
    field.target_x = target_x;
    field.target_y = target_y;

    for cost in &mut field.costs {
        *cost = Fixed::INFINITY;
    }

    calculate_cost_field(field, map, target_x, target_y);
    generate_direction_field(field);

    field.dirty = false;
}

/// Dijkstra from the target outward over the 8-connected grid.
///
/// Cardinal steps cost 1, diagonals sqrt(2), both scaled by the
/// destination cell's terrain cost. Unwalkable cells are never relaxed,
/// and a diagonal step requires both adjacent cardinal cells walkable
/// (no cutting corners through a wall).
fn calculate_cost_field(field: &mut FlowField, map: &impl GridMap, target_x: i32, target_y: i32) {
    if !field.in_bounds(target_x, target_y) {
        return;
    }

    let mut open_set = BinaryHeap::new();
    let mut closed = vec![false; field.costs.len()];

    let target_index = field.index(target_x, target_y);
    field.costs[target_index] = Fixed::ZERO;
    open_set.push(FlowNode {
        cost: Fixed::ZERO,
        x: target_x,
        y: target_y,
    });

    while let Some(current) = open_set.pop() {
        let current_index = field.index(current.x, current.y);
        if closed[current_index] {
            continue;
        }
        closed[current_index] = true;

        for i in 0..8 {
            let nx = current.x + NEIGHBOR_DX[i];
            let ny = current.y + NEIGHBOR_DY[i];

            if !field.in_bounds(nx, ny) || !map.is_walkable(nx, ny) {
                continue;
            }

            if i >= 4 {
                let adj1 = (current.x + NEIGHBOR_DX[i], current.y);
                let adj2 = (current.x, current.y + NEIGHBOR_DY[i]);
                if !field.in_bounds(adj1.0, adj1.1) || !field.in_bounds(adj2.0, adj2.1) {
                    continue;
                }
                if !map.is_walkable(adj1.0, adj1.1) || !map.is_walkable(adj2.0, adj2.1) {
                    continue;
                }
            }

            let neighbor_index = field.index(nx, ny);
            if closed[neighbor_index] {
                continue;
            }

            let move_cost = if i < 4 { Fixed::ONE } else { Fixed::SQRT_2 };
            let new_cost = current.cost + move_cost * map.terrain_cost(nx, ny);

            if new_cost < field.costs[neighbor_index] {
                field.costs[neighbor_index] = new_cost;
                open_set.push(FlowNode {
                    cost: new_cost,
                    x: nx,
                    y: ny,
                });
            }
        }
    }
}

/// Point every reachable cell at its cheapest strictly cheaper neighbor.
///
/// Ties keep the earliest position in the fixed scan order. Cells with
/// no strictly cheaper neighbor, the target itself, and unreachable
/// cells get the zero vector.
fn generate_direction_field(field: &mut FlowField) {
    for y in 0..field.height as i32 {
        for x in 0..field.width as i32 {
            let index = field.index(x, y);

            if field.costs[index] == Fixed::INFINITY {
                field.directions[index] = FixedVec2::ZERO;
                continue;
            }

            if x == field.target_x && y == field.target_y {
                field.directions[index] = FixedVec2::ZERO;
                continue;
            }

            let mut min_cost = field.costs[index];
            let mut best_dx = 0;
            let mut best_dy = 0;

            for i in 0..8 {
                let nx = x + NEIGHBOR_DX[i];
                let ny = y + NEIGHBOR_DY[i];

                if !field.in_bounds(nx, ny) {
                    continue;
                }

                let neighbor_cost = field.costs[field.index(nx, ny)];
                if neighbor_cost < min_cost {
                    min_cost = neighbor_cost;
                    best_dx = NEIGHBOR_DX[i];
                    best_dy = NEIGHBOR_DY[i];
                }
            }

            field.directions[index] = if best_dx != 0 || best_dy != 0 {
                FixedVec2::from_ints(i64::from(best_dx), i64::from(best_dy)).normalized()
            } else {
                FixedVec2::ZERO
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{CellType, GridRect, WorldMap};

    fn open_map(size: u32) -> WorldMap {
        WorldMap::new(size, size, Fixed::ONE)
    }

    #[test]
    fn test_target_cell_has_zero_cost_and_direction() {
        let map = open_map(8);
        let mut field = FlowField::new(0, 8, 8);
        calculate(&mut field, &map, 4, 4);

        assert_eq!(field.cost_at(4, 4), Fixed::ZERO);
        assert_eq!(field.direction_at(4, 4), FixedVec2::ZERO);
        assert!(!field.dirty);
    }

    #[test]
    fn test_costs_accumulate_with_distance() {
        let map = open_map(8);
        let mut field = FlowField::new(0, 8, 8);
        calculate(&mut field, &map, 0, 0);

        assert_eq!(field.cost_at(1, 0), Fixed::ONE);
        assert_eq!(field.cost_at(0, 2), Fixed::TWO);
        // Diagonal neighbor costs sqrt(2)
        assert_eq!(field.cost_at(1, 1), Fixed::SQRT_2);
    }

    #[test]
    fn test_unwalkable_cells_are_unreachable() {
        let mut map = open_map(8);
        map.set_cell(3, 3, CellType::Blocked);

        let mut field = FlowField::new(0, 8, 8);
        calculate(&mut field, &map, 0, 0);

        assert_eq!(field.cost_at(3, 3), Fixed::INFINITY);
        assert_eq!(field.direction_at(3, 3), FixedVec2::ZERO);
    }

    #[test]
    fn test_walled_off_region_is_unreachable() {
        let mut map = open_map(8);
        // Vertical wall across the whole map at x=4
        map.set_rect(GridRect::new(4, 0, 4, 7), CellType::Blocked);

        let mut field = FlowField::new(0, 8, 8);
        calculate(&mut field, &map, 0, 0);

        assert_eq!(field.cost_at(6, 3), Fixed::INFINITY);
        assert!(field.cost_at(3, 3) < Fixed::INFINITY);
    }

    #[test]
    fn test_no_corner_cutting_through_walls() {
        let mut map = open_map(4);
        // Blocked cells share only a corner with the diagonal path
        map.set_cell(1, 0, CellType::Blocked);
        map.set_cell(0, 1, CellType::Blocked);

        let mut field = FlowField::new(0, 4, 4);
        calculate(&mut field, &map, 0, 0);

        // (1,1) cannot step diagonally into the target; it is sealed off
        assert_eq!(field.cost_at(1, 1), Fixed::INFINITY);
    }

    #[test]
    fn test_monotone_descent() {
        let mut map = open_map(12);
        map.set_rect(GridRect::new(5, 2, 5, 9), CellType::Blocked);
        map.set_rect(GridRect::new(2, 6, 4, 6), CellType::SlowTerrain);

        let mut field = FlowField::new(0, 12, 12);
        calculate(&mut field, &map, 9, 6);

        for y in 0..12 {
            for x in 0..12 {
                let cost = field.cost_at(x, y);
                let direction = field.direction_at(x, y);
                if cost == Fixed::INFINITY || direction == FixedVec2::ZERO {
                    continue;
                }

                // Recover the pointed-to neighbor from the stored direction
                let dx = if direction.x > Fixed::ZERO {
                    1
                } else if direction.x < Fixed::ZERO {
                    -1
                } else {
                    0
                };
                let dy = if direction.y > Fixed::ZERO {
                    1
                } else if direction.y < Fixed::ZERO {
                    -1
                } else {
                    0
                };

                assert!(
                    field.cost_at(x + dx, y + dy) < cost,
                    "cost must strictly decrease toward target from ({x}, {y})"
                );
            }
        }
    }

    #[test]
    fn test_terrain_cost_scales_propagation() {
        let mut map = open_map(8);
        map.set_cell(1, 0, CellType::SlowTerrain);

        let mut field = FlowField::new(0, 8, 8);
        calculate(&mut field, &map, 0, 0);

        // Entering slow terrain doubles the step cost
        assert_eq!(field.cost_at(1, 0), Fixed::TWO);
    }

    #[test]
    fn test_recompute_is_deterministic() {
        let mut map = open_map(16);
        map.set_rect(GridRect::new(6, 0, 6, 12), CellType::Blocked);

        let mut a = FlowField::new(0, 16, 16);
        let mut b = FlowField::new(1, 16, 16);
        calculate(&mut a, &map, 14, 14);
        calculate(&mut b, &map, 14, 14);

        assert_eq!(a.costs, b.costs);
        assert_eq!(a.directions, b.directions);
    }
}
