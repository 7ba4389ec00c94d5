//! Grid map service consumed by navigation.
//!
//! The planner and the per-agent loop only see the narrow [`GridMap`]
//! interface; [`WorldMap`] is the concrete row-major implementation the
//! simulation owns.

use serde::{Deserialize, Serialize};

use crate::math::{Fixed, FixedVec2};

/// Cell types for the navigation grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CellType {
    /// Normal walkable terrain (cost 1).
    #[default]
    Walkable,
    /// Impassable terrain.
    Blocked,
    /// Slow terrain with 2x movement cost.
    SlowTerrain,
}

impl CellType {
    /// Terrain cost multiplier for flow-field propagation.
    /// Blocked cells have no cost; they are never relaxed.
    #[must_use]
    pub const fn terrain_cost(self) -> Option<Fixed> {
        match self {
            Self::Walkable => Some(Fixed::ONE),
            Self::Blocked => None,
            Self::SlowTerrain => Some(Fixed::TWO),
        }
    }

    /// Returns true if this cell can be entered.
    #[must_use]
    pub const fn is_walkable(self) -> bool {
        !matches!(self, Self::Blocked)
    }
}

/// A rectangle of grid cells, inclusive on both ends.
///
/// Returned by map mutators so callers can invalidate flow fields over
/// exactly the region that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRect {
    /// Lowest x cell.
    pub min_x: i32,
    /// Lowest y cell.
    pub min_y: i32,
    /// Highest x cell.
    pub max_x: i32,
    /// Highest y cell.
    pub max_y: i32,
}

impl GridRect {
    /// Create a rect from inclusive corners.
    #[must_use]
    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Whether the rect contains the given cell.
    #[must_use]
    pub const fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Narrow map interface consumed by the flow-field planner and the
/// per-agent navigation loop.
///
/// Grid coordinates are signed so out-of-range probes are representable;
/// they simply report unwalkable.
pub trait GridMap {
    /// Grid width in cells.
    fn width(&self) -> u32;

    /// Grid height in cells.
    fn height(&self) -> u32;

    /// World size of one cell.
    fn cell_size(&self) -> Fixed;

    /// Whether the cell can be entered. Out-of-bounds cells are not.
    fn is_walkable(&self, x: i32, y: i32) -> bool;

    /// Terrain cost multiplier for the cell (1 = normal).
    fn terrain_cost(&self, x: i32, y: i32) -> Fixed;

    /// World position to containing cell.
    fn world_to_grid(&self, pos: FixedVec2) -> (i32, i32);

    /// Cell to world position of its center.
    fn grid_to_world(&self, x: i32, y: i32) -> FixedVec2;
}

/// Concrete row-major grid map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldMap {
    width: u32,
    height: u32,
    cells: Vec<CellType>,
    cell_size: Fixed,
}

impl WorldMap {
    /// Create a map with all cells walkable.
    ///
    /// # Panics
    ///
    /// Panics if `width` or `height` is zero, or `cell_size` is not positive.
    #[must_use]
    pub fn new(width: u32, height: u32, cell_size: Fixed) -> Self {
        assert!(width > 0, "WorldMap width must be positive");
        assert!(height > 0, "WorldMap height must be positive");
        assert!(cell_size > Fixed::ZERO, "WorldMap cell_size must be positive");

        Self {
            width,
            height,
            cells: vec![CellType::Walkable; (width as usize) * (height as usize)],
            cell_size,
        }
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x >= 0 && (x as u32) < self.width && y >= 0 && (y as u32) < self.height {
            Some((y as usize) * (self.width as usize) + (x as usize))
        } else {
            None
        }
    }

    /// Cell type at coordinates, `None` when out of bounds.
    #[must_use]
    pub fn get_cell(&self, x: i32, y: i32) -> Option<CellType> {
        self.index(x, y).map(|i| self.cells[i])
    }

    /// Set a single cell, returning the dirtied rect.
    ///
    /// Out-of-bounds writes are ignored and return `None`.
    pub fn set_cell(&mut self, x: i32, y: i32, cell: CellType) -> Option<GridRect> {
        let index = self.index(x, y)?;
        self.cells[index] = cell;
        Some(GridRect::new(x, y, x, y))
    }

    /// Set every cell in a rect (inclusive), returning the dirtied rect
    /// clamped to the map bounds.
    pub fn set_rect(&mut self, rect: GridRect, cell: CellType) -> Option<GridRect> {
        let min_x = rect.min_x.max(0);
        let min_y = rect.min_y.max(0);
        let max_x = rect.max_x.min(self.width as i32 - 1);
        let max_y = rect.max_y.min(self.height as i32 - 1);
        if min_x > max_x || min_y > max_y {
            return None;
        }

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                if let Some(index) = self.index(x, y) {
                    self.cells[index] = cell;
                }
            }
        }

        Some(GridRect::new(min_x, min_y, max_x, max_y))
    }
}

impl GridMap for WorldMap {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn cell_size(&self) -> Fixed {
        self.cell_size
    }

    fn is_walkable(&self, x: i32, y: i32) -> bool {
        self.get_cell(x, y).is_some_and(CellType::is_walkable)
    }

    fn terrain_cost(&self, x: i32, y: i32) -> Fixed {
        self.get_cell(x, y)
            .and_then(CellType::terrain_cost)
            .unwrap_or(Fixed::INFINITY)
    }

    fn world_to_grid(&self, pos: FixedVec2) -> (i32, i32) {
        (
            floor_div(pos.x, self.cell_size),
            floor_div(pos.y, self.cell_size),
        )
    }

    fn grid_to_world(&self, x: i32, y: i32) -> FixedVec2 {
        let half = self.cell_size / Fixed::TWO;
        FixedVec2::new(
            Fixed::from_int(i64::from(x)) * self.cell_size + half,
            Fixed::from_int(i64::from(y)) * self.cell_size + half,
        )
    }
}

/// Floored division so positions left/below the origin land in negative
/// cells instead of truncating into cell zero.
fn floor_div(pos: Fixed, size: Fixed) -> i32 {
    let q = pos / size;
    let mut cell = q.floor_int();
    if q.raw() < 0 && q.fract().raw() != 0 {
        cell -= 1;
    }
    cell as i32
}

impl Default for WorldMap {
    /// A 64x64 map with unit cells.
    fn default() -> Self {
        Self::new(64, 64, Fixed::ONE)
    }
}
