//! Traversability from the obstacle layer.
//!
//! A cell is traversable when no obstacle lies within one robot radius of it.
//! The obstacle mask is dilated with a disk footprint and inverted:
//!
//! ```text
//! obstacles      dilated (r = 1)   traversable
//! . . . . .      . . . . .         # # # # #
//! . . . . .      . . X . .         # # . # #
//! . . X . .  →   . X X X .    →    # . . . #
//! . . . . .      . . X . .         # # . # #
//! ```
//!
//! Dilation clips at the grid border; cells outside the grid are never
//! considered.

use locoslam_types::{BoolGrid, MapCell};

/// Slack for disk membership so cells exactly on the rim survive `f32`
/// rounding of the radius.
const RIM_EPSILON: f32 = 1e-4;

/// Offsets `(dr, dc)` of the disk footprint for a radius in cells.
///
/// The footprint spans `ceil(r)` cells each way and keeps offsets with
/// `dr² + dc² <= r²`.  A radius of zero yields the single centre offset.
pub fn disk_footprint(radius_cells: f32) -> Vec<(i64, i64)> {
    let r = radius_cells.max(0.0);
    let extent = r.ceil() as i64;
    let limit = r * r + RIM_EPSILON;
    let mut offsets = Vec::new();
    for dr in -extent..=extent {
        for dc in -extent..=extent {
            if ((dr * dr + dc * dc) as f32) <= limit {
                offsets.push((dr, dc));
            }
        }
    }
    offsets
}

/// Binary dilation of `mask` by `footprint`, clipped at the border.
pub fn dilate(mask: &BoolGrid, footprint: &[(i64, i64)]) -> BoolGrid {
    let (rows, cols) = mask.shape();
    let mut out = BoolGrid::filled(rows, cols, false);
    for row in 0..rows {
        for col in 0..cols {
            if !mask.cells[row * cols + col] {
                continue;
            }
            for &(dr, dc) in footprint {
                let (r, c) = (row as i64 + dr, col as i64 + dc);
                if r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols {
                    out.set(r as usize, c as usize, true);
                }
            }
        }
    }
    out
}

/// Cells the robot centre may occupy without touching an obstacle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversabilityMask {
    grid: BoolGrid,
}

impl TraversabilityMask {
    /// Compute the mask for `obstacles` and a robot of `radius_cells`.
    pub fn compute(obstacles: &BoolGrid, radius_cells: f32) -> Self {
        let mut grid = dilate(obstacles, &disk_footprint(radius_cells));
        for cell in &mut grid.cells {
            *cell = !*cell;
        }
        Self { grid }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.grid.shape()
    }

    /// `true` if the robot centre may occupy `cell`.  Off-grid cells are not
    /// traversable.
    pub fn is_traversable(&self, cell: MapCell) -> bool {
        self.grid.get(cell.row, cell.col).unwrap_or(false)
    }

    pub fn grid(&self) -> &BoolGrid {
        &self.grid
    }

    pub fn into_grid(self) -> BoolGrid {
        self.grid
    }
}
