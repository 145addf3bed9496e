//! Coordinate Frame Transform Layer.
//!
//! Three frames meet in the mapping service:
//!
//! | Frame | Units | Origin |
//! |-------|-------|--------|
//! | real  | metres | where the robot booted |
//! | map   | cells  | corner of the grid; real origin sits at the centre cell |
//! | robot | metres | the robot's reported odometry origin |
//!
//! [`GridGeometry`] converts real ⇄ map.  [`FrameTransform`] adds the robot
//! frame on top of it, offset by an [`InitState`].
//!
//! # Example
//!
//! ```rust
//! use locoslam_mapping::transform::GridGeometry;
//! use locoslam_types::{MapCell, RealPoint};
//!
//! // 1 m map at 5 cm per cell: 20x20 cells, real origin at cell (10, 10).
//! let geometry = GridGeometry::new(100, 5);
//! assert_eq!(geometry.real_to_map(RealPoint::new(0.0, 0.0)).unwrap(), MapCell::new(10, 10));
//!
//! let back = geometry.map_to_real(MapCell::new(10, 10)).unwrap();
//! assert!((back.x - 0.025).abs() < 1e-6);
//! ```

use locoslam_types::{MapCell, Pose, RealPoint, SlamError};

/// Largest cell offset from the origin a coordinate may resolve to.  Every
/// integer up to here is exact in `f64`.
const MAX_CELL_OFFSET: f64 = (1u64 << 53) as f64;

// ────────────────────────────────────────────────────────────────────────────
// GridGeometry
// ────────────────────────────────────────────────────────────────────────────

/// Size and resolution of a square grid centred on the real-world origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridGeometry {
    cells: usize,
    resolution_cm: u32,
}

impl GridGeometry {
    /// Geometry for a `map_size_cm` square map at `resolution_cm` per cell.
    ///
    /// The cell count is `map_size_cm / resolution_cm`, never less than one.
    /// `resolution_cm` must be non-zero; [`MapConfig::validate`] guards this
    /// at startup.
    ///
    /// [`MapConfig::validate`]: locoslam_types::MapConfig::validate
    pub fn new(map_size_cm: u32, resolution_cm: u32) -> Self {
        let resolution_cm = resolution_cm.max(1);
        Self {
            cells: ((map_size_cm / resolution_cm) as usize).max(1),
            resolution_cm,
        }
    }

    /// Number of rows (== number of columns).
    pub fn cells(&self) -> usize {
        self.cells
    }

    pub fn resolution_cm(&self) -> u32 {
        self.resolution_cm
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.cells, self.cells)
    }

    fn origin_cell(&self) -> i64 {
        (self.cells / 2) as i64
    }

    fn metres_per_cell(&self) -> f64 {
        f64::from(self.resolution_cm) / 100.0
    }

    fn axis_to_cell(&self, metres: f32) -> Result<i64, SlamError> {
        let offset = (f64::from(metres) / self.metres_per_cell()).floor();
        if !(offset.abs() <= MAX_CELL_OFFSET) {
            return Err(SlamError::OutOfRange(format!(
                "{metres} m does not resolve to a map cell"
            )));
        }
        (offset as i64)
            .checked_add(self.origin_cell())
            .ok_or_else(|| SlamError::OutOfRange(format!("{metres} m does not resolve to a map cell")))
    }

    fn cell_to_axis(&self, index: i64) -> Result<f32, SlamError> {
        let offset = index
            .checked_sub(self.origin_cell())
            .ok_or_else(|| SlamError::OutOfRange(format!("cell index {index} has no real position")))?;
        Ok(((offset as f64 + 0.5) * self.metres_per_cell()) as f32)
    }

    /// Real-world point → map cell.  No clamping: the result may lie outside
    /// the grid.
    ///
    /// # Errors
    ///
    /// Returns [`SlamError::OutOfRange`] for non-finite coordinates and for
    /// coordinates too far out to be indexed.
    pub fn real_to_map(&self, point: RealPoint) -> Result<MapCell, SlamError> {
        Ok(MapCell::new(
            self.axis_to_cell(point.x)?,
            self.axis_to_cell(point.y)?,
        ))
    }

    /// Map cell → real-world point at the cell centre.
    ///
    /// # Errors
    ///
    /// Returns [`SlamError::OutOfRange`] when the cell's offset from the
    /// origin overflows.
    pub fn map_to_real(&self, cell: MapCell) -> Result<RealPoint, SlamError> {
        Ok(RealPoint::new(
            self.cell_to_axis(cell.row)?,
            self.cell_to_axis(cell.col)?,
        ))
    }

    /// `true` if `cell` indexes into the grid.
    pub fn contains(&self, cell: MapCell) -> bool {
        cell.row >= 0
            && cell.col >= 0
            && (cell.row as usize) < self.cells
            && (cell.col as usize) < self.cells
    }

    /// Row-major buffer index of `cell`.
    ///
    /// # Errors
    ///
    /// Returns [`SlamError::OutOfBounds`] when `cell` is outside the grid.
    pub fn index(&self, cell: MapCell) -> Result<usize, SlamError> {
        if !self.contains(cell) {
            return Err(SlamError::OutOfBounds {
                row: cell.row,
                col: cell.col,
                rows: self.cells,
                cols: self.cells,
            });
        }
        Ok(cell.row as usize * self.cells + cell.col as usize)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// InitState
// ────────────────────────────────────────────────────────────────────────────

/// Pose of the robot-frame origin inside the map's real frame.
///
/// Only the zero state is supported: a map reused from an earlier session,
/// with the robot registering itself away from the map origin, would need a
/// correction here that has not been defined yet.  Every robot-frame
/// conversion already routes through [`InitState::robot_to_real`] /
/// [`InitState::real_to_robot`] so that correction lands in one place.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InitState {
    pub x: f32,
    pub y: f32,
    pub yaw: f32,
}

impl InitState {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.yaw == 0.0
    }

    /// Robot-frame pose → real-frame pose.  Identity for now.
    pub fn robot_to_real(&self, pose: Pose) -> Pose {
        pose
    }

    /// Real-frame pose → robot-frame pose.  Identity for now.
    pub fn real_to_robot(&self, pose: Pose) -> Pose {
        pose
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FrameTransform
// ────────────────────────────────────────────────────────────────────────────

/// Robot ⇄ map conversions on top of a [`GridGeometry`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTransform {
    init_state: InitState,
}

impl FrameTransform {
    pub fn new(init_state: InitState) -> Self {
        Self { init_state }
    }

    pub fn init_state(&self) -> InitState {
        self.init_state
    }

    /// Robot-frame pose → map cell.  Heading is not part of a cell.
    pub fn robot_to_map(&self, geometry: &GridGeometry, pose: Pose) -> Result<MapCell, SlamError> {
        let real = self.init_state.robot_to_real(pose);
        geometry.real_to_map(real.position())
    }

    /// Map cell → robot-frame pose at the cell centre, heading zero.
    pub fn map_to_robot(&self, geometry: &GridGeometry, cell: MapCell) -> Result<Pose, SlamError> {
        let real = geometry.map_to_real(cell)?;
        Ok(self.init_state.real_to_robot(Pose::new(real.x, real.y, 0.0)))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
