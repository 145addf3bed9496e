//! Grid state: the occupancy and semantic grids and the map builder that
//! owns them.
//!
//! Point clouds arrive in the real frame (metres).  Each finite point is
//! binned into its map cell and into one of three height channels relative to
//! the configured sensing band:
//!
//! | Channel | Points |
//! |---------|--------|
//! | 0 | below `agent_min_z_cm` (floor) |
//! | 1 | inside the band: obstacle intensity |
//! | 2 | above `agent_max_z_cm` (overhangs) |
//!
//! Counts only ever accumulate; [`MapBuilder::reset_map`] is the single way
//! to discard them.  Every mutating call validates its whole input before
//! writing, so a rejected update leaves both grids untouched.

use locoslam_types::{BoolGrid, MapCell, MapConfig, RealPoint, SlamError};

use crate::fusion::CategoryChannels;
use crate::transform::GridGeometry;

/// Occupancy channel holding the obstacle intensity.
pub const OBSTACLE_CHANNEL: usize = 1;

/// Obstacle intensity at or above which a cell counts as obstructed.
pub const OBSTACLE_THRESHOLD: f32 = 1.0;

const HEIGHT_CHANNELS: usize = 3;

// ────────────────────────────────────────────────────────────────────────────
// OccupancyGrid
// ────────────────────────────────────────────────────────────────────────────

/// Per-cell point counts in three height channels, cell-major.
#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    geometry: GridGeometry,
    data: Vec<f32>,
}

impl OccupancyGrid {
    fn new(geometry: GridGeometry) -> Self {
        let cells = geometry.cells() * geometry.cells();
        Self {
            geometry,
            data: vec![0.0; cells * HEIGHT_CHANNELS],
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.geometry.shape()
    }

    /// Value of `channel` at `cell`, or `None` outside the grid.
    pub fn get(&self, cell: MapCell, channel: usize) -> Option<f32> {
        let idx = self.geometry.index(cell).ok()?;
        self.data.get(idx * HEIGHT_CHANNELS + channel).copied()
    }

    /// Cells whose obstacle intensity reaches [`OBSTACLE_THRESHOLD`].
    pub fn obstacle_mask(&self) -> BoolGrid {
        let (rows, cols) = self.shape();
        BoolGrid {
            rows,
            cols,
            cells: self
                .data
                .chunks_exact(HEIGHT_CHANNELS)
                .map(|c| c[OBSTACLE_CHANNEL] >= OBSTACLE_THRESHOLD)
                .collect(),
        }
    }

    /// Obstructed cells in row-major order.
    pub fn obstacle_cells(&self) -> Vec<MapCell> {
        let cols = self.geometry.cells();
        self.data
            .chunks_exact(HEIGHT_CHANNELS)
            .enumerate()
            .filter(|(_, c)| c[OBSTACLE_CHANNEL] >= OBSTACLE_THRESHOLD)
            .map(|(idx, _)| MapCell::new((idx / cols) as i64, (idx % cols) as i64))
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SemanticGrid
// ────────────────────────────────────────────────────────────────────────────

/// Per-category observation counts, shape `(categories + 1, rows, cols)`,
/// stored as one row-major plane per channel.
#[derive(Debug, Clone)]
pub struct SemanticGrid {
    channels: usize,
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl SemanticGrid {
    /// Zeroed grid of `channels` planes of `rows x cols`.
    pub fn zeros(channels: usize, rows: usize, cols: usize) -> Self {
        Self {
            channels,
            rows,
            cols,
            data: vec![0.0; channels * rows * cols],
        }
    }

    /// `(channels, rows, cols)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.rows, self.cols)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn plane(&self, channel: usize) -> &[f32] {
        let len = self.rows * self.cols;
        &self.data[channel * len..(channel + 1) * len]
    }

    pub fn plane_mut(&mut self, channel: usize) -> &mut [f32] {
        let len = self.rows * self.cols;
        &mut self.data[channel * len..(channel + 1) * len]
    }

    /// Value at `(channel, row, col)`, or `None` outside the grid.
    pub fn get(&self, channel: usize, row: usize, col: usize) -> Option<f32> {
        if channel >= self.channels || row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.plane(channel)[row * self.cols + col])
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MapBuilder
// ────────────────────────────────────────────────────────────────────────────

/// Owns both grids and folds point clouds into them.
#[derive(Debug, Clone)]
pub struct MapBuilder {
    geometry: GridGeometry,
    min_z_m: f32,
    max_z_m: f32,
    num_categories: usize,
    map: OccupancyGrid,
    semantic: SemanticGrid,
}

impl MapBuilder {
    /// Allocate empty grids sized by `config`, with one semantic channel per
    /// category plus the background channel.
    pub fn new(config: &MapConfig, num_categories: usize) -> Self {
        let geometry = GridGeometry::new(config.map_size_cm, config.resolution_cm);
        Self {
            geometry,
            min_z_m: config.agent_min_z_cm / 100.0,
            max_z_m: config.agent_max_z_cm / 100.0,
            num_categories,
            map: OccupancyGrid::new(geometry),
            semantic: SemanticGrid::zeros(num_categories + 1, geometry.cells(), geometry.cells()),
        }
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn occupancy(&self) -> &OccupancyGrid {
        &self.map
    }

    pub fn semantic(&self) -> &SemanticGrid {
        &self.semantic
    }

    pub fn num_categories(&self) -> usize {
        self.num_categories
    }

    pub fn real_to_map(&self, point: RealPoint) -> Result<MapCell, SlamError> {
        self.geometry.real_to_map(point)
    }

    pub fn map_to_real(&self, cell: MapCell) -> Result<RealPoint, SlamError> {
        self.geometry.map_to_real(cell)
    }

    fn height_channel(&self, z: f32) -> usize {
        if z < self.min_z_m {
            0
        } else if z <= self.max_z_m {
            OBSTACLE_CHANNEL
        } else {
            2
        }
    }

    /// Buffer index of the cell under `point`, `None` for non-finite points.
    fn bin(&self, point: &[f32; 3]) -> Result<Option<usize>, SlamError> {
        if !point.iter().all(|v| v.is_finite()) {
            return Ok(None);
        }
        let cell = self.geometry.real_to_map(RealPoint::new(point[0], point[1]))?;
        self.geometry.index(cell).map(Some)
    }

    /// Occupancy buffer slots hit by `points`.
    fn occupancy_hits(&self, points: &[[f32; 3]]) -> Result<Vec<usize>, SlamError> {
        let mut hits = Vec::with_capacity(points.len());
        for point in points {
            if let Some(idx) = self.bin(point)? {
                hits.push(idx * HEIGHT_CHANNELS + self.height_channel(point[2]));
            }
        }
        Ok(hits)
    }

    /// `(pixel, cell index)` pairs of the in-band points of `points`.
    fn semantic_hits(
        &self,
        points: &[[f32; 3]],
        channels: &CategoryChannels,
    ) -> Result<Vec<(usize, usize)>, SlamError> {
        if points.len() != channels.pixels() {
            return Err(SlamError::LengthMismatch {
                points: points.len(),
                pixels: channels.pixels(),
            });
        }
        if channels.channels() != self.semantic.channels() {
            return Err(SlamError::InvalidConfig(format!(
                "fused frame has {} channels, semantic grid has {}",
                channels.channels(),
                self.semantic.channels()
            )));
        }

        let mut hits = Vec::new();
        for (pixel, point) in points.iter().enumerate() {
            if !point[2].is_finite() || self.height_channel(point[2]) != OBSTACLE_CHANNEL {
                continue;
            }
            if let Some(idx) = self.bin(point)? {
                hits.push((pixel, idx));
            }
        }
        Ok(hits)
    }

    fn apply_occupancy(&mut self, hits: &[usize]) {
        for &slot in hits {
            self.map.data[slot] += 1.0;
        }
    }

    fn apply_semantic(&mut self, hits: &[(usize, usize)], channels: &CategoryChannels) {
        for &(pixel, idx) in hits {
            for (channel, &flag) in channels.pixel(pixel).iter().enumerate().skip(1) {
                if flag {
                    self.semantic.plane_mut(channel)[idx] += 1.0;
                }
            }
        }
    }

    /// Accumulate a point cloud into the occupancy grid.
    ///
    /// Returns the number of points binned (non-finite points are skipped).
    ///
    /// # Errors
    ///
    /// Returns [`SlamError::OutOfBounds`] for the first finite point outside
    /// the grid; the grid is left unchanged.
    pub fn update_map(&mut self, points: &[[f32; 3]]) -> Result<usize, SlamError> {
        let hits = self.occupancy_hits(points)?;
        self.apply_occupancy(&hits);
        Ok(hits.len())
    }

    /// Accumulate fused category channels into the semantic grid, using the
    /// pixel-aligned point cloud to place each pixel.
    ///
    /// Only finite points inside the height band contribute.  Returns the
    /// number of contributing points.
    ///
    /// # Errors
    ///
    /// * [`SlamError::LengthMismatch`] – point and pixel counts differ.
    /// * [`SlamError::InvalidConfig`] – channel count differs from the grid.
    /// * [`SlamError::OutOfBounds`] – a contributing point is off the grid.
    ///
    /// The grid is left unchanged on error.
    pub fn update_semantic_map(
        &mut self,
        points: &[[f32; 3]],
        channels: &CategoryChannels,
    ) -> Result<usize, SlamError> {
        let hits = self.semantic_hits(points, channels)?;
        self.apply_semantic(&hits, channels);
        Ok(hits.len())
    }

    /// Fold one sensor frame into both grids.
    ///
    /// Both updates are validated before either grid is written, so an error
    /// from either half leaves the whole map untouched.
    pub fn integrate(
        &mut self,
        points: &[[f32; 3]],
        channels: &CategoryChannels,
    ) -> Result<(), SlamError> {
        let semantic_hits = self.semantic_hits(points, channels)?;
        let occupancy_hits = self.occupancy_hits(points)?;
        self.apply_occupancy(&occupancy_hits);
        self.apply_semantic(&semantic_hits, channels);
        Ok(())
    }

    /// Mark `cell` obstructed.
    ///
    /// # Errors
    ///
    /// Returns [`SlamError::OutOfBounds`] when `cell` is off the grid.
    pub fn add_obstacle(&mut self, cell: MapCell) -> Result<(), SlamError> {
        let slot = self.geometry.index(cell)? * HEIGHT_CHANNELS + OBSTACLE_CHANNEL;
        let value = &mut self.map.data[slot];
        *value = value.max(OBSTACLE_THRESHOLD);
        Ok(())
    }

    /// Discard both grids and reallocate them for a `map_size_cm` map at the
    /// current resolution.
    ///
    /// # Errors
    ///
    /// Returns [`SlamError::InvalidConfig`] if `map_size_cm` is smaller than
    /// one cell or needs more than [`MapConfig::MAX_CELLS_PER_SIDE`] cells per
    /// side; the existing grids are kept.
    pub fn reset_map(&mut self, map_size_cm: u32) -> Result<(), SlamError> {
        let resolution = self.geometry.resolution_cm();
        MapConfig::check_map_size(map_size_cm, resolution)?;
        let geometry = GridGeometry::new(map_size_cm, resolution);
        self.geometry = geometry;
        self.map = OccupancyGrid::new(geometry);
        self.semantic = SemanticGrid::zeros(self.num_categories + 1, geometry.cells(), geometry.cells());
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
