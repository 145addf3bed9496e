//! [`SlamService`] – the mapping service's operations.
//!
//! Owns the map builder, the traversability mask and the robot handle.  Every
//! remote method is a plain method here; [`SlamService::dispatch`] maps a
//! decoded [`SlamRequest`] onto them.  The service is not shared: the
//! [`ServiceLoop`] owns it and runs one operation at a time.
//!
//! A service only exists in the ready state.  [`SlamService::new`] performs
//! the first map update and mask computation; if that fails the service is
//! never built and the error is [`SlamError::StartupFatal`].
//!
//! [`ServiceLoop`]: crate::service_loop::ServiceLoop

use std::path::PathBuf;

use locoslam_mapping::COCO_CATEGORIES;
use locoslam_mapping::fusion::fuse_semantics;
use locoslam_mapping::grid::MapBuilder;
use locoslam_mapping::snapshot::{ChannelOrder, SemanticSnapshot, render_semantic_snapshot};
use locoslam_mapping::transform::{FrameTransform, InitState};
use locoslam_mapping::traversability::TraversabilityMask;
use locoslam_middleware::RobotSource;
use locoslam_types::{
    BoolGrid, MapCell, MapConfig, ObstacleLocation, Pose, RealPoint, SlamError, SlamReply,
    SlamRequest,
};
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Construction parameters for [`SlamService`].
#[derive(Debug, Clone)]
pub struct SlamSettings {
    pub map: MapConfig,
    /// Number of semantic categories; category `i` fills channel `i + 1`.
    pub num_categories: usize,
    /// Where each map update writes the semantic snapshot.  `None` disables
    /// the snapshot.
    pub snapshot_path: Option<PathBuf>,
    pub channel_order: ChannelOrder,
}

impl Default for SlamSettings {
    fn default() -> Self {
        Self {
            map: MapConfig::default(),
            num_categories: COCO_CATEGORIES.len(),
            snapshot_path: None,
            channel_order: ChannelOrder::Rgb,
        }
    }
}

/// Outcome of one periodic refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshReport {
    /// The map was rebuilt from a fresh frame of `points` points.
    Updated { points: usize },
    /// The refresh failed; the previous map and mask are still served.
    Degraded(SlamError),
}

// ─────────────────────────────────────────────────────────────────────────────
// SlamService
// ─────────────────────────────────────────────────────────────────────────────

pub struct SlamService {
    robot: Box<dyn RobotSource>,
    config: MapConfig,
    builder: MapBuilder,
    transform: FrameTransform,
    traversable: TraversabilityMask,
    prev_bot_state: Pose,
    snapshot_path: Option<PathBuf>,
    channel_order: ChannelOrder,
}

impl SlamService {
    /// Build the service and run the first map update.
    ///
    /// # Errors
    ///
    /// Returns [`SlamError::StartupFatal`] if the configuration is invalid or
    /// the first update fails, i.e. no traversability mask can be produced.
    pub async fn new(robot: Box<dyn RobotSource>, settings: SlamSettings) -> Result<Self, SlamError> {
        settings
            .map
            .validate()
            .map_err(|e| SlamError::StartupFatal(e.to_string()))?;

        let builder = MapBuilder::new(&settings.map, settings.num_categories);
        let traversable = TraversabilityMask::compute(
            &builder.occupancy().obstacle_mask(),
            settings.map.robot_radius_cells(),
        );
        let mut service = Self {
            robot,
            config: settings.map,
            builder,
            transform: FrameTransform::new(InitState::zero()),
            traversable,
            prev_bot_state: Pose::origin(),
            snapshot_path: settings.snapshot_path,
            channel_order: settings.channel_order,
        };

        service
            .update_map()
            .await
            .map_err(|e| SlamError::StartupFatal(format!("initial map update failed: {e}")))?;

        let (rows, cols) = service.traversable.shape();
        info!(
            rows,
            cols,
            resolution_cm = service.config.resolution_cm,
            robot_radius_cm = service.config.robot_radius_cm,
            "slam service ready"
        );
        Ok(service)
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn map_builder(&self) -> &MapBuilder {
        &self.builder
    }

    /// Robot base pose reported with the last point cloud that made it into
    /// the map.
    pub fn prev_bot_state(&self) -> Pose {
        self.prev_bot_state
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// `true` where the robot centre may go.  Same shape as the grids.
    pub fn traversable_map(&self) -> BoolGrid {
        self.traversable.grid().clone()
    }

    /// Coordinate conversions fail with [`SlamError::OutOfRange`] for input
    /// no grid cell could ever index; off-grid but representable input
    /// converts normally.
    pub fn real_to_map(&self, point: RealPoint) -> Result<MapCell, SlamError> {
        self.builder.real_to_map(point)
    }

    pub fn map_to_real(&self, cell: MapCell) -> Result<RealPoint, SlamError> {
        self.builder.map_to_real(cell)
    }

    pub fn robot_to_map(&self, pose: Pose) -> Result<MapCell, SlamError> {
        self.transform.robot_to_map(self.builder.geometry(), pose)
    }

    pub fn map_to_robot(&self, cell: MapCell) -> Result<Pose, SlamError> {
        self.transform.map_to_robot(self.builder.geometry(), cell)
    }

    pub fn map_resolution(&self) -> u32 {
        self.builder.geometry().resolution_cm()
    }

    /// Real-frame centres of every obstructed cell.
    pub fn obstacle_list(&self) -> Vec<RealPoint> {
        self.builder
            .occupancy()
            .obstacle_cells()
            .into_iter()
            .filter_map(|cell| self.builder.map_to_real(cell).ok())
            .collect()
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    /// Mark an obstacle.  The traversability mask picks it up on the next
    /// map update.
    ///
    /// # Errors
    ///
    /// Returns [`SlamError::OutOfBounds`] if the location is off the grid;
    /// nothing is written.
    pub fn add_obstacle(&mut self, location: ObstacleLocation) -> Result<(), SlamError> {
        let cell = match location {
            ObstacleLocation::Real(point) => self.builder.real_to_map(point)?,
            ObstacleLocation::Map(cell) => cell,
        };
        self.builder.add_obstacle(cell)?;
        debug!(row = cell.row, col = cell.col, "obstacle added");
        Ok(())
    }

    /// Pull the latest frames from the robot and fold them into the map.
    ///
    /// On success the traversability mask is recomputed and, if configured,
    /// a semantic snapshot is written.  Snapshot failures are logged and
    /// otherwise ignored.
    ///
    /// # Errors
    ///
    /// Any robot fetch or map integration error.  The map and mask are left
    /// exactly as they were.
    pub async fn update_map(&mut self) -> Result<usize, SlamError> {
        let cloud = self.robot.current_point_cloud().await?;
        let frame = self.robot.rgb_depth_segmentation().await?;
        frame.validate()?;
        let lists = self.robot.category_instance_lists().await?;

        let channels = fuse_semantics(&frame.semantic, &lists, self.builder.num_categories());
        self.builder.integrate(&cloud.points, &channels)?;
        self.prev_bot_state = cloud.base_state;
        self.recompute_traversability();
        debug!(points = cloud.points.len(), "map updated");

        if let Some(path) = &self.snapshot_path {
            if let Err(e) = self
                .render_snapshot()
                .and_then(|snapshot| snapshot.save_png(path))
            {
                warn!(error = %e, "semantic snapshot skipped");
            }
        }
        Ok(cloud.points.len())
    }

    /// Rebuild the traversability mask from the current obstacle layer.
    pub fn recompute_traversability(&mut self) {
        self.traversable = TraversabilityMask::compute(
            &self.builder.occupancy().obstacle_mask(),
            self.config.robot_radius_cells(),
        );
    }

    /// Discard the map and start over at `map_size_cm` (default: the
    /// configured size).
    ///
    /// # Errors
    ///
    /// Returns [`SlamError::InvalidConfig`] for a size below one cell; the
    /// map is kept.
    pub fn reset_map(&mut self, map_size_cm: Option<u32>) -> Result<(), SlamError> {
        let size = map_size_cm.unwrap_or(self.config.map_size_cm);
        self.builder.reset_map(size)?;
        self.recompute_traversability();
        info!(map_size_cm = size, "map reset");
        Ok(())
    }

    /// Render the semantic grid without touching it.
    pub fn render_snapshot(&self) -> Result<SemanticSnapshot, SlamError> {
        render_semantic_snapshot(self.builder.semantic(), self.channel_order)
    }

    // ── Loop entry points ────────────────────────────────────────────────────

    /// Execute one decoded remote call.
    pub async fn dispatch(&mut self, request: SlamRequest) -> Result<SlamReply, SlamError> {
        let reply = match request {
            SlamRequest::GetTraversableMap => SlamReply::TraversableMap(self.traversable_map()),
            SlamRequest::RealToMap(point) => SlamReply::Cell(self.real_to_map(point)?),
            SlamRequest::MapToReal(cell) => SlamReply::Point(self.map_to_real(cell)?),
            SlamRequest::RobotToMap(pose) => SlamReply::Cell(self.robot_to_map(pose)?),
            SlamRequest::MapToRobot(cell) => SlamReply::Pose(self.map_to_robot(cell)?),
            SlamRequest::AddObstacle(location) => {
                self.add_obstacle(location)?;
                SlamReply::Done
            }
            SlamRequest::UpdateMap => {
                self.update_map().await?;
                SlamReply::Done
            }
            SlamRequest::GetMapResolution => SlamReply::Resolution(self.map_resolution()),
            SlamRequest::GetMap => SlamReply::Obstacles(self.obstacle_list()),
            SlamRequest::ResetMap { map_size_cm } => {
                self.reset_map(map_size_cm)?;
                SlamReply::Done
            }
        };
        Ok(reply)
    }

    /// Periodic refresh: a map update whose failure is reported, not raised.
    pub async fn refresh(&mut self) -> RefreshReport {
        match self.update_map().await {
            Ok(points) => RefreshReport::Updated { points },
            Err(e) => RefreshReport::Degraded(e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
