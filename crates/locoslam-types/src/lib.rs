//! `locoslam-types` – shared value types for the mapping service.
//!
//! Everything that crosses a crate or process boundary lives here: poses and
//! cells, sensor frames supplied by the robot, the immutable [`MapConfig`],
//! the [`SlamError`] taxonomy, and the JSON wire envelope spoken by the
//! remote call boundary.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Spatial primitives
// ────────────────────────────────────────────────────────────────────────────

/// A point in the real-world frame (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RealPoint {
    pub x: f32,
    pub y: f32,
}

impl RealPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Planar robot pose: position in metres, heading in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub yaw: f32,
}

impl Pose {
    pub fn new(x: f32, y: f32, yaw: f32) -> Self {
        Self { x, y, yaw }
    }

    /// The zero pose (origin, facing +X).
    pub fn origin() -> Self {
        Self::default()
    }

    pub fn position(&self) -> RealPoint {
        RealPoint::new(self.x, self.y)
    }
}

/// A map-cell index.  Signed because a real-world location may resolve to a
/// cell outside the grid; callers that write to the grid must bounds-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapCell {
    pub row: i64,
    pub col: i64,
}

impl MapCell {
    pub fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }
}

/// Where an obstacle should be placed: either in the real-world frame or
/// directly in map cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObstacleLocation {
    Real(RealPoint),
    Map(MapCell),
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor frames
// ────────────────────────────────────────────────────────────────────────────

/// Identifier of one physical object instance in a semantic frame.
pub type InstanceId = i64;

/// Category index → instance ids currently known to belong to it.
pub type CategoryInstanceLists = BTreeMap<usize, BTreeSet<InstanceId>>;

/// Point cloud captured by the robot, in metres, together with the robot's
/// base pose at capture time.
///
/// The points are pixel-aligned with the depth image of the matching
/// [`SegmentationFrame`] (one point per pixel, row-major); pixels without a
/// valid depth carry non-finite coordinates, which travel as JSON `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointCloudFrame {
    #[serde(deserialize_with = "nullable_points")]
    pub points: Vec<[f32; 3]>,
    #[serde(default)]
    pub base_state: Pose,
}

fn nullable_points<'de, D>(deserializer: D) -> Result<Vec<[f32; 3]>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Vec<[Option<f32>; 3]> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|p| p.map(|v| v.unwrap_or(f32::NAN)))
        .collect())
}

/// RGB, depth and per-pixel instance ids of one camera frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentationFrame {
    pub width: u32,
    pub height: u32,
    /// RGB24, row-major.  Unused by the mapping core.
    #[serde(default)]
    pub rgb: Vec<u8>,
    /// Depth in metres, row-major.  Unused by the mapping core.
    #[serde(default)]
    pub depth: Vec<f32>,
    /// Instance id of every pixel, row-major.
    pub semantic: Vec<InstanceId>,
}

impl SegmentationFrame {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Check that the instance buffer matches the declared dimensions.
    pub fn validate(&self) -> Result<(), SlamError> {
        if self.semantic.len() != self.pixel_count() {
            return Err(SlamError::Robot(format!(
                "segmentation frame is {}x{} but carries {} instance ids",
                self.width,
                self.height,
                self.semantic.len()
            )));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Boolean grid
// ────────────────────────────────────────────────────────────────────────────

/// Row-major boolean grid, the serialisable form of the traversability mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolGrid {
    pub rows: usize,
    pub cols: usize,
    pub cells: Vec<bool>,
}

impl BoolGrid {
    pub fn filled(rows: usize, cols: usize, value: bool) -> Self {
        Self {
            rows,
            cols,
            cells: vec![value; rows * cols],
        }
    }

    /// Value at `(row, col)`, or `None` outside the grid.
    pub fn get(&self, row: i64, col: i64) -> Option<bool> {
        if row < 0 || col < 0 || row as usize >= self.rows || col as usize >= self.cols {
            return None;
        }
        Some(self.cells[row as usize * self.cols + col as usize])
    }

    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        self.cells[row * self.cols + col] = value;
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn count(&self, value: bool) -> usize {
        self.cells.iter().filter(|&&c| c == value).count()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Grid resolution and robot footprint; immutable once the service is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Side length of the square map (cm).
    pub map_size_cm: u32,
    /// Cell size (cm per cell).
    pub resolution_cm: u32,
    /// Robot footprint radius (cm).
    pub robot_radius_cm: f32,
    /// Lower edge of the sensed height band (cm).
    pub agent_min_z_cm: f32,
    /// Upper edge of the sensed height band (cm).
    pub agent_max_z_cm: f32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            map_size_cm: 4000,
            resolution_cm: 5,
            robot_radius_cm: 30.0,
            agent_min_z_cm: 5.0,
            agent_max_z_cm: 70.0,
        }
    }
}

impl MapConfig {
    /// Largest grid side (cells) a map may be built or reset to.  Both grids
    /// together take about 80 bytes per cell.
    pub const MAX_CELLS_PER_SIDE: u32 = 4096;

    /// Reject configurations that cannot produce a usable grid.
    pub fn validate(&self) -> Result<(), SlamError> {
        if self.resolution_cm == 0 {
            return Err(SlamError::InvalidConfig(
                "resolution_cm must be positive".to_string(),
            ));
        }
        Self::check_map_size(self.map_size_cm, self.resolution_cm)?;
        if !(self.agent_min_z_cm < self.agent_max_z_cm) {
            return Err(SlamError::InvalidConfig(format!(
                "height band [{}, {}] cm is empty",
                self.agent_min_z_cm, self.agent_max_z_cm
            )));
        }
        if !(self.robot_radius_cm >= 0.0) || !self.robot_radius_cm.is_finite() {
            return Err(SlamError::InvalidConfig(format!(
                "robot_radius_cm must be a non-negative number, got {}",
                self.robot_radius_cm
            )));
        }
        Ok(())
    }

    /// Check that a `map_size_cm` map at `resolution_cm` holds at least one
    /// cell and at most [`MAX_CELLS_PER_SIDE`](Self::MAX_CELLS_PER_SIDE)
    /// cells per side.
    pub fn check_map_size(map_size_cm: u32, resolution_cm: u32) -> Result<(), SlamError> {
        if resolution_cm == 0 || map_size_cm < resolution_cm {
            return Err(SlamError::InvalidConfig(format!(
                "map_size_cm ({map_size_cm}) must be at least one cell ({resolution_cm} cm)"
            )));
        }
        let cells = map_size_cm / resolution_cm;
        if cells > Self::MAX_CELLS_PER_SIDE {
            return Err(SlamError::InvalidConfig(format!(
                "map_size_cm ({map_size_cm}) at {resolution_cm} cm per cell needs {cells} cells per side; the limit is {}",
                Self::MAX_CELLS_PER_SIDE
            )));
        }
        Ok(())
    }

    /// Robot radius expressed in grid cells.
    pub fn robot_radius_cells(&self) -> f32 {
        self.robot_radius_cm / self.resolution_cm as f32
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Every failure the service can report.  Serialisable so remote callers
/// receive the same variant the service raised.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlamError {
    #[error("cell ({row}, {col}) is outside the {rows}x{cols} grid")]
    OutOfBounds {
        row: i64,
        col: i64,
        rows: usize,
        cols: usize,
    },

    #[error("point cloud has {points} points but the semantic frame has {pixels} pixels")]
    LengthMismatch { points: usize, pixels: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Robot collaborator error: {0}")]
    Robot(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Coordinate out of range: {0}")]
    OutOfRange(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid params for {method}: {details}")]
    InvalidParams { method: String, details: String },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Service failed to start: {0}")]
    StartupFatal(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Wire envelope
// ────────────────────────────────────────────────────────────────────────────

/// One request frame on the call boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: Uuid,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            params,
        }
    }
}

/// The answer to an [`RpcRequest`] with the same `id`.  Exactly one of
/// `result` / `error` is meaningful; a missing `result` on success means
/// `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SlamError>,
}

impl RpcResponse {
    pub fn from_result(id: Uuid, outcome: Result<Value, SlamError>) -> Self {
        match outcome {
            Ok(value) => Self {
                id,
                result: Some(value),
                error: None,
            },
            Err(e) => Self {
                id,
                result: None,
                error: Some(e),
            },
        }
    }

    pub fn into_result(self) -> Result<Value, SlamError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Remote method names exposed by the mapping service.
pub mod methods {
    pub const GET_TRAVERSABLE_MAP: &str = "getTraversableMap";
    pub const REAL_TO_MAP: &str = "real2map";
    pub const MAP_TO_REAL: &str = "map2real";
    pub const ROBOT_TO_MAP: &str = "robot2map";
    pub const MAP_TO_ROBOT: &str = "map2robot";
    pub const ADD_OBSTACLE: &str = "addObstacle";
    pub const UPDATE_MAP: &str = "updateMap";
    pub const GET_MAP_RESOLUTION: &str = "getMapResolution";
    pub const GET_MAP: &str = "getMap";
    pub const RESET_MAP: &str = "resetMap";
}

#[derive(Debug, Serialize, Deserialize)]
struct AddObstacleParams {
    location: [f64; 2],
    #[serde(default)]
    in_map: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ResetMapParams {
    #[serde(default)]
    map_size_cm: Option<u32>,
}

/// A decoded call against the mapping service.
#[derive(Debug, Clone, PartialEq)]
pub enum SlamRequest {
    GetTraversableMap,
    RealToMap(RealPoint),
    MapToReal(MapCell),
    RobotToMap(Pose),
    MapToRobot(MapCell),
    AddObstacle(ObstacleLocation),
    UpdateMap,
    GetMapResolution,
    GetMap,
    ResetMap { map_size_cm: Option<u32> },
}

impl SlamRequest {
    /// Decode a method name and its JSON params.
    pub fn from_rpc(method: &str, params: Value) -> Result<Self, SlamError> {
        let invalid = |e: serde_json::Error| SlamError::InvalidParams {
            method: method.to_string(),
            details: e.to_string(),
        };
        let request = match method {
            methods::GET_TRAVERSABLE_MAP => Self::GetTraversableMap,
            methods::REAL_TO_MAP => Self::RealToMap(serde_json::from_value(params).map_err(invalid)?),
            methods::MAP_TO_REAL => Self::MapToReal(serde_json::from_value(params).map_err(invalid)?),
            methods::ROBOT_TO_MAP => Self::RobotToMap(serde_json::from_value(params).map_err(invalid)?),
            methods::MAP_TO_ROBOT => Self::MapToRobot(serde_json::from_value(params).map_err(invalid)?),
            methods::ADD_OBSTACLE => {
                let p: AddObstacleParams = serde_json::from_value(params).map_err(invalid)?;
                let [a, b] = p.location;
                if p.in_map {
                    if a.fract() != 0.0 || b.fract() != 0.0 || !a.is_finite() || !b.is_finite() {
                        return Err(SlamError::InvalidParams {
                            method: method.to_string(),
                            details: format!("map location [{a}, {b}] is not an integer cell"),
                        });
                    }
                    Self::AddObstacle(ObstacleLocation::Map(MapCell::new(a as i64, b as i64)))
                } else {
                    Self::AddObstacle(ObstacleLocation::Real(RealPoint::new(a as f32, b as f32)))
                }
            }
            methods::UPDATE_MAP => Self::UpdateMap,
            methods::GET_MAP_RESOLUTION => Self::GetMapResolution,
            methods::GET_MAP => Self::GetMap,
            methods::RESET_MAP => {
                let p: ResetMapParams = if params.is_null() {
                    ResetMapParams::default()
                } else {
                    serde_json::from_value(params).map_err(invalid)?
                };
                Self::ResetMap {
                    map_size_cm: p.map_size_cm,
                }
            }
            other => return Err(SlamError::UnknownMethod(other.to_string())),
        };
        Ok(request)
    }

    /// Wire name of this call.
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetTraversableMap => methods::GET_TRAVERSABLE_MAP,
            Self::RealToMap(_) => methods::REAL_TO_MAP,
            Self::MapToReal(_) => methods::MAP_TO_REAL,
            Self::RobotToMap(_) => methods::ROBOT_TO_MAP,
            Self::MapToRobot(_) => methods::MAP_TO_ROBOT,
            Self::AddObstacle(_) => methods::ADD_OBSTACLE,
            Self::UpdateMap => methods::UPDATE_MAP,
            Self::GetMapResolution => methods::GET_MAP_RESOLUTION,
            Self::GetMap => methods::GET_MAP,
            Self::ResetMap { .. } => methods::RESET_MAP,
        }
    }

    /// Encode into the [`RpcRequest`] a remote caller would send.
    pub fn to_rpc(&self) -> RpcRequest {
        let params = match self {
            Self::RealToMap(p) => serde_json::json!(p),
            Self::MapToReal(c) | Self::MapToRobot(c) => serde_json::json!(c),
            Self::RobotToMap(p) => serde_json::json!(p),
            Self::AddObstacle(ObstacleLocation::Real(p)) => serde_json::json!(AddObstacleParams {
                location: [p.x as f64, p.y as f64],
                in_map: false,
            }),
            Self::AddObstacle(ObstacleLocation::Map(c)) => serde_json::json!(AddObstacleParams {
                location: [c.row as f64, c.col as f64],
                in_map: true,
            }),
            Self::ResetMap { map_size_cm } => serde_json::json!(ResetMapParams {
                map_size_cm: *map_size_cm,
            }),
            Self::GetTraversableMap | Self::UpdateMap | Self::GetMapResolution | Self::GetMap => {
                Value::Null
            }
        };
        RpcRequest::new(self.method(), params)
    }
}

/// The successful outcome of a [`SlamRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SlamReply {
    TraversableMap(BoolGrid),
    Cell(MapCell),
    Point(RealPoint),
    Pose(Pose),
    Resolution(u32),
    Obstacles(Vec<RealPoint>),
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_map_config_is_valid() {
        let cfg = MapConfig::default();
        assert!(cfg.validate().is_ok());
        assert!((cfg.robot_radius_cells() - 6.0).abs() < f32::EPSILON);
    }

    #[test]
    fn map_config_rejects_zero_resolution() {
        let cfg = MapConfig {
            resolution_cm: 0,
            ..MapConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SlamError::InvalidConfig(_))));
    }

    #[test]
    fn map_config_rejects_oversized_grid() {
        let cfg = MapConfig {
            map_size_cm: u32::MAX,
            ..MapConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SlamError::InvalidConfig(_))));

        let at_limit = MapConfig {
            map_size_cm: MapConfig::MAX_CELLS_PER_SIDE * 5,
            resolution_cm: 5,
            ..MapConfig::default()
        };
        assert!(at_limit.validate().is_ok());
        assert!(MapConfig::check_map_size(MapConfig::MAX_CELLS_PER_SIDE * 5 + 5, 5).is_err());
    }

    #[test]
    fn map_config_rejects_inverted_height_band() {
        let cfg = MapConfig {
            agent_min_z_cm: 80.0,
            agent_max_z_cm: 70.0,
            ..MapConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SlamError::InvalidConfig(_))));
    }

    #[test]
    fn map_config_rejects_negative_radius() {
        let cfg = MapConfig {
            robot_radius_cm: -1.0,
            ..MapConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bool_grid_get_outside_is_none() {
        let grid = BoolGrid::filled(2, 3, true);
        assert_eq!(grid.get(1, 2), Some(true));
        assert_eq!(grid.get(2, 0), None);
        assert_eq!(grid.get(0, -1), None);
        assert_eq!(grid.count(true), 6);
    }

    #[test]
    fn segmentation_frame_validate_catches_short_buffer() {
        let frame = SegmentationFrame {
            width: 2,
            height: 2,
            semantic: vec![0, 1, 2],
            ..SegmentationFrame::default()
        };
        assert!(matches!(frame.validate(), Err(SlamError::Robot(_))));
    }

    #[test]
    fn point_cloud_nan_travels_as_null() {
        let frame = PointCloudFrame {
            points: vec![[1.0, f32::NAN, 0.5]],
            base_state: Pose::origin(),
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("null"));
        let back: PointCloudFrame = serde_json::from_str(&text).unwrap();
        assert!(back.points[0][1].is_nan());
        assert_eq!(back.points[0][0], 1.0);
    }

    #[test]
    fn pose_yaw_defaults_to_zero() {
        let pose: Pose = serde_json::from_value(json!({"x": 1.0, "y": 2.0})).unwrap();
        assert_eq!(pose, Pose::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn from_rpc_decodes_real2map() {
        let req = SlamRequest::from_rpc("real2map", json!({"x": 0.5, "y": -1.0})).unwrap();
        assert_eq!(req, SlamRequest::RealToMap(RealPoint::new(0.5, -1.0)));
    }

    #[test]
    fn from_rpc_add_obstacle_defaults_to_real_frame() {
        let req = SlamRequest::from_rpc("addObstacle", json!({"location": [1.5, 2.0]})).unwrap();
        assert_eq!(
            req,
            SlamRequest::AddObstacle(ObstacleLocation::Real(RealPoint::new(1.5, 2.0)))
        );
    }

    #[test]
    fn from_rpc_add_obstacle_in_map_requires_integer_cell() {
        let ok = SlamRequest::from_rpc("addObstacle", json!({"location": [3, 4], "in_map": true}));
        assert_eq!(
            ok.unwrap(),
            SlamRequest::AddObstacle(ObstacleLocation::Map(MapCell::new(3, 4)))
        );

        let err = SlamRequest::from_rpc("addObstacle", json!({"location": [3.5, 4], "in_map": true}));
        assert!(matches!(err, Err(SlamError::InvalidParams { .. })));
    }

    #[test]
    fn from_rpc_reset_map_accepts_null_params() {
        let req = SlamRequest::from_rpc("resetMap", Value::Null).unwrap();
        assert_eq!(req, SlamRequest::ResetMap { map_size_cm: None });

        let req = SlamRequest::from_rpc("resetMap", json!({"map_size_cm": 200})).unwrap();
        assert_eq!(req, SlamRequest::ResetMap { map_size_cm: Some(200) });
    }

    #[test]
    fn from_rpc_unknown_method() {
        let err = SlamRequest::from_rpc("planPath", Value::Null).unwrap_err();
        assert_eq!(err, SlamError::UnknownMethod("planPath".to_string()));
    }

    #[test]
    fn from_rpc_bad_params_names_the_method() {
        let err = SlamRequest::from_rpc("map2real", json!({"row": "a"})).unwrap_err();
        match err {
            SlamError::InvalidParams { method, .. } => assert_eq!(method, "map2real"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn to_rpc_is_accepted_by_from_rpc() {
        let original = SlamRequest::AddObstacle(ObstacleLocation::Map(MapCell::new(7, 9)));
        let rpc = original.to_rpc();
        assert_eq!(rpc.method, "addObstacle");
        assert_eq!(SlamRequest::from_rpc(&rpc.method, rpc.params).unwrap(), original);
    }

    #[test]
    fn reply_done_serialises_as_null() {
        assert_eq!(serde_json::to_value(SlamReply::Done).unwrap(), Value::Null);
        assert_eq!(
            serde_json::to_value(SlamReply::Cell(MapCell::new(1, 2))).unwrap(),
            json!({"row": 1, "col": 2})
        );
    }

    #[test]
    fn response_error_survives_the_wire() {
        let id = Uuid::new_v4();
        let err = SlamError::OutOfBounds {
            row: -1,
            col: 0,
            rows: 10,
            cols: 10,
        };
        let resp = RpcResponse::from_result(id, Err(err.clone()));
        let text = serde_json::to_string(&resp).unwrap();
        let back: RpcResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(back.id, id);
        assert_eq!(back.into_result().unwrap_err(), err);
    }

    #[test]
    fn response_null_result_is_ok() {
        let resp = RpcResponse::from_result(Uuid::new_v4(), Ok(Value::Null));
        let text = serde_json::to_string(&resp).unwrap();
        let back: RpcResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(back.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn slam_error_display() {
        let err = SlamError::LengthMismatch {
            points: 3,
            pixels: 4,
        };
        assert!(err.to_string().contains("3 points"));
        assert!(SlamError::StartupFatal("x".into()).to_string().contains("failed to start"));
    }
}
