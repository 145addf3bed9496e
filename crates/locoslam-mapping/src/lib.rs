//! `locoslam-mapping` – the spatial core of the mapping service.
//!
//! Pure, synchronous building blocks.  Nothing here talks to the robot or
//! the network; the runtime crate feeds sensor frames in and serves the
//! results out.
//!
//! # Modules
//!
//! - [`transform`] – [`GridGeometry`][transform::GridGeometry] and
//!   [`FrameTransform`][transform::FrameTransform]: conversions between the
//!   real, map and robot frames.
//! - [`fusion`] – [`fuse_semantics`][fusion::fuse_semantics]: turns a
//!   per-pixel instance frame into per-category channels.
//! - [`grid`] – [`MapBuilder`][grid::MapBuilder]: owns the occupancy and
//!   semantic grids and folds point clouds into them.
//! - [`traversability`] – [`TraversabilityMask`][traversability::TraversabilityMask]:
//!   obstacle dilation by the robot footprint.
//! - [`snapshot`] – [`render_semantic_snapshot`][snapshot::render_semantic_snapshot]:
//!   palette rendering of the semantic grid for diagnostics.

pub mod fusion;
pub mod grid;
pub mod snapshot;
pub mod transform;
pub mod traversability;

/// Indoor COCO categories tracked by the semantic grid.  Category `i` lives
/// in semantic channel `i + 1`.
pub const COCO_CATEGORIES: [&str; 15] = [
    "chair",
    "couch",
    "potted plant",
    "bed",
    "toilet",
    "tv",
    "dining-table",
    "oven",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "cup",
    "bottle",
];
