//! Semantic map snapshot.
//!
//! Renders the semantic grid as a palette image for diagnostics.  The render
//! works on a copy: the live grid is never touched, and a failure here only
//! costs the picture.
//!
//! Steps:
//!
//! 1. Copy the grid and set its last channel plane to a tiny epsilon so every
//!    cell has a well-defined winner.
//! 2. Per cell, take the arg-max channel (lowest index on ties).
//! 3. Look the index up in [`PALETTE`].
//! 4. Flip rows so row 0 ends up at the bottom of the picture.
//! 5. Emit pixels in the requested [`ChannelOrder`].

use std::path::Path;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use locoslam_types::SlamError;

use crate::grid::SemanticGrid;

const TIE_BREAK_EPSILON: f32 = 1e-5;

/// Colour per arg-max index.  Index 0 is the empty background.
pub const PALETTE: [[u8; 3]; 16] = [
    [255, 255, 255],
    [153, 153, 153],
    [242, 242, 242],
    [245, 92, 66],
    [31, 120, 180],
    [240, 199, 168],
    [106, 176, 76],
    [171, 71, 188],
    [255, 167, 38],
    [0, 150, 136],
    [229, 57, 53],
    [94, 53, 177],
    [253, 216, 53],
    [141, 110, 99],
    [66, 165, 245],
    [236, 64, 122],
];

/// Byte order of each emitted pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    /// Red, green, blue: what the PNG encoder expects.
    #[default]
    Rgb,
    /// Blue, green, red: raw-frame consumers.
    Bgr,
}

/// A rendered snapshot: three bytes per pixel, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticSnapshot {
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
    pub pixels: Vec<u8>,
    /// Arg-max channel of every pixel, same layout as `pixels`.
    pub labels: Vec<usize>,
}

impl SemanticSnapshot {
    /// Colour of the pixel at `(x, y)` in the snapshot's own channel order.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }

    /// Write the snapshot as a PNG, replacing any existing file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SlamError::Snapshot`] if the image cannot be encoded or
    /// written.
    pub fn save_png(&self, path: &Path) -> Result<(), SlamError> {
        let mut rgb = self.pixels.clone();
        if self.order == ChannelOrder::Bgr {
            swap_red_blue(&mut rgb);
        }
        let img = RgbImage::from_raw(self.width, self.height, rgb).ok_or_else(|| {
            SlamError::Snapshot(format!(
                "pixel buffer does not fit a {}x{} image",
                self.width, self.height
            ))
        })?;
        img.save(path)
            .map_err(|e| SlamError::Snapshot(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), width = self.width, height = self.height, "semantic snapshot written");
        Ok(())
    }
}

fn swap_red_blue(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

/// Render `grid` into a [`SemanticSnapshot`].
///
/// # Errors
///
/// Returns [`SlamError::Snapshot`] when the grid has no channels or no cells.
pub fn render_semantic_snapshot(
    grid: &SemanticGrid,
    order: ChannelOrder,
) -> Result<SemanticSnapshot, SlamError> {
    let (channels, rows, cols) = grid.shape();
    if channels == 0 || rows == 0 || cols == 0 {
        return Err(SlamError::Snapshot(format!(
            "cannot render an empty {channels}x{rows}x{cols} semantic grid"
        )));
    }

    let mut scratch = grid.clone();
    scratch.plane_mut(channels - 1).fill(TIE_BREAK_EPSILON);

    let mut labels = vec![0usize; rows * cols];
    for (cell, label) in labels.iter_mut().enumerate() {
        let mut best = scratch.plane(0)[cell];
        for channel in 1..channels {
            let v = scratch.plane(channel)[cell];
            if v > best {
                best = v;
                *label = channel;
            }
        }
    }

    let mut flipped = Vec::with_capacity(labels.len());
    for row in (0..rows).rev() {
        flipped.extend_from_slice(&labels[row * cols..(row + 1) * cols]);
    }

    let mut pixels = Vec::with_capacity(flipped.len() * 3);
    for &label in &flipped {
        pixels.extend_from_slice(&PALETTE[label % PALETTE.len()]);
    }
    if order == ChannelOrder::Bgr {
        swap_red_blue(&mut pixels);
    }

    Ok(SemanticSnapshot {
        width: cols as u32,
        height: rows as u32,
        order,
        pixels,
        labels: flipped,
    })
}
