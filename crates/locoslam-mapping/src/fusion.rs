//! Semantic Channel Fusion.
//!
//! Turns a per-pixel *instance* frame into per-*category* boolean channels.
//! Instance → category membership is supplied by the robot collaborator; this
//! step only aggregates, it never classifies.
//!
//! Channel layout for `N` configured categories:
//!
//! ```text
//! channel 0        reserved (background / unknown), always false here
//! channel c + 1    pixels whose instance id belongs to category c
//! ```
//!
//! An instance id listed under several categories is claimed by the lowest
//! category index, so a pixel is set in at most one channel.
//!
//! # Example
//!
//! ```rust
//! use locoslam_mapping::fusion::fuse_semantics;
//! use locoslam_types::CategoryInstanceLists;
//!
//! let mut lists = CategoryInstanceLists::new();
//! lists.entry(0).or_default().insert(7);
//!
//! let channels = fuse_semantics(&[7, 3, 7], &lists, 2);
//! assert!(channels.get(0, 1));
//! assert!(!channels.get(1, 1));
//! assert!(!channels.get(0, 2));
//! ```

use std::collections::HashMap;

use locoslam_types::{CategoryInstanceLists, InstanceId};
use tracing::debug;

/// Per-pixel category flags, pixel-major (`pixel * channels + channel`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryChannels {
    pixels: usize,
    channels: usize,
    data: Vec<bool>,
}

impl CategoryChannels {
    /// All-false channels for `pixels` pixels and `num_categories` categories
    /// (plus the reserved channel 0).
    pub fn empty(pixels: usize, num_categories: usize) -> Self {
        let channels = num_categories + 1;
        Self {
            pixels,
            channels,
            data: vec![false; pixels * channels],
        }
    }

    pub fn pixels(&self) -> usize {
        self.pixels
    }

    /// Number of channels including the reserved channel 0.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Flag of `channel` at `pixel`.  Out-of-range lookups read as `false`.
    pub fn get(&self, pixel: usize, channel: usize) -> bool {
        if pixel >= self.pixels || channel >= self.channels {
            return false;
        }
        self.data[pixel * self.channels + channel]
    }

    /// All channel flags of one pixel.
    pub fn pixel(&self, pixel: usize) -> &[bool] {
        let start = pixel * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Number of pixels set in `channel`.
    pub fn count(&self, channel: usize) -> usize {
        (0..self.pixels).filter(|&p| self.get(p, channel)).count()
    }

    fn set(&mut self, pixel: usize, channel: usize) {
        self.data[pixel * self.channels + channel] = true;
    }
}

/// Fuse an instance frame into category channels.
///
/// `num_categories` bounds the output; categories in `lists` at or beyond it
/// are ignored.  A category with an empty (or missing) instance list yields an
/// all-false channel.
pub fn fuse_semantics(
    instance_frame: &[InstanceId],
    lists: &CategoryInstanceLists,
    num_categories: usize,
) -> CategoryChannels {
    // BTreeMap iterates categories in ascending order, so the first insert
    // for an id is the lowest category that lists it.
    let mut owner: HashMap<InstanceId, usize> = HashMap::new();
    for (&category, instances) in lists {
        if category >= num_categories {
            debug!(category, num_categories, "ignoring instances of unconfigured category");
            continue;
        }
        for &id in instances {
            owner.entry(id).or_insert(category);
        }
    }

    let mut channels = CategoryChannels::empty(instance_frame.len(), num_categories);
    for (pixel, id) in instance_frame.iter().enumerate() {
        if let Some(&category) = owner.get(id) {
            channels.set(pixel, category + 1);
        }
    }
    channels
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
