use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw corner as produced by a corner detector, before any target logic.
#[derive(Clone, Copy, Debug)]
pub struct Corner {
    /// Position in image pixel coordinates.
    pub position: Point2<f32>,

    /// Orientation of the bright diagonal, defined modulo π.
    pub orientation: f32,

    /// Detector-specific strength (larger is better).
    pub strength: f32,
}

/// `(timestamp, camera)` key of one image in a multi-camera dataset.
///
/// The derived ordering (timestamp first, then camera) is the canonical
/// iteration and serialization order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId {
    pub timestamp_ns: i64,
    pub cam_id: usize,
}

impl FrameId {
    pub fn new(timestamp_ns: i64, cam_id: usize) -> Self {
        Self {
            timestamp_ns,
            cam_id,
        }
    }
}

/// Corners found in one frame, with parallel id and radius sequences.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CornerData {
    pub corners: Vec<Point2<f64>>,
    pub corner_ids: Vec<i32>,
    /// Subpixel search radius used for each corner, in pixels.
    pub radii: Vec<f64>,
    /// Position of the frame in the dataset's timestamp ordering.
    pub seq: u64,
}

impl CornerData {
    pub fn push(&mut self, corner: Point2<f64>, id: i32, radius: f64) {
        self.corners.push(corner);
        self.corner_ids.push(id);
        self.radii.push(radius);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.corners.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }

    /// Parallel sequences have equal length.
    pub fn is_consistent(&self) -> bool {
        self.corners.len() == self.corner_ids.len() && self.corners.len() == self.radii.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Point2<f64>, i32, f64)> + '_ {
        self.corners
            .iter()
            .zip(&self.corner_ids)
            .zip(&self.radii)
            .map(|((p, id), r)| (*p, *id, *r))
    }
}

pub type CornerMap = BTreeMap<FrameId, CornerData>;
