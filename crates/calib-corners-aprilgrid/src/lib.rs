//! AprilGrid detection.
//!
//! Pipeline: adaptive threshold, connected components, quad fit, bit
//! sampling through the quad homography, dictionary match in all four
//! rotations, then canonical corner ids `(tag << 2) + corner`.
//!
//! ```no_run
//! use calib_corners_aprilgrid::{AprilGridDetector, AprilGridParams};
//! use calib_corners_core::{AprilGrid, GrayImage};
//!
//! let grid = AprilGrid::new(7, 4, 0.0946, 0.3, 0, "16h5").unwrap();
//! let detector = AprilGridDetector::new(grid, AprilGridParams::default()).unwrap();
//! let img = GrayImage::filled(640, 480, 255);
//! let (accepted, rejected) = detector.detect(&img.view());
//! println!("{} corners, {} rejected", accepted.len(), rejected.len());
//! ```

mod decode;
mod detector;
mod dictionary;
mod matcher;
mod quad;
mod render;
mod threshold;

pub use detector::{AprilGridDetector, AprilGridError, AprilGridParams};
pub use dictionary::{family_dictionary, Dictionary, TAG16H5};
pub use matcher::{rotate_code_u64, Match, Matcher};
pub use quad::QuadParams;
pub use render::{render_aprilgrid, AprilGridLayout, AprilGridRenderParams};
