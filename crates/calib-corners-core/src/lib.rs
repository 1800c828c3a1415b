//! Core types for calibration corner detection.
//!
//! This crate holds everything the detectors, the cache and the pose
//! initializer share: image buffers, homographies, subpixel refinement,
//! target geometry and the per-frame corner records. It does not depend on
//! any concrete corner detector.

mod corner;
mod homography;
mod image;
mod logger;
mod subpix;
mod target;

pub use corner::{Corner, CornerData, CornerMap, FrameId};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{
    get_gray_clamped, sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView, ImageError,
    Pixels, RawImage,
};
pub use subpix::{refine_corner, SubpixParams};
pub use target::{
    AprilGrid, Checkerboard, TargetError, TargetGeometry, TargetType, DEFAULT_VIGNETTE_POINTS,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_stderr;
