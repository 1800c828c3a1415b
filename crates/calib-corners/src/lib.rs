//! Calibration corner pipeline.
//!
//! This crate ties the detector crates together:
//! - [`DetectionStrategy`]: AprilGrid decoding, ChESS-based checkerboard
//!   detection or the direct checkerboard grid finder behind one `process`.
//! - [`CornerCache`]: binary corner cache plus a JSON mirror, reused only when
//!   backend and target parameters match.
//! - [`CornerDetectionRun`]: fork-join detection over a [`Dataset`] on the
//!   thread pool of a [`PipelineContext`].
//! - [`pose`]: initial camera-from-target poses from cached corners.
//!
//! ## Quickstart
//!
//! ```no_run
//! use calib_corners::{CornerDetectionRun, FolderDataset, PipelineConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = PipelineConfig::load_json("pipeline.json")?;
//! let strategy = cfg.build_strategy()?;
//! let ctx = cfg.build_context()?;
//! let dataset = FolderDataset::open("dataset/")?;
//!
//! let mut run = CornerDetectionRun::new(&ctx, &dataset, &strategy);
//! if let Some(paths) = cfg.cache_paths() {
//!     run = run.with_cache(paths);
//! }
//! let outcome = run.run()?;
//! println!("{} frames", outcome.cache.accepted.len());
//! # Ok(())
//! # }
//! ```

pub use calib_corners_aprilgrid as aprilgrid;
pub use calib_corners_chessboard as chessboard;
pub use calib_corners_core as core;
pub use calib_corners_pose as pose;

mod cache;
mod codec;
mod config;
mod context;
mod dataset;
mod dispatcher;
mod strategy;

pub use cache::{CacheError, CachePaths, CornerCache, CACHE_BIN_NAME, CACHE_JSON_NAME};
pub use codec::{FORMAT_VERSION, MAGIC};
pub use config::{ConfigError, PipelineConfig};
pub use context::{PipelineContext, DEFAULT_CHUNK_SIZE};
pub use dataset::{Dataset, DatasetError, InMemoryDataset, MAX_CAMERAS};
pub use dispatcher::{CancelToken, CornerDetectionRun, DetectionOutcome, DispatchError};
pub use strategy::{
    BackendConfig, DetectionStrategy, StrategyError, APRILGRID_TAG, CACHE_TAGS,
    CHECKERBOARD_CHESS_TAG, CHECKERBOARD_GRID_TAG,
};

#[cfg(feature = "image")]
pub use dataset::FolderDataset;

pub use calib_corners_core::{CornerData, CornerMap, FrameId, RawImage, TargetGeometry};
