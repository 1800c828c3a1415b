//! Checkerboard corner detection.
//!
//! Two backends share the same grid assembly:
//! - [`ChessboardDetector`]: ChESS corners from `chess-corners`, strength
//!   filter, neighbour graph, largest consistent component fitted onto the
//!   board. Partial views are accepted.
//! - [`GridFinder`]: Hessian saddle points; the complete `rows × cols`
//!   pattern must be found, then it is refined and its order corrected.
//!
//! Grid assembly:
//! 1. Estimate the square spacing from the median nearest-neighbour distance.
//! 2. Link each corner to at most one neighbour per direction, requiring
//!    orthogonal orientations and edges at ~45° to both.
//! 3. Keep mutual edges, BFS each component into integer coordinates and
//!    drop components whose coordinates conflict.

use calib_corners_core::TargetError;

mod assembly;
mod chess;
mod geom;
mod grid_finder;
mod gridgraph;
mod params;
mod render;
mod saddle;

pub use assembly::{assemble_grid, estimate_spacing, BoardFit, GridComponent};
pub use chess::{chess_config, detect_chess_corners, ChessboardDetector};
pub use grid_finder::{correct_orientation, GridFinder, PLACEHOLDER_RADIUS};
pub use gridgraph::{GridGraph, NeighborDirection, NodeNeighbor};
pub use params::{
    AssemblyParams, ChessDetectorParams, ChessboardParams, GridFinderParams, GridGraphParams,
    SaddleParams,
};
pub use render::{render_checkerboard, CheckerboardLayout, CheckerboardRenderParams};
pub use saddle::detect_saddles;

#[derive(thiserror::Error, Debug)]
pub enum ChessboardError {
    #[error(transparent)]
    Target(#[from] TargetError),
}
