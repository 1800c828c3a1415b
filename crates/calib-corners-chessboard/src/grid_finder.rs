//! Direct checkerboard grid finder: the whole `rows × cols` pattern or nothing.

use crate::assembly::{assemble_grid, BoardFit};
use crate::params::GridFinderParams;
use crate::saddle::detect_saddles;
use crate::ChessboardError;
use calib_corners_core::{refine_corner, Checkerboard, CornerData, GrayImageView};
use log::debug;
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Radius stored for candidates of a failed search.
pub const PLACEHOLDER_RADIUS: f64 = -1.0;

/// Reverse the whole sequence when its first row runs right to left.
///
/// Compares the first and the last corner of the first row, and only acts
/// when that row is mostly horizontal. This assumes the board is mounted
/// the same way in every image of a dataset; a board that is genuinely
/// rotated by 180° is not distinguished.
///
/// Corners assembled by [`GridFinder::detect`] already come ordered from
/// image-space offsets: an upright board runs left to right, and a board
/// rotated by 90° has a vertical first row read top to bottom, which is
/// left as is. The check matters for corner orders from other sources.
///
/// Returns `true` when the order was reversed.
pub fn correct_orientation(corners: &mut [Point2<f64>], cols: usize) -> bool {
    if cols < 2 || corners.len() < cols {
        return false;
    }
    let d = corners[0] - corners[cols - 1];
    if d.x > 0.0 && d.x.abs() > d.y.abs() {
        corners.reverse();
        true
    } else {
        false
    }
}

#[derive(Clone, Debug)]
pub struct GridFinder {
    board: Checkerboard,
    params: GridFinderParams,
}

impl GridFinder {
    pub fn new(board: Checkerboard, params: GridFinderParams) -> Result<Self, ChessboardError> {
        board.validate()?;
        Ok(Self { board, params })
    }

    pub fn board(&self) -> &Checkerboard {
        &self.board
    }

    /// Find the full board and return `(accepted, rejected)` corners.
    ///
    /// On success every corner is accepted with ids `0..rows*cols`. On
    /// failure all saddle candidates are rejected, with their candidate index
    /// as id and [`PLACEHOLDER_RADIUS`].
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, img), fields(width = img.width, height = img.height))
    )]
    pub fn detect(&self, img: &GrayImageView<'_>) -> (CornerData, CornerData) {
        let candidates = detect_saddles(img, &self.params.saddle);
        let (rows, cols) = (self.board.rows, self.board.cols);

        let found = assemble_grid(&candidates, &self.params.assembly).and_then(|comp| {
            let fit = BoardFit::exact(&comp, rows, cols)?;
            Some((comp, fit))
        });

        let Some((comp, fit)) = found else {
            debug!(
                "grid finder: {rows}x{cols} board not found among {} candidates",
                candidates.len()
            );
            let mut rejected = CornerData::default();
            for (idx, c) in candidates.iter().enumerate() {
                let p = Point2::new(c.position.x as f64, c.position.y as f64);
                rejected.push(p, idx as i32, PLACEHOLDER_RADIUS);
            }
            return (CornerData::default(), rejected);
        };

        let radius = (0.25 * comp.spacing as f64).max(1.0);
        let half_win = radius.round().max(2.0) as usize;

        let mut corners = vec![Point2::origin(); rows * cols];
        for &(n, i, j) in &comp.nodes {
            let (row, col) = fit.board_position(i, j);
            let p = candidates[n].position;
            let p = Point2::new(p.x as f64, p.y as f64);
            corners[row * cols + col] = if self.params.refine_corners {
                refine_corner(img, p, half_win, &self.params.subpix)
                    .filter(|q| (q - p).norm() <= radius)
                    .unwrap_or(p)
            } else {
                p
            };
        }

        if correct_orientation(&mut corners, cols) {
            debug!("grid finder: first row runs right to left, order reversed");
        }

        let mut accepted = CornerData::default();
        for (id, p) in corners.into_iter().enumerate() {
            accepted.push(p, id as i32, radius);
        }
        (accepted, CornerData::default())
    }
}
