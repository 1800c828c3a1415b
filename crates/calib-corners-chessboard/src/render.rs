//! Synthetic checkerboard images.

use crate::ChessboardError;
use calib_corners_core::{Checkerboard, GrayImage};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerboardRenderParams {
    pub square_px: usize,
    pub margin_px: usize,
    pub black: u8,
    pub white: u8,
}

impl Default for CheckerboardRenderParams {
    fn default() -> Self {
        Self {
            square_px: 24,
            margin_px: 32,
            black: 30,
            white: 220,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckerboardLayout {
    pub square_px: usize,
    pub margin_px: usize,
}

impl CheckerboardLayout {
    /// Pixel-center position of inner corner `(row, col)`.
    pub fn corner_position(&self, row: usize, col: usize) -> Point2<f64> {
        let s = self.square_px as f64;
        let m = self.margin_px as f64;
        Point2::new(m + (col + 1) as f64 * s - 0.5, m + (row + 1) as f64 * s - 0.5)
    }
}

/// Render `board` upright with `(rows + 1) × (cols + 1)` squares; the
/// top-left square is black.
pub fn render_checkerboard(
    board: &Checkerboard,
    params: &CheckerboardRenderParams,
) -> Result<(GrayImage, CheckerboardLayout), ChessboardError> {
    board.validate()?;
    let sq = params.square_px.max(2);
    let layout = CheckerboardLayout {
        square_px: sq,
        margin_px: params.margin_px,
    };
    let (nx, ny) = (board.cols + 1, board.rows + 1);
    let width = 2 * params.margin_px + nx * sq;
    let height = 2 * params.margin_px + ny * sq;

    let mut img = GrayImage::filled(width, height, params.white);
    for y in 0..ny * sq {
        for x in 0..nx * sq {
            if (x / sq + y / sq) % 2 == 0 {
                img.set(params.margin_px + x, params.margin_px + y, params.black);
            }
        }
    }
    Ok((img, layout))
}
