//! Checkerboard detection on top of ChESS corners.

use crate::assembly::{assemble_grid, estimate_spacing, BoardFit};
use crate::params::{ChessDetectorParams, ChessboardParams};
use crate::ChessboardError;
use calib_corners_core::{Checkerboard, Corner, CornerData, GrayImageView};
use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor, ThresholdMode};
use log::{debug, warn};
use nalgebra::Point2;
use std::f32::consts::{PI, TAU};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// `chess-corners` configuration for the given response settings.
pub fn chess_config(params: &ChessDetectorParams) -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.threshold_mode = ThresholdMode::Relative;
    cfg.threshold_value = params.threshold_rel;
    cfg.nms_radius = params.nms_radius;
    cfg
}

/// White diagonal of a ChESS descriptor.
///
/// Sweeping from `axes[0]` to `axes[1]` crosses a dark sector, so the bright
/// sector spans `axes[1] .. axes[0] + π` and its bisector is the diagonal.
fn white_diagonal(c: &CornerDescriptor) -> f32 {
    let [a0, a1] = [c.axes[0].angle, c.axes[1].angle];
    (0.5 * (a0 + a1 + PI)).rem_euclid(TAU).rem_euclid(PI)
}

fn adapt_chess_corner(c: &CornerDescriptor) -> Corner {
    Corner {
        position: Point2::new(c.x, c.y),
        orientation: white_diagonal(c),
        strength: c.response,
    }
}

/// Raw ChESS corners of an 8-bit view.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, params), fields(width = img.width, height = img.height))
)]
pub fn detect_chess_corners(img: &GrayImageView<'_>, params: &ChessDetectorParams) -> Vec<Corner> {
    let Some(buf) =
        ::image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.to_vec())
    else {
        return Vec::new();
    };
    match find_chess_corners_image(&buf, &chess_config(params)) {
        Ok(found) => found.iter().map(adapt_chess_corner).collect(),
        Err(err) => {
            warn!("chess-corners failed: {err}");
            Vec::new()
        }
    }
}

/// Checkerboard detector: ChESS corners assembled into the largest
/// consistent grid that fits on the board.
///
/// Accepted ids are row-major board positions (`row * cols + col`) counted
/// from the top-left corner of the detected component, so a partial view
/// is anchored at its own top-left corner.
#[derive(Clone, Debug)]
pub struct ChessboardDetector {
    board: Checkerboard,
    params: ChessboardParams,
}

impl ChessboardDetector {
    pub fn new(board: Checkerboard, params: ChessboardParams) -> Result<Self, ChessboardError> {
        board.validate()?;
        Ok(Self { board, params })
    }

    pub fn board(&self) -> &Checkerboard {
        &self.board
    }

    /// Detect and return `(accepted, rejected)` corners.
    pub fn detect(&self, img: &GrayImageView<'_>) -> (CornerData, CornerData) {
        let corners = detect_chess_corners(img, &self.params.chess);
        self.detect_from_corners(&corners)
    }

    /// Grid assembly on an already detected corner cloud.
    pub fn detect_from_corners(&self, corners: &[Corner]) -> (CornerData, CornerData) {
        let strong: Vec<Corner> = corners
            .iter()
            .copied()
            .filter(|c| c.strength >= self.params.min_strength)
            .collect();
        debug!(
            "chessboard: {} raw corners, {} after strength filter",
            corners.len(),
            strong.len()
        );

        let mut accepted = CornerData::default();
        let mut rejected = CornerData::default();

        let component = if strong.len() >= self.params.min_corners {
            assemble_grid(&strong, &self.params.assembly)
        } else {
            None
        };

        let spacing = component
            .as_ref()
            .map(|c| c.spacing)
            .or_else(|| estimate_spacing(&strong))
            .unwrap_or(4.0) as f64;
        let radius = 0.25 * spacing;

        let placed = component.as_ref().and_then(|comp| {
            if comp.nodes.len() < self.params.min_corners {
                return None;
            }
            let fit = BoardFit::within(comp, self.board.rows, self.board.cols)?;
            Some((comp, fit))
        });

        let mut on_board = vec![false; strong.len()];
        if let Some((comp, fit)) = placed {
            let mut found: Vec<(i32, Point2<f64>)> = comp
                .nodes
                .iter()
                .map(|&(n, i, j)| {
                    let (row, col) = fit.board_position(i, j);
                    on_board[n] = true;
                    let p = strong[n].position;
                    ((row * self.board.cols + col) as i32, Point2::new(p.x as f64, p.y as f64))
                })
                .collect();
            found.sort_by_key(|(id, _)| *id);
            for (id, p) in found {
                accepted.push(p, id, radius);
            }
        }

        for (c, _) in strong.iter().zip(&on_board).filter(|(_, used)| !**used) {
            let p = Point2::new(c.position.x as f64, c.position.y as f64);
            rejected.push(p, -1, radius);
        }

        debug!(
            "chessboard: accepted {} corners ({} rejected)",
            accepted.len(),
            rejected.len()
        );
        (accepted, rejected)
    }
}
