//! Synthetic AprilGrid images.

use crate::{family_dictionary, AprilGridError};
use calib_corners_core::{AprilGrid, GrayImage};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AprilGridRenderParams {
    /// Pixels per code cell; a tag is `(bits + 2) * px_per_bit` pixels wide.
    pub px_per_bit: usize,
    /// White margin around the grid, in code cells.
    pub margin_bits: usize,
    /// Fill the gap intersections with black squares.
    pub corner_squares: bool,
    pub black: u8,
    pub white: u8,
}

impl Default for AprilGridRenderParams {
    fn default() -> Self {
        Self {
            px_per_bit: 8,
            margin_bits: 2,
            corner_squares: false,
            black: 20,
            white: 235,
        }
    }
}

/// Pixel layout of a rendered grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AprilGridLayout {
    pub tag_px: usize,
    pub gap_px: usize,
    pub margin_px: usize,
}

impl AprilGridLayout {
    /// Top-left pixel of tag `(row, col)`.
    pub fn tag_origin(&self, row: usize, col: usize) -> (usize, usize) {
        let pitch = self.tag_px + self.gap_px;
        (self.margin_px + col * pitch, self.margin_px + row * pitch)
    }
}

/// Render `grid` upright: target x to the right, target y down.
pub fn render_aprilgrid(
    grid: &AprilGrid,
    params: &AprilGridRenderParams,
) -> Result<(GrayImage, AprilGridLayout), AprilGridError> {
    grid.validate()?;
    let dict = family_dictionary(&grid.tag_family)
        .ok_or_else(|| AprilGridError::UnsupportedTargetType(grid.tag_family.clone()))?;
    if grid.low_id as usize + grid.num_tags() > dict.codes.len() {
        return Err(AprilGridError::NotEnoughCodes {
            family: dict.name,
            available: dict.codes.len(),
            required: grid.low_id as usize + grid.num_tags(),
        });
    }

    let bits = dict.marker_size;
    let cell = params.px_per_bit.max(1);
    let tag_px = (bits + 2) * cell;
    let gap_px = (tag_px as f64 * grid.tag_spacing).round() as usize;
    let margin_px = params.margin_bits.max(1) * cell;
    let layout = AprilGridLayout {
        tag_px,
        gap_px,
        margin_px,
    };

    let width = 2 * margin_px + grid.tag_cols * tag_px + (grid.tag_cols - 1) * gap_px;
    let height = 2 * margin_px + grid.tag_rows * tag_px + (grid.tag_rows - 1) * gap_px;
    let mut img = GrayImage::filled(width, height, params.white);

    for row in 0..grid.tag_rows {
        for col in 0..grid.tag_cols {
            let (x0, y0) = layout.tag_origin(row, col);
            fill(&mut img, x0, y0, tag_px, tag_px, params.black);

            let code = dict.codes[grid.low_id as usize + grid.tag_cols * row + col];
            for by in 0..bits {
                for bx in 0..bits {
                    if (code >> (by * bits + bx)) & 1 == 1 {
                        let x = x0 + (bx + 1) * cell;
                        let y = y0 + (by + 1) * cell;
                        fill(&mut img, x, y, cell, cell, params.white);
                    }
                }
            }
        }
    }

    if params.corner_squares && gap_px > 0 {
        for row in 0..grid.tag_rows.saturating_sub(1) {
            for col in 0..grid.tag_cols.saturating_sub(1) {
                let (x0, y0) = layout.tag_origin(row, col);
                fill(&mut img, x0 + tag_px, y0 + tag_px, gap_px, gap_px, params.black);
            }
        }
    }

    Ok((img, layout))
}

fn fill(img: &mut GrayImage, x0: usize, y0: usize, w: usize, h: usize, v: u8) {
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            img.set(x, y, v);
        }
    }
}
