//! AprilGrid detector: quads, tag codes and canonical corner ids.

use crate::decode::QuadDecoder;
use crate::quad::{find_quads, Quad, QuadParams};
use crate::threshold::dark_mask;
use crate::{family_dictionary, Matcher};
use calib_corners_core::{
    refine_corner, AprilGrid, CornerData, GrayImageView, SubpixParams, TargetError,
};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum AprilGridError {
    #[error("unsupported target type: tag family `{0}`")]
    UnsupportedTargetType(String),
    #[error("tag family {family} has {available} codes, grid needs {required}")]
    NotEnoughCodes {
        family: &'static str,
        available: usize,
        required: usize,
    },
    #[error(transparent)]
    Target(#[from] TargetError),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AprilGridParams {
    /// Tile side (pixels) of the adaptive threshold.
    pub threshold_tile: usize,
    /// Minimum local intensity range to trust a tile / a tag read-out.
    pub min_contrast: u8,
    pub quad: QuadParams,
    /// Maximum bit errors accepted by the matcher (capped by the family).
    pub max_hamming: u8,
    /// Required fraction of dark border cells.
    pub min_border_score: f32,
    pub refine_corners: bool,
    pub subpix: SubpixParams,
}

impl Default for AprilGridParams {
    fn default() -> Self {
        Self {
            threshold_tile: 8,
            min_contrast: 20,
            quad: QuadParams::default(),
            max_hamming: 2,
            min_border_score: 0.9,
            refine_corners: true,
            subpix: SubpixParams::default(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct TagCandidate {
    quad: Quad,
    rotation: u8,
    hamming: u8,
    border_score: f32,
}

impl TagCandidate {
    fn better_than(&self, other: &TagCandidate) -> bool {
        (self.hamming, -self.border_score) < (other.hamming, -other.border_score)
    }
}

#[derive(Clone, Debug)]
pub struct AprilGridDetector {
    grid: AprilGrid,
    params: AprilGridParams,
    matcher: Matcher,
}

impl AprilGridDetector {
    pub fn new(grid: AprilGrid, params: AprilGridParams) -> Result<Self, AprilGridError> {
        grid.validate()?;
        let dict = family_dictionary(&grid.tag_family)
            .ok_or_else(|| AprilGridError::UnsupportedTargetType(grid.tag_family.clone()))?;
        let required = grid.low_id as usize + grid.num_tags();
        if required > dict.codes.len() {
            return Err(AprilGridError::NotEnoughCodes {
                family: dict.name,
                available: dict.codes.len(),
                required,
            });
        }
        let matcher = Matcher::new(dict, params.max_hamming);
        Ok(Self {
            grid,
            params,
            matcher,
        })
    }

    pub fn grid(&self) -> &AprilGrid {
        &self.grid
    }

    pub fn params(&self) -> &AprilGridParams {
        &self.params
    }

    /// Detect tags and return `(accepted, rejected)` corners.
    ///
    /// Accepted corners are sorted by id; `seq` is left at zero.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, img), fields(width = img.width, height = img.height))
    )]
    pub fn detect(&self, img: &GrayImageView<'_>) -> (CornerData, CornerData) {
        let mut accepted = CornerData::default();
        let mut rejected = CornerData::default();
        if img.width < 8 || img.height < 8 || img.data.len() != img.width * img.height {
            return (accepted, rejected);
        }

        let p = &self.params;
        let mask = dark_mask(img, p.threshold_tile, p.min_contrast);
        let quads = find_quads(&mask, img.width, img.height, &p.quad);

        let Some(mut decoder) = QuadDecoder::new(
            self.matcher.dictionary().marker_size,
            p.min_border_score,
            p.min_contrast,
        ) else {
            return (accepted, rejected);
        };
        let cells = decoder.cells() as f64;

        let low_id = self.grid.low_id as i64;
        let num_tags = self.grid.num_tags() as i64;
        let mut tags: BTreeMap<usize, TagCandidate> = BTreeMap::new();

        for quad in &quads {
            let Some(obs) = decoder.decode(img, quad) else {
                continue;
            };
            // All-dark interiors are blobs, not tags.
            if obs.code == 0 {
                continue;
            }
            let radius = acceptance_radius(quad, cells);

            let Some(m) = self.matcher.match_code(obs.code) else {
                for c in &quad.corners {
                    rejected.push(*c, -1, radius);
                }
                continue;
            };

            let local = m.id as i64 - low_id;
            if !(0..num_tags).contains(&local) {
                for (k, c) in quad.corners.iter().enumerate() {
                    rejected.push(*c, ((m.id as i32) << 2) + k as i32, radius);
                }
                continue;
            }

            let cand = TagCandidate {
                quad: *quad,
                rotation: m.rotation,
                hamming: m.hamming,
                border_score: obs.border_score,
            };
            tags.entry(local as usize)
                .and_modify(|prev| {
                    if cand.better_than(prev) {
                        *prev = cand;
                    }
                })
                .or_insert(cand);
        }

        let mut found: Vec<(i32, Point2<f64>, f64)> = Vec::with_capacity(tags.len() * 4);
        for (&tag, cand) in &tags {
            let radius = acceptance_radius(&cand.quad, cells);
            for (k, c) in cand.quad.corners.iter().enumerate() {
                let canonical = (k + 4 - cand.rotation as usize) % 4;
                let id = ((tag << 2) + canonical) as i32;
                found.push((id, self.refine(img, *c, radius), radius));
            }
        }
        found.sort_by_key(|(id, _, _)| *id);
        for (id, pos, radius) in found {
            accepted.push(pos, id, radius);
        }

        debug!(
            "aprilgrid: {} quads, {} tags, {} corners ({} rejected)",
            quads.len(),
            tags.len(),
            accepted.len(),
            rejected.len()
        );
        (accepted, rejected)
    }

    fn refine(&self, img: &GrayImageView<'_>, p: Point2<f64>, radius: f64) -> Point2<f64> {
        if !self.params.refine_corners {
            return p;
        }
        let half_win = radius.round().max(2.0) as usize;
        refine_corner(img, p, half_win, &self.params.subpix)
            .filter(|q| (q - p).norm() <= radius)
            .unwrap_or(p)
    }
}

/// Half a code cell, at least one pixel.
fn acceptance_radius(quad: &Quad, cells: f64) -> f64 {
    (0.5 * quad.shortest_side() / cells).max(1.0)
}
