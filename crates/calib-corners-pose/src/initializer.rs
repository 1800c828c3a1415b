//! Per-frame initial pose of a planar target.

use crate::camera::CameraModel;
use crate::planar::{planar_spread, pose_from_homography};
use crate::ransac::{ransac, Estimator, RansacOptions};
use calib_corners_core::{estimate_homography, CornerData, CornerMap, FrameId, TargetGeometry};
use log::{debug, warn};
use nalgebra::{Isometry3, Point2, Point3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("insufficient correspondences: found {found}, need {required}")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("invalid pose parameters: {0}")]
    InvalidParams(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseInitParams {
    /// Reprojection error below which a correspondence counts as inlier.
    pub inlier_threshold_px: f64,
    /// At least 4.
    pub min_correspondences: usize,
    /// Robust homography fit; `None` uses all correspondences directly.
    pub ransac: Option<RansacOptions>,
    /// Minimum singular-value ratio of the matched target points.
    pub collinearity_tol: f64,
}

impl Default for PoseInitParams {
    fn default() -> Self {
        Self {
            inlier_threshold_px: 2.0,
            min_correspondences: 4,
            ransac: None,
            collinearity_tol: 1e-3,
        }
    }
}

/// Initial `camera_from_target` estimate for one frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitialPose {
    pub camera_from_target: Isometry3<f64>,
    pub num_inliers: usize,
    /// Ids of the matched correspondences, in input order.
    pub corner_ids: Vec<i32>,
    /// Target points projected through the pose; `None` where the camera
    /// model cannot project.
    pub reprojected_corners: Vec<Option<Point2<f64>>>,
    /// Pixel distances to the detections; infinite where projection fails.
    pub residuals: Vec<f64>,
}

impl InitialPose {
    /// Mean residual over the inliers.
    pub fn mean_inlier_residual(&self, threshold_px: f64) -> Option<f64> {
        let (sum, n) = self
            .residuals
            .iter()
            .filter(|r| **r <= threshold_px)
            .fold((0.0, 0usize), |(s, n), r| (s + r, n + 1));
        (n > 0).then(|| sum / n as f64)
    }
}

/// One matched corner: target plane point, normalized image point, pixel.
#[derive(Clone, Copy, Debug)]
struct Correspondence {
    target: Point2<f64>,
    normalized: Point2<f64>,
    pixel: Point2<f64>,
}

struct PlanarPoseEstimator<'a> {
    camera: &'a CameraModel,
    collinearity_tol: f64,
}

impl PlanarPoseEstimator<'_> {
    fn fit_indices(&self, data: &[Correspondence], idx: &[usize]) -> Option<Isometry3<f64>> {
        let src: Vec<Point2<f64>> = idx.iter().map(|&i| data[i].target).collect();
        let dst: Vec<Point2<f64>> = idx.iter().map(|&i| data[i].normalized).collect();
        let h = estimate_homography(&src, &dst)?;
        pose_from_homography(&h)
    }
}

impl Estimator for PlanarPoseEstimator<'_> {
    type Datum = Correspondence;
    type Model = Isometry3<f64>;
    const MIN_SAMPLES: usize = 4;

    fn fit(&self, data: &[Correspondence], sample: &[usize]) -> Option<Isometry3<f64>> {
        self.fit_indices(data, sample)
    }

    fn residual(&self, model: &Isometry3<f64>, datum: &Correspondence) -> f64 {
        reprojection_error(self.camera, model, datum).unwrap_or(f64::INFINITY)
    }

    fn is_degenerate(&self, data: &[Correspondence], sample: &[usize]) -> bool {
        let pts: Vec<Point2<f64>> = sample.iter().map(|&i| data[i].target).collect();
        planar_spread(&pts) < self.collinearity_tol
    }

    fn refit(&self, data: &[Correspondence], inliers: &[usize]) -> Option<Isometry3<f64>> {
        self.fit_indices(data, inliers)
    }
}

fn project_target(
    camera: &CameraModel,
    pose: &Isometry3<f64>,
    target: Point2<f64>,
) -> Option<Point2<f64>> {
    camera.project(&(pose * Point3::new(target.x, target.y, 0.0)))
}

fn reprojection_error(
    camera: &CameraModel,
    pose: &Isometry3<f64>,
    c: &Correspondence,
) -> Option<f64> {
    project_target(camera, pose, c.target).map(|p| (p - c.pixel).norm())
}

#[derive(Clone, Debug, Default)]
pub struct PoseInitializer {
    params: PoseInitParams,
}

impl PoseInitializer {
    pub fn new(params: PoseInitParams) -> Result<Self, PoseError> {
        if params.min_correspondences < 4 {
            return Err(PoseError::InvalidParams(format!(
                "min_correspondences must be at least 4, got {}",
                params.min_correspondences
            )));
        }
        if !(params.inlier_threshold_px > 0.0) {
            return Err(PoseError::InvalidParams(
                "inlier_threshold_px must be positive".to_string(),
            ));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &PoseInitParams {
        &self.params
    }

    /// Estimate `camera_from_target` for one frame of detections.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(num_corners = corners.len()))
    )]
    pub fn init_pose(
        &self,
        target: &TargetGeometry,
        camera: &CameraModel,
        corners: &CornerData,
    ) -> Result<InitialPose, PoseError> {
        let params = &self.params;

        let matched: Vec<(i32, Point2<f64>, Point2<f64>)> = corners
            .iter()
            .filter(|(_, id, _)| *id >= 0)
            .filter_map(|(p, id, _)| {
                let pt = target.point(id)?;
                Some((id, Point2::new(pt.x, pt.y), p))
            })
            .collect();

        if matched.len() < params.min_correspondences {
            return Err(PoseError::InsufficientCorrespondences {
                found: matched.len(),
                required: params.min_correspondences,
            });
        }

        let plane: Vec<Point2<f64>> = matched.iter().map(|m| m.1).collect();
        let spread = planar_spread(&plane);
        if spread < params.collinearity_tol {
            return Err(PoseError::DegenerateGeometry(format!(
                "target points are collinear (spread {spread:.2e})"
            )));
        }

        let data: Vec<Correspondence> = matched
            .iter()
            .filter_map(|&(_, target, pixel)| {
                let ray = camera.unproject(&pixel)?;
                if ray.z <= f64::EPSILON {
                    return None;
                }
                Some(Correspondence {
                    target,
                    normalized: Point2::new(ray.x / ray.z, ray.y / ray.z),
                    pixel,
                })
            })
            .collect();
        if data.len() < params.min_correspondences {
            return Err(PoseError::DegenerateGeometry(format!(
                "only {} of {} corners could be unprojected",
                data.len(),
                matched.len()
            )));
        }

        let estimator = PlanarPoseEstimator {
            camera,
            collinearity_tol: params.collinearity_tol,
        };
        let pose = match &params.ransac {
            Some(opts) if data.len() > params.min_correspondences => {
                let res = ransac(&estimator, &data, opts);
                debug!(
                    "pose ransac: {} / {} inliers after {} iterations",
                    res.inliers.len(),
                    data.len(),
                    res.iters
                );
                res.model
            }
            _ => {
                let all: Vec<usize> = (0..data.len()).collect();
                estimator.fit_indices(&data, &all)
            }
        }
        .ok_or_else(|| PoseError::DegenerateGeometry("homography is singular".to_string()))?;

        let mut reprojected_corners = Vec::with_capacity(matched.len());
        let mut residuals = Vec::with_capacity(matched.len());
        for &(_, target, pixel) in &matched {
            let proj = project_target(camera, &pose, target);
            residuals.push(proj.map_or(f64::INFINITY, |p| (p - pixel).norm()));
            reprojected_corners.push(proj);
        }
        let num_inliers = residuals
            .iter()
            .filter(|r| **r <= params.inlier_threshold_px)
            .count();

        Ok(InitialPose {
            camera_from_target: pose,
            num_inliers,
            corner_ids: matched.iter().map(|m| m.0).collect(),
            reprojected_corners,
            residuals,
        })
    }
}

/// Poses for every frame of a corner map; failed frames are only counted.
#[derive(Clone, Debug, Default)]
pub struct PoseSet {
    pub poses: BTreeMap<FrameId, InitialPose>,
    pub failures: usize,
}

/// Initialize poses for all frames whose camera has a model in `cameras`.
pub fn init_cam_poses(
    corners: &CornerMap,
    target: &TargetGeometry,
    cameras: &[CameraModel],
    initializer: &PoseInitializer,
) -> PoseSet {
    let mut out = PoseSet::default();
    for (frame, data) in corners {
        let Some(camera) = cameras.get(frame.cam_id) else {
            warn!(
                "no camera model for cam {} (frame {}), skipped",
                frame.cam_id, frame.timestamp_ns
            );
            out.failures += 1;
            continue;
        };
        match initializer.init_pose(target, camera, data) {
            Ok(pose) => {
                out.poses.insert(*frame, pose);
            }
            Err(err) => {
                warn!(
                    "pose init failed for frame ({}, {}): {err}",
                    frame.timestamp_ns, frame.cam_id
                );
                out.failures += 1;
            }
        }
    }
    debug!(
        "initialized {} poses, {} failures",
        out.poses.len(),
        out.failures
    );
    out
}
