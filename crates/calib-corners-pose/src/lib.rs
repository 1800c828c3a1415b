//! Initial camera-from-target poses for planar calibration targets.
//!
//! Detected corners are matched to target points by id, unprojected through
//! a [`CameraModel`], and a plane-to-normalized-image homography is fitted
//! (optionally inside [`ransac`]) and decomposed into a rigid transform.
//! The result is a starting point for bundle adjustment, not a refined pose.
//!
//! ```no_run
//! use calib_corners_core::{Checkerboard, CornerData, TargetGeometry};
//! use calib_corners_pose::{CameraModel, PoseInitParams, PoseInitializer};
//!
//! let target: TargetGeometry = Checkerboard::new(6, 9, 0.025).unwrap().into();
//! let camera = CameraModel::Pinhole { fx: 600.0, fy: 600.0, cx: 320.0, cy: 240.0 };
//! let corners = CornerData::default();
//! let init = PoseInitializer::new(PoseInitParams::default()).unwrap();
//! match init.init_pose(&target, &camera, &corners) {
//!     Ok(pose) => println!("{} inliers", pose.num_inliers),
//!     Err(err) => eprintln!("{err}"),
//! }
//! ```

mod camera;
mod initializer;
mod intrinsics;
mod planar;
mod ransac;

pub use camera::CameraModel;
pub use initializer::{
    init_cam_poses, InitialPose, PoseError, PoseInitParams, PoseInitializer, PoseSet,
};
pub use intrinsics::{pinhole_candidates, select_intrinsics, unified_candidates, IntrinsicsScore};
pub use planar::{planar_spread, pose_from_homography};
pub use ransac::{ransac, Estimator, RansacOptions, RansacResult};
