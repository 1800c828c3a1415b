//! Camera projection models used for pose initialization.

use nalgebra::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-9;

/// Intrinsic camera model.
///
/// `Unified` is the unified camera model in the `alpha` parameterization:
/// `u = fx * x / (alpha * d + (1 - alpha) * z) + cx` with `d = |p|`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CameraModel {
    Pinhole {
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
    },
    Unified {
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        alpha: f64,
    },
}

impl CameraModel {
    /// Mean focal length in pixels.
    pub fn focal(&self) -> f64 {
        match *self {
            Self::Pinhole { fx, fy, .. } | Self::Unified { fx, fy, .. } => 0.5 * (fx + fy),
        }
    }

    /// Project a point in camera coordinates; `None` outside the valid domain.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        match *self {
            Self::Pinhole { fx, fy, cx, cy } => {
                if p.z <= EPS {
                    return None;
                }
                Some(Point2::new(fx * p.x / p.z + cx, fy * p.y / p.z + cy))
            }
            Self::Unified {
                fx,
                fy,
                cx,
                cy,
                alpha,
            } => {
                let d = p.coords.norm();
                let w = if alpha > 0.5 {
                    (1.0 - alpha) / alpha
                } else {
                    alpha / (1.0 - alpha)
                };
                if p.z <= -w * d {
                    return None;
                }
                let den = alpha * d + (1.0 - alpha) * p.z;
                if den <= EPS {
                    return None;
                }
                Some(Point2::new(fx * p.x / den + cx, fy * p.y / den + cy))
            }
        }
    }

    /// Unit bearing vector of a pixel; `None` outside the valid domain.
    pub fn unproject(&self, uv: &Point2<f64>) -> Option<Vector3<f64>> {
        match *self {
            Self::Pinhole { fx, fy, cx, cy } => {
                let ray = Vector3::new((uv.x - cx) / fx, (uv.y - cy) / fy, 1.0);
                ray.try_normalize(EPS)
            }
            Self::Unified {
                fx,
                fy,
                cx,
                cy,
                alpha,
            } => {
                let mx = (uv.x - cx) / fx;
                let my = (uv.y - cy) / fy;
                let r2 = mx * mx + my * my;
                if alpha > 0.5 && r2 >= 1.0 / (2.0 * alpha - 1.0) {
                    return None;
                }
                let one_minus = 1.0 - alpha;
                if one_minus <= EPS {
                    return None;
                }

                // Equivalent sphere model with xi = alpha / (1 - alpha).
                let xi = alpha / one_minus;
                let (mx, my) = (mx * one_minus, my * one_minus);
                let r2 = r2 * one_minus * one_minus;
                let disc = 1.0 + (1.0 - xi * xi) * r2;
                if disc < 0.0 {
                    return None;
                }
                let factor = (xi + disc.sqrt()) / (1.0 + r2);
                Vector3::new(factor * mx, factor * my, factor - xi).try_normalize(EPS)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ucm() -> CameraModel {
        CameraModel::Unified {
            fx: 380.0,
            fy: 381.0,
            cx: 320.0,
            cy: 240.0,
            alpha: 0.62,
        }
    }

    #[test]
    fn pinhole_round_trip() {
        let cam = CameraModel::Pinhole {
            fx: 500.0,
            fy: 510.0,
            cx: 319.5,
            cy: 239.5,
        };
        let p = Point3::new(0.2, -0.1, 1.5);
        let uv = cam.project(&p).expect("in front");
        let ray = cam.unproject(&uv).expect("ray");
        assert_relative_eq!(ray, p.coords.normalize(), epsilon = 1e-12);
        assert!(cam.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn unified_round_trip_wide_angle() {
        let cam = ucm();
        for p in [
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.8, -0.3, 0.5),
            Point3::new(-1.0, 0.7, 0.1),
        ] {
            let uv = cam.project(&p).expect("valid");
            let ray = cam.unproject(&uv).expect("ray");
            assert_relative_eq!(ray, p.coords.normalize(), epsilon = 1e-9);
        }
    }

    #[test]
    fn unified_zero_alpha_is_pinhole() {
        let cam = CameraModel::Unified {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
            alpha: 0.0,
        };
        let uv = cam.project(&Point3::new(0.1, 0.2, 2.0)).expect("valid");
        assert_relative_eq!(uv, Point2::new(345.0, 290.0), epsilon = 1e-12);
    }

    #[test]
    fn serializes_with_model_tag() {
        let json = serde_json::to_string(&ucm()).expect("json");
        assert!(json.starts_with(r#"{"model":"unified","#));
        let back: CameraModel = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, ucm());
    }
}
