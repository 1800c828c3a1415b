//! Detection strategy: one closed set of backends behind a single `process`.

use calib_corners_aprilgrid::{AprilGridDetector, AprilGridError, AprilGridParams};
use calib_corners_chessboard::{
    ChessboardDetector, ChessboardError, ChessboardParams, GridFinder, GridFinderParams,
};
use calib_corners_core::{CornerData, ImageError, RawImage, TargetError, TargetGeometry};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

pub const APRILGRID_TAG: &str = "aprilgrid";
pub const CHECKERBOARD_CHESS_TAG: &str = "checkerboard_chess";
pub const CHECKERBOARD_GRID_TAG: &str = "checkerboard_grid";

/// Every cache type tag a strategy can produce.
pub const CACHE_TAGS: [&str; 3] = [APRILGRID_TAG, CHECKERBOARD_CHESS_TAG, CHECKERBOARD_GRID_TAG];

#[derive(thiserror::Error, Debug)]
pub enum StrategyError {
    #[error("unsupported target type: {0}")]
    UnsupportedTargetType(String),

    #[error("backend `{backend}` cannot detect a `{target}` target")]
    BackendMismatch { backend: &'static str, target: String },

    #[error(transparent)]
    AprilGrid(AprilGridError),

    #[error(transparent)]
    Chessboard(#[from] ChessboardError),

    #[error(transparent)]
    Target(#[from] TargetError),
}

impl From<AprilGridError> for StrategyError {
    fn from(err: AprilGridError) -> Self {
        match err {
            AprilGridError::UnsupportedTargetType(family) => {
                StrategyError::UnsupportedTargetType(format!("tag family `{family}`"))
            }
            other => StrategyError::AprilGrid(other),
        }
    }
}

/// Backend selection with its tuning parameters.
///
/// Serialized with a `kind` tag equal to the backend's cache tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum BackendConfig {
    #[serde(rename = "aprilgrid")]
    AprilGrid(AprilGridParams),
    #[serde(rename = "checkerboard_chess")]
    CheckerboardChess(ChessboardParams),
    #[serde(rename = "checkerboard_grid")]
    CheckerboardGrid(GridFinderParams),
}

impl BackendConfig {
    /// Default backend for a target: AprilGrid decoding or the direct grid
    /// finder.
    pub fn default_for(target: &TargetGeometry) -> Self {
        match target {
            TargetGeometry::AprilGrid(_) => BackendConfig::AprilGrid(AprilGridParams::default()),
            TargetGeometry::Checkerboard(_) => {
                BackendConfig::CheckerboardGrid(GridFinderParams::default())
            }
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            BackendConfig::AprilGrid(_) => APRILGRID_TAG,
            BackendConfig::CheckerboardChess(_) => CHECKERBOARD_CHESS_TAG,
            BackendConfig::CheckerboardGrid(_) => CHECKERBOARD_GRID_TAG,
        }
    }
}

/// Corner detector bound to one target.
///
/// Cloning is cheap enough to give every worker chunk its own instance.
#[derive(Clone, Debug)]
pub enum DetectionStrategy {
    AprilGrid(AprilGridDetector),
    CheckerboardChess(ChessboardDetector),
    CheckerboardGrid(GridFinder),
}

impl DetectionStrategy {
    pub fn new(target: &TargetGeometry, backend: &BackendConfig) -> Result<Self, StrategyError> {
        target.validate()?;
        let mismatch = || StrategyError::BackendMismatch {
            backend: backend.tag(),
            target: target.target_type().to_string(),
        };
        Ok(match (backend, target) {
            (BackendConfig::AprilGrid(p), TargetGeometry::AprilGrid(g)) => {
                DetectionStrategy::AprilGrid(AprilGridDetector::new(g.clone(), p.clone())?)
            }
            (BackendConfig::CheckerboardChess(p), TargetGeometry::Checkerboard(b)) => {
                DetectionStrategy::CheckerboardChess(ChessboardDetector::new(b.clone(), p.clone())?)
            }
            (BackendConfig::CheckerboardGrid(p), TargetGeometry::Checkerboard(b)) => {
                DetectionStrategy::CheckerboardGrid(GridFinder::new(b.clone(), p.clone())?)
            }
            _ => return Err(mismatch()),
        })
    }

    /// Strategy with the default backend for `target`.
    pub fn for_target(target: &TargetGeometry) -> Result<Self, StrategyError> {
        Self::new(target, &BackendConfig::default_for(target))
    }

    /// Cache type discriminator of this backend.
    pub fn cache_tag(&self) -> &'static str {
        match self {
            DetectionStrategy::AprilGrid(_) => APRILGRID_TAG,
            DetectionStrategy::CheckerboardChess(_) => CHECKERBOARD_CHESS_TAG,
            DetectionStrategy::CheckerboardGrid(_) => CHECKERBOARD_GRID_TAG,
        }
    }

    pub fn target(&self) -> TargetGeometry {
        match self {
            DetectionStrategy::AprilGrid(d) => d.grid().clone().into(),
            DetectionStrategy::CheckerboardChess(d) => d.board().clone().into(),
            DetectionStrategy::CheckerboardGrid(d) => d.board().clone().into(),
        }
    }

    /// Detect corners in one frame and return `(accepted, rejected)`.
    ///
    /// `seq` is left at zero; the dispatcher stamps it.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, image), fields(backend = self.cache_tag()))
    )]
    pub fn process(&self, image: &RawImage) -> Result<(CornerData, CornerData), ImageError> {
        image.validate()?;

        let gray = image.to_gray8();
        let view = gray.view();
        Ok(match self {
            DetectionStrategy::AprilGrid(d) => d.detect(&view),
            DetectionStrategy::CheckerboardChess(d) => d.detect(&view),
            DetectionStrategy::CheckerboardGrid(d) => d.detect(&view),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calib_corners_chessboard::{render_checkerboard, CheckerboardRenderParams};
    use calib_corners_core::{AprilGrid, Checkerboard, Pixels};

    fn board() -> Checkerboard {
        Checkerboard::new(5, 7, 0.02).unwrap()
    }

    #[test]
    fn cache_tags_follow_backend() {
        let target: TargetGeometry = board().into();
        let chess = DetectionStrategy::new(
            &target,
            &BackendConfig::CheckerboardChess(ChessboardParams::default()),
        )
        .unwrap();
        let grid = DetectionStrategy::for_target(&target).unwrap();
        assert_eq!(chess.cache_tag(), "checkerboard_chess");
        assert_eq!(grid.cache_tag(), "checkerboard_grid");
        assert_eq!(grid.target(), target);

        let april: TargetGeometry = AprilGrid::new(5, 4, 0.088, 0.3, 0, "16h5").unwrap().into();
        assert_eq!(DetectionStrategy::for_target(&april).unwrap().cache_tag(), "aprilgrid");
    }

    #[test]
    fn mismatched_backend_is_rejected() {
        let target: TargetGeometry = board().into();
        let err = DetectionStrategy::new(&target, &BackendConfig::AprilGrid(Default::default()))
            .unwrap_err();
        assert!(matches!(err, StrategyError::BackendMismatch { .. }));
    }

    #[test]
    fn unknown_tag_family_is_unsupported() {
        let target: TargetGeometry = AprilGrid::new(6, 6, 0.088, 0.3, 0, "36h11").unwrap().into();
        let err = DetectionStrategy::for_target(&target).unwrap_err();
        assert!(matches!(err, StrategyError::UnsupportedTargetType(_)), "{err}");
    }

    #[test]
    fn sixteen_bit_frames_use_top_byte() {
        let b = board();
        let (img, _) = render_checkerboard(&b, &CheckerboardRenderParams::default()).unwrap();
        let strategy = DetectionStrategy::for_target(&b.into()).unwrap();

        let (acc8, _) = strategy
            .process(&RawImage::mono8(img.width, img.height, img.data.clone()).unwrap())
            .unwrap();
        let (acc16, _) = strategy.process(&img.to_raw16()).unwrap();
        assert_eq!(acc8.len(), 35);
        assert_eq!(acc8, acc16);
    }

    #[test]
    fn backend_config_uses_kind_tag() {
        let json = r#"{"kind":"checkerboard_chess","min_corners":12}"#;
        let cfg: BackendConfig = serde_json::from_str(json).unwrap();
        match cfg {
            BackendConfig::CheckerboardChess(p) => assert_eq!(p.min_corners, 12),
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn inconsistent_buffer_is_an_error() {
        let strategy = DetectionStrategy::for_target(&board().into()).unwrap();
        let img = RawImage {
            width: 10,
            height: 10,
            pixels: Pixels::Mono8(vec![0; 50]),
        };
        assert!(matches!(
            strategy.process(&img),
            Err(ImageError::InvalidBuffer { .. })
        ));
    }

    #[test]
    fn overflowing_dimensions_are_an_error() {
        let strategy = DetectionStrategy::for_target(&board().into()).unwrap();
        let img = RawImage {
            width: usize::MAX / 2,
            height: 3,
            pixels: Pixels::Mono8(vec![0; 16]),
        };
        assert!(matches!(
            strategy.process(&img),
            Err(ImageError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn chess_backend_reads_rendered_boards() {
        let b = board();
        let (img, layout) = render_checkerboard(&b, &CheckerboardRenderParams::default()).unwrap();
        let strategy = DetectionStrategy::new(
            &b.clone().into(),
            &BackendConfig::CheckerboardChess(ChessboardParams::default()),
        )
        .unwrap();

        let upright = RawImage::mono8(img.width, img.height, img.data.clone()).unwrap();
        let (acc, _) = strategy.process(&upright).unwrap();
        assert_eq!(acc.corner_ids, (0..35).collect::<Vec<_>>());
        for (p, id, _) in acc.iter() {
            let expected = layout.corner_position((id / 7) as usize, (id % 7) as usize);
            assert!((p - expected).norm() < 0.5, "id {id}: {p} vs {expected}");
        }

        let rot = img.rotated_cw();
        let (acc, _) = strategy
            .process(&RawImage::mono8(rot.width, rot.height, rot.data).unwrap())
            .unwrap();
        assert_eq!(acc.corner_ids, (0..35).collect::<Vec<_>>());
    }
}
