use calib_corners_core::SubpixParams;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    pub min_spacing_pix: f32,
    pub max_spacing_pix: f32,
    pub k_neighbors: usize,
    pub orientation_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 5.0,
            max_spacing_pix: 50.0,
            k_neighbors: 8,
            orientation_tolerance_deg: 22.5,
        }
    }
}

/// Grid assembly shared by both checkerboard backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AssemblyParams {
    /// When positive, the neighbour distance window is derived from the
    /// median nearest-neighbour distance as `spacing * (1 ± tolerance)`;
    /// otherwise `graph.min/max_spacing_pix` are used as given.
    pub spacing_tolerance: f32,
    pub graph: GridGraphParams,
}

impl Default for AssemblyParams {
    fn default() -> Self {
        Self {
            spacing_tolerance: 0.35,
            graph: GridGraphParams::default(),
        }
    }
}

/// ChESS response settings forwarded to `chess-corners`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessDetectorParams {
    pub threshold_rel: f32,
    pub nms_radius: u32,
}

impl Default for ChessDetectorParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
        }
    }
}

/// Checkerboard backend built on ChESS corners.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    pub chess: ChessDetectorParams,
    /// Minimal corner strength to consider.
    pub min_strength: f32,
    /// Minimal number of corners in an accepted grid.
    pub min_corners: usize,
    pub assembly: AssemblyParams,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            chess: ChessDetectorParams::default(),
            min_strength: 0.0,
            min_corners: 16,
            assembly: AssemblyParams::default(),
        }
    }
}

/// Hessian saddle-point candidates.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SaddleParams {
    /// Gaussian smoothing sigma in pixels.
    pub sigma: f32,
    /// Keep responses above `threshold_rel * max_response`.
    pub threshold_rel: f32,
    pub nms_radius: usize,
    /// Skip this many pixels at the image border.
    pub border: usize,
}

impl Default for SaddleParams {
    fn default() -> Self {
        Self {
            sigma: 1.5,
            threshold_rel: 0.35,
            nms_radius: 3,
            border: 4,
        }
    }
}

/// Direct grid finder: the full board must be found.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct GridFinderParams {
    pub saddle: SaddleParams,
    pub assembly: AssemblyParams,
    pub refine_corners: bool,
    pub subpix: SubpixParams,
}

impl Default for GridFinderParams {
    fn default() -> Self {
        Self {
            saddle: SaddleParams::default(),
            assembly: AssemblyParams::default(),
            refine_corners: true,
            subpix: SubpixParams::default(),
        }
    }
}
