//! Calibration target geometry and its persisted descriptor.
//!
//! Targets lie in the `z = 0` plane with `x` to the right and `y` down when
//! the printed target is viewed upright. Every feature point has a dense
//! integer id; the 3D position of an id never depends on detections.

use nalgebra::Vector4;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path};

/// Vignette samples per tag edge used by [`AprilGrid::vignette_points`] callers
/// that have no preference.
pub const DEFAULT_VIGNETTE_POINTS: usize = 5;

/// Corner offsets inside one tag (TL, TR, BR, BL) in units of `tagSize`.
const TAG_CORNER_X: [f64; 4] = [0.0, 1.0, 1.0, 0.0];
const TAG_CORNER_Y: [f64; 4] = [0.0, 0.0, 1.0, 1.0];

/// Ids are `i32`, so a target may not have more points than that holds.
fn check_point_count(count: Option<usize>, what: &str) -> Result<(), TargetError> {
    match count {
        Some(n) if n <= i32::MAX as usize => Ok(()),
        _ => Err(TargetError::InvalidParameter(format!(
            "{what} has too many points for 32-bit ids"
        ))),
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TargetError {
    #[error("invalid target parameter: {0}")]
    InvalidParameter(String),

    #[error("target type mismatch (expected `{expected}`, found `{found}`)")]
    TypeMismatch { expected: TargetType, found: String },

    #[error("unsupported target type `{0}`")]
    UnsupportedTargetType(String),

    #[error("target descriptor has no `targetType` field")]
    MissingType,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Discriminator persisted as `targetType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetType {
    AprilGrid,
    Checkerboard,
}

impl TargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetType::AprilGrid => "aprilgrid",
            TargetType::Checkerboard => "checkerboard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aprilgrid" => Some(TargetType::AprilGrid),
            "checkerboard" => Some(TargetType::Checkerboard),
            _ => None,
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grid of AprilTags separated by `tagSpacing * tagSize` gaps.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AprilGrid {
    pub tag_cols: usize,
    pub tag_rows: usize,
    /// Side of the black tag square in meters.
    pub tag_size: f64,
    /// Gap between tags relative to `tag_size`.
    pub tag_spacing: f64,
    pub tag_family: String,
    pub low_id: u32,
}

impl AprilGrid {
    pub fn new(
        tag_cols: usize,
        tag_rows: usize,
        tag_size: f64,
        tag_spacing: f64,
        low_id: u32,
        tag_family: impl Into<String>,
    ) -> Result<Self, TargetError> {
        let grid = Self {
            tag_cols,
            tag_rows,
            tag_size,
            tag_spacing,
            tag_family: tag_family.into(),
            low_id,
        };
        grid.validate()?;
        Ok(grid)
    }

    pub fn validate(&self) -> Result<(), TargetError> {
        if self.tag_cols == 0 || self.tag_rows == 0 {
            return Err(TargetError::InvalidParameter(format!(
                "aprilgrid needs at least one tag (cols={}, rows={})",
                self.tag_cols, self.tag_rows
            )));
        }
        if !(self.tag_size.is_finite() && self.tag_size > 0.0) {
            return Err(TargetError::InvalidParameter(format!(
                "tagSize must be positive, got {}",
                self.tag_size
            )));
        }
        if !(self.tag_spacing.is_finite() && self.tag_spacing >= 0.0) {
            return Err(TargetError::InvalidParameter(format!(
                "tagSpacing must be non-negative, got {}",
                self.tag_spacing
            )));
        }
        if self.tag_family.trim().is_empty() {
            return Err(TargetError::InvalidParameter("tagFamily is empty".into()));
        }
        check_point_count(
            self.tag_cols
                .checked_mul(self.tag_rows)
                .and_then(|n| n.checked_mul(4)),
            "aprilgrid",
        )
    }

    #[inline]
    pub fn num_tags(&self) -> usize {
        self.tag_cols * self.tag_rows
    }

    /// Distance between the top-left corners of neighbouring tags.
    #[inline]
    pub fn pitch(&self) -> f64 {
        self.tag_size * (1.0 + self.tag_spacing)
    }

    /// `(tag_id << 2) + corner_index`, with `tag_id = tag_cols * row + col`.
    #[inline]
    pub fn corner_id(&self, row: usize, col: usize, corner: usize) -> i32 {
        (((self.tag_cols * row + col) << 2) + corner) as i32
    }

    pub fn point(&self, id: i32) -> Option<Vector4<f64>> {
        if id < 0 {
            return None;
        }
        let id = id as usize;
        let tag = id >> 2;
        if tag >= self.num_tags() {
            return None;
        }
        Some(self.tag_corner(tag, id & 3))
    }

    fn tag_corner(&self, tag: usize, k: usize) -> Vector4<f64> {
        let row = tag / self.tag_cols;
        let col = tag % self.tag_cols;
        let pitch = self.pitch();
        Vector4::new(
            col as f64 * pitch + TAG_CORNER_X[k] * self.tag_size,
            row as f64 * pitch + TAG_CORNER_Y[k] * self.tag_size,
            0.0,
            1.0,
        )
    }

    /// Points on the white gaps of the grid, used to sample vignetting.
    ///
    /// Each tag edge is split into `n + 1` equal parts and the `n` inner
    /// points are pushed half a gap outwards. The result holds
    /// `(2 * num_tags + tag_cols + tag_rows) * n` points laid out as:
    /// - `k * 2 * num_tags + 2 * tag`: the right edge of `tag`, then its
    ///   bottom edge;
    /// - then `k * tag_cols + col`: above the top edge of the first row;
    /// - then `k * tag_rows + row`: left of the left edge of the first
    ///   column.
    ///
    /// `k` is the sample index along the edge.
    pub fn vignette_points(&self, n: usize) -> Vec<Vector4<f64>> {
        let tags = self.num_tags();
        let half_gap = 0.5 * self.tag_size * self.tag_spacing;
        let lerp = |a: Vector4<f64>, b: Vector4<f64>, k: usize| {
            a + (b - a) * ((k + 1) as f64 / (n + 1) as f64)
        };

        let mut out = Vec::with_capacity((2 * tags + self.tag_cols + self.tag_rows) * n);
        for k in 0..n {
            for tag in 0..tags {
                let [_, p1, p2, p3] = [0, 1, 2, 3].map(|c| self.tag_corner(tag, c));
                let mut right = lerp(p1, p2, k);
                right.x += half_gap;
                let mut bottom = lerp(p2, p3, k);
                bottom.y += half_gap;
                out.push(right);
                out.push(bottom);
            }
        }
        for k in 0..n {
            for col in 0..self.tag_cols {
                let mut top = lerp(self.tag_corner(col, 0), self.tag_corner(col, 1), k);
                top.y -= half_gap;
                out.push(top);
            }
        }
        for k in 0..n {
            for row in 0..self.tag_rows {
                let tag = row * self.tag_cols;
                let mut left = lerp(self.tag_corner(tag, 0), self.tag_corner(tag, 3), k);
                left.x -= half_gap;
                out.push(left);
            }
        }
        out
    }
}

/// Checkerboard described by its inner corners.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkerboard {
    /// Inner corners per column.
    pub rows: usize,
    /// Inner corners per row.
    pub cols: usize,
    /// Square side in meters.
    pub square_spacing: f64,
}

impl Checkerboard {
    pub fn new(rows: usize, cols: usize, square_spacing: f64) -> Result<Self, TargetError> {
        let board = Self {
            rows,
            cols,
            square_spacing,
        };
        board.validate()?;
        Ok(board)
    }

    pub fn validate(&self) -> Result<(), TargetError> {
        if self.rows < 2 || self.cols < 2 {
            return Err(TargetError::InvalidParameter(format!(
                "checkerboard needs at least 2x2 inner corners (rows={}, cols={})",
                self.rows, self.cols
            )));
        }
        if !(self.square_spacing.is_finite() && self.square_spacing > 0.0) {
            return Err(TargetError::InvalidParameter(format!(
                "squareSpacing must be positive, got {}",
                self.square_spacing
            )));
        }
        check_point_count(self.rows.checked_mul(self.cols), "checkerboard")
    }

    pub fn point(&self, id: i32) -> Option<Vector4<f64>> {
        if id < 0 || id as usize >= self.rows * self.cols {
            return None;
        }
        let id = id as usize;
        let row = id / self.cols;
        let col = id % self.cols;
        Some(Vector4::new(
            col as f64 * self.square_spacing,
            row as f64 * self.square_spacing,
            0.0,
            1.0,
        ))
    }
}

/// Known planar calibration target.
///
/// Equality is equality of the canonical JSON form, so two targets that
/// would be written differently never compare equal.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "targetType")]
pub enum TargetGeometry {
    #[serde(rename = "aprilgrid")]
    AprilGrid(AprilGrid),
    #[serde(rename = "checkerboard")]
    Checkerboard(Checkerboard),
}

impl TargetGeometry {
    pub fn target_type(&self) -> TargetType {
        match self {
            TargetGeometry::AprilGrid(_) => TargetType::AprilGrid,
            TargetGeometry::Checkerboard(_) => TargetType::Checkerboard,
        }
    }

    pub fn validate(&self) -> Result<(), TargetError> {
        match self {
            TargetGeometry::AprilGrid(g) => g.validate(),
            TargetGeometry::Checkerboard(b) => b.validate(),
        }
    }

    pub fn num_points(&self) -> usize {
        match self {
            TargetGeometry::AprilGrid(g) => 4 * g.num_tags(),
            TargetGeometry::Checkerboard(b) => b.rows * b.cols,
        }
    }

    /// Homogeneous 3D position of the feature with the given id.
    pub fn point(&self, id: i32) -> Option<Vector4<f64>> {
        match self {
            TargetGeometry::AprilGrid(g) => g.point(id),
            TargetGeometry::Checkerboard(b) => b.point(id),
        }
    }

    /// All feature points ordered by id.
    pub fn points_3d(&self) -> Vec<Vector4<f64>> {
        (0..self.num_points() as i32)
            .filter_map(|id| self.point(id))
            .collect()
    }

    /// Compact JSON used for identity checks.
    pub fn to_canonical_json(&self) -> Result<String, TargetError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a descriptor, reading `targetType` before anything else.
    pub fn from_json(text: &str) -> Result<Self, TargetError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        read_type(&value)?;
        let target: TargetGeometry = serde_json::from_value(value)?;
        target.validate()?;
        Ok(target)
    }

    /// Like [`TargetGeometry::from_json`] but fails with `TypeMismatch` when
    /// the descriptor belongs to another target family.
    pub fn from_json_expecting(text: &str, expected: TargetType) -> Result<Self, TargetError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let found = read_type(&value)?;
        if found != expected {
            return Err(TargetError::TypeMismatch {
                expected,
                found: found.as_str().to_string(),
            });
        }
        let target: TargetGeometry = serde_json::from_value(value)?;
        target.validate()?;
        Ok(target)
    }

    /// Load a descriptor file from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, TargetError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Write this descriptor to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), TargetError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

fn read_type(value: &serde_json::Value) -> Result<TargetType, TargetError> {
    let tag = value
        .get("targetType")
        .and_then(|v| v.as_str())
        .ok_or(TargetError::MissingType)?;
    TargetType::parse(tag).ok_or_else(|| TargetError::UnsupportedTargetType(tag.to_string()))
}

impl PartialEq for TargetGeometry {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_canonical_json(), other.to_canonical_json()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl From<AprilGrid> for TargetGeometry {
    fn from(g: AprilGrid) -> Self {
        TargetGeometry::AprilGrid(g)
    }
}

impl From<Checkerboard> for TargetGeometry {
    fn from(b: Checkerboard) -> Self {
        TargetGeometry::Checkerboard(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn kalibr_grid() -> TargetGeometry {
        AprilGrid::new(7, 4, 0.0946, 0.3, 0, "16h5").unwrap().into()
    }

    #[test]
    fn seven_by_four_grid_has_112_points() {
        let t = kalibr_grid();
        assert_eq!(t.num_points(), 112);
        assert_eq!(t.points_3d().len(), 112);
    }

    #[test]
    fn construction_is_deterministic() {
        let a = kalibr_grid();
        let b = kalibr_grid();
        assert_eq!(a.points_3d(), b.points_3d());
        assert_eq!(
            a.to_canonical_json().unwrap(),
            b.to_canonical_json().unwrap()
        );
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_form_writes_type_first() {
        let json = kalibr_grid().to_canonical_json().unwrap();
        assert_eq!(
            json,
            r#"{"targetType":"aprilgrid","tagCols":7,"tagRows":4,"tagSize":0.0946,"tagSpacing":0.3,"tagFamily":"16h5","lowId":0}"#
        );
    }

    #[test]
    fn corner_ids_follow_tag_layout() {
        let TargetGeometry::AprilGrid(g) = kalibr_grid() else {
            unreachable!()
        };
        let pitch = 0.0946 * 1.3;
        // tag (row 1, col 2), bottom-right corner
        let id = g.corner_id(1, 2, 2);
        assert_eq!(id, ((7 + 2) << 2) + 2);
        let p = g.point(id).unwrap();
        assert!((p.x - (2.0 * pitch + 0.0946)).abs() < 1e-12);
        assert!((p.y - (pitch + 0.0946)).abs() < 1e-12);
        assert_eq!(p.z, 0.0);
        assert_eq!(p.w, 1.0);
        assert!(g.point(112).is_none());
        assert!(g.point(-1).is_none());
    }

    #[test]
    fn checkerboard_points_are_row_major() {
        let t: TargetGeometry = Checkerboard::new(5, 8, 0.04).unwrap().into();
        assert_eq!(t.num_points(), 40);
        let p = t.point(9).unwrap();
        assert!((p.x - 0.04).abs() < 1e-12);
        assert!((p.y - 0.04).abs() < 1e-12);
    }

    #[test]
    fn different_tag_size_is_not_equal() {
        let a = kalibr_grid();
        let b: TargetGeometry = AprilGrid::new(7, 4, 0.0947, 0.3, 0, "16h5").unwrap().into();
        assert_ne!(a, b);
    }

    #[test]
    fn expecting_other_family_is_type_mismatch() {
        let json = kalibr_grid().to_canonical_json().unwrap();
        let err = TargetGeometry::from_json_expecting(&json, TargetType::Checkerboard).unwrap_err();
        assert!(matches!(err, TargetError::TypeMismatch { .. }));

        let ok = TargetGeometry::from_json_expecting(&json, TargetType::AprilGrid).unwrap();
        assert_eq!(ok, kalibr_grid());
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let err = TargetGeometry::from_json(r#"{"targetType":"charuco","rows":3}"#).unwrap_err();
        assert!(matches!(err, TargetError::UnsupportedTargetType(t) if t == "charuco"));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(AprilGrid::new(0, 4, 0.1, 0.3, 0, "16h5").is_err());
        assert!(AprilGrid::new(3, 4, -0.1, 0.3, 0, "16h5").is_err());
        assert!(Checkerboard::new(1, 4, 0.1).is_err());
        let err = TargetGeometry::from_json(
            r#"{"targetType":"aprilgrid","tagCols":2,"tagRows":2,"tagSize":0.0,"tagSpacing":0.3,"tagFamily":"16h5","lowId":0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, TargetError::InvalidParameter(_)));
    }

    #[test]
    fn descriptor_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aprilgrid.json");
        let t = kalibr_grid();
        t.write_json(&path).unwrap();
        let back = TargetGeometry::load_json(&path).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn vignette_points_follow_edge_layout() {
        let TargetGeometry::AprilGrid(grid) = kalibr_grid() else {
            unreachable!()
        };
        let (s, gap) = (0.0946, 0.5 * 0.0946 * 0.3);
        let v = grid.vignette_points(DEFAULT_VIGNETTE_POINTS);
        assert_eq!(v.len(), (2 * 28 + 7 + 4) * 5);

        // Right and bottom edges of tag 0, first sample.
        assert_relative_eq!(v[0], Vector4::new(s + gap, s / 6.0, 0.0, 1.0), epsilon = 1e-12);
        assert_relative_eq!(v[1], Vector4::new(5.0 * s / 6.0, s + gap, 0.0, 1.0), epsilon = 1e-12);
        // Above the first tag, then left of it.
        assert_relative_eq!(v[280], Vector4::new(s / 6.0, -gap, 0.0, 1.0), epsilon = 1e-12);
        assert_relative_eq!(v[315], Vector4::new(-gap, s / 6.0, 0.0, 1.0), epsilon = 1e-12);
        // Last sample left of the bottom row.
        let y = 3.0 * grid.pitch() + 5.0 * s / 6.0;
        assert_relative_eq!(v[334], Vector4::new(-gap, y, 0.0, 1.0), epsilon = 1e-12);

        assert!(grid.vignette_points(0).is_empty());
    }

    #[test]
    fn ids_must_fit_in_32_bits() {
        let err = Checkerboard::new(70_000, 70_000, 0.02).unwrap_err();
        assert!(matches!(err, TargetError::InvalidParameter(_)), "{err}");
        let err = AprilGrid::new(40_000, 40_000, 0.05, 0.3, 0, "16h5").unwrap_err();
        assert!(matches!(err, TargetError::InvalidParameter(_)), "{err}");
        assert!(Checkerboard::new(40_000, 40_000, 0.02).is_ok());
    }
}
