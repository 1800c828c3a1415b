//! On-disk corner cache.
//!
//! The binary file is authoritative; the JSON file next to it is a
//! diagnostic mirror that is written but never read back. A cache only
//! applies to the backend and target it was produced with: the type tag is
//! checked first, then the target descriptor, and only then are the corner
//! maps decoded.

use crate::codec::{DecodeError, Reader, Writer, FORMAT_VERSION, MAGIC};
use crate::strategy::{DetectionStrategy, CACHE_TAGS};
use calib_corners_core::{CornerData, CornerMap, TargetError, TargetGeometry};
use log::{info, warn};
use serde::Serialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub const CACHE_BIN_NAME: &str = "calib_corners.bin";
pub const CACHE_JSON_NAME: &str = "calib_corners.json";

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("cache type mismatch (expected `{expected}`, found `{found}`)")]
    TypeMismatch { expected: String, found: String },

    #[error("cache was written for different target parameters")]
    ParamMismatch,

    #[error("corrupt cache: {0}")]
    Corrupt(String),

    #[error("unsupported target type `{0}` in cache")]
    UnsupportedTargetType(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<DecodeError> for CacheError {
    fn from(err: DecodeError) -> Self {
        CacheError::Corrupt(err.0)
    }
}

/// Locations of the binary cache and its JSON mirror.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachePaths {
    pub bin: PathBuf,
    pub json: PathBuf,
}

impl CachePaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            bin: dir.join(CACHE_BIN_NAME),
            json: dir.join(CACHE_JSON_NAME),
        }
    }
}

/// Accepted and rejected corners of every processed frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CornerCache {
    pub accepted: CornerMap,
    pub rejected: CornerMap,
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    timestamp_ns: i64,
    cam_id: usize,
    #[serde(flatten)]
    data: &'a CornerData,
}

#[derive(Serialize)]
struct JsonMirror<'a> {
    #[serde(rename = "targetType")]
    target_type: &'a str,
    target: &'a TargetGeometry,
    corners: Vec<JsonEntry<'a>>,
    corners_rejected: Vec<JsonEntry<'a>>,
}

fn json_entries(map: &CornerMap) -> Vec<JsonEntry<'_>> {
    map.iter()
        .map(|(frame, data)| JsonEntry {
            timestamp_ns: frame.timestamp_ns,
            cam_id: frame.cam_id,
            data,
        })
        .collect()
}

impl CornerCache {
    pub fn clear(&mut self) {
        self.accepted.clear();
        self.rejected.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }

    /// Serialize for `strategy`.
    pub fn encode(&self, strategy: &DetectionStrategy) -> Result<Vec<u8>, CacheError> {
        let target_json = strategy
            .target()
            .to_canonical_json()
            .map_err(target_to_cache_error)?;
        let mut w = Writer::new();
        w.bytes(MAGIC);
        w.u32(FORMAT_VERSION);
        w.str(strategy.cache_tag());
        w.str(&target_json);
        w.corner_map(&self.accepted);
        w.corner_map(&self.rejected);
        Ok(w.into_bytes())
    }

    /// Decode a cache produced by the same backend for the same target.
    pub fn decode(bytes: &[u8], strategy: &DetectionStrategy) -> Result<Self, CacheError> {
        let mut r = Reader::new(bytes);
        if r.take(MAGIC.len(), "magic")? != MAGIC {
            return Err(CacheError::Corrupt("bad magic".into()));
        }
        let version = r.u32("format version")?;
        if version != FORMAT_VERSION {
            return Err(CacheError::Corrupt(format!(
                "unsupported format version {version}"
            )));
        }

        let tag = r.str("type tag")?;
        if tag != strategy.cache_tag() {
            if !CACHE_TAGS.contains(&tag) {
                return Err(CacheError::UnsupportedTargetType(tag.to_string()));
            }
            return Err(CacheError::TypeMismatch {
                expected: strategy.cache_tag().to_string(),
                found: tag.to_string(),
            });
        }

        let expected = strategy.target();
        let stored = r.str("target descriptor")?;
        let target = TargetGeometry::from_json_expecting(stored, expected.target_type())
            .map_err(target_to_cache_error)?;
        if target != expected {
            return Err(CacheError::ParamMismatch);
        }

        let accepted = r.corner_map("accepted corners")?;
        let rejected = r.corner_map("rejected corners")?;
        if !r.is_at_end() {
            return Err(CacheError::Corrupt("trailing bytes".into()));
        }
        Ok(Self { accepted, rejected })
    }

    /// Replace the in-memory maps with the cache at `paths`.
    ///
    /// Returns `Ok(false)` when there is no cache file. The maps are only
    /// touched once the whole file has decoded.
    pub fn try_load(
        &mut self,
        paths: &CachePaths,
        strategy: &DetectionStrategy,
    ) -> Result<bool, CacheError> {
        let bytes = match fs::read(&paths.bin) {
            Ok(b) => b,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        *self = Self::decode(&bytes, strategy)?;
        Ok(true)
    }

    /// [`CornerCache::try_load`] that logs why a cache was not used.
    pub fn load(&mut self, paths: &CachePaths, strategy: &DetectionStrategy) -> bool {
        match self.try_load(paths, strategy) {
            Ok(true) => {
                info!(
                    "loaded corner cache {} ({} frames)",
                    paths.bin.display(),
                    self.accepted.len()
                );
                true
            }
            Ok(false) => false,
            Err(err @ (CacheError::TypeMismatch { .. } | CacheError::ParamMismatch)) => {
                info!("ignoring corner cache {}: {err}", paths.bin.display());
                false
            }
            Err(err) => {
                warn!("ignoring corner cache {}: {err}", paths.bin.display());
                false
            }
        }
    }

    /// Write the binary cache, then its pretty JSON mirror.
    pub fn save(&self, paths: &CachePaths, strategy: &DetectionStrategy) -> Result<(), CacheError> {
        let bytes = self.encode(strategy)?;
        if let Some(parent) = paths.bin.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&paths.bin, bytes)?;

        let target = strategy.target();
        let mirror = JsonMirror {
            target_type: strategy.cache_tag(),
            target: &target,
            corners: json_entries(&self.accepted),
            corners_rejected: json_entries(&self.rejected),
        };
        if let Some(parent) = paths.json.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&paths.json, serde_json::to_string_pretty(&mirror)?)?;
        info!(
            "saved corner cache {} ({} frames)",
            paths.bin.display(),
            self.accepted.len()
        );
        Ok(())
    }
}

fn target_to_cache_error(err: TargetError) -> CacheError {
    match err {
        TargetError::TypeMismatch { expected, found } => CacheError::TypeMismatch {
            expected: expected.to_string(),
            found,
        },
        TargetError::UnsupportedTargetType(t) => CacheError::UnsupportedTargetType(t),
        TargetError::Io(e) => CacheError::Io(e),
        other => CacheError::Corrupt(format!("target descriptor: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::BackendConfig;
    use calib_corners_chessboard::ChessboardParams;
    use calib_corners_core::{AprilGrid, Checkerboard, FrameId};
    use nalgebra::Point2;

    fn grid_strategy(tag_size: f64) -> DetectionStrategy {
        let target = AprilGrid::new(5, 4, tag_size, 0.3, 0, "16h5").unwrap();
        DetectionStrategy::for_target(&target.into()).unwrap()
    }

    fn sample_cache() -> CornerCache {
        let mut cache = CornerCache::default();
        let mut d = CornerData {
            seq: 1,
            ..Default::default()
        };
        d.push(Point2::new(12.5, 40.25), 9, 3.0);
        cache.accepted.insert(FrameId::new(1_000, 0), d);
        let mut rej = CornerData::default();
        rej.push(Point2::new(1.0, 1.0), -1, 3.0);
        cache.rejected.insert(FrameId::new(1_000, 1), rej);
        cache
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CachePaths::in_dir(dir.path());
        let strategy = grid_strategy(0.088);
        let cache = sample_cache();
        cache.save(&paths, &strategy).unwrap();

        let mut back = CornerCache::default();
        assert!(back.try_load(&paths, &strategy).unwrap());
        assert_eq!(back, cache);
        assert!(paths.json.exists());
    }

    #[test]
    fn missing_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = sample_cache();
        assert!(!cache.load(&CachePaths::in_dir(dir.path()), &grid_strategy(0.088)));
        assert_eq!(cache, sample_cache());
    }

    #[test]
    fn different_tag_size_is_param_mismatch() {
        let bytes = sample_cache().encode(&grid_strategy(0.088)).unwrap();
        let err = CornerCache::decode(&bytes, &grid_strategy(0.05)).unwrap_err();
        assert!(matches!(err, CacheError::ParamMismatch), "{err}");
    }

    #[test]
    fn other_backend_is_type_mismatch() {
        let board: TargetGeometry = Checkerboard::new(5, 7, 0.02).unwrap().into();
        let chess = DetectionStrategy::new(
            &board,
            &BackendConfig::CheckerboardChess(ChessboardParams::default()),
        )
        .unwrap();
        let grid = DetectionStrategy::for_target(&board).unwrap();

        let bytes = sample_cache().encode(&chess).unwrap();
        let err = CornerCache::decode(&bytes, &grid).unwrap_err();
        assert!(
            matches!(&err, CacheError::TypeMismatch { expected, found }
                if expected == "checkerboard_grid" && found == "checkerboard_chess"),
            "{err}"
        );
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let mut w = Writer::new();
        w.bytes(MAGIC);
        w.u32(FORMAT_VERSION);
        w.str("charuco");
        let err = CornerCache::decode(&w.into_bytes(), &grid_strategy(0.088)).unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedTargetType(t) if t == "charuco"));
    }

    #[test]
    fn failed_load_keeps_previous_maps() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CachePaths::in_dir(dir.path());
        let strategy = grid_strategy(0.088);
        let mut bytes = sample_cache().encode(&strategy).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&paths.bin, bytes).unwrap();

        let mut cache = CornerCache::default();
        cache
            .accepted
            .insert(FrameId::new(5, 0), CornerData::default());
        let err = cache.try_load(&paths, &strategy).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt(_)), "{err}");
        assert_eq!(cache.accepted.len(), 1);
        assert!(cache.accepted.contains_key(&FrameId::new(5, 0)));
    }

    #[test]
    fn json_mirror_lists_frames() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CachePaths::in_dir(dir.path());
        sample_cache().save(&paths, &grid_strategy(0.088)).unwrap();

        let v: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.json).unwrap()).unwrap();
        assert_eq!(v["targetType"], "aprilgrid");
        assert_eq!(v["target"]["tagCols"], 5);
        assert_eq!(v["corners"][0]["timestamp_ns"], 1_000);
        assert_eq!(v["corners"][0]["corner_ids"][0], 9);
        assert_eq!(v["corners_rejected"][0]["cam_id"], 1);
    }
}
