//! JSON pipeline configuration.

use crate::cache::CachePaths;
use crate::context::{PipelineContext, DEFAULT_CHUNK_SIZE};
use crate::dispatcher::DispatchError;
use crate::strategy::{BackendConfig, DetectionStrategy, StrategyError};
use calib_corners_core::TargetGeometry;
use calib_corners_pose::{PoseError, PoseInitParams, PoseInitializer};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Pose(#[from] PoseError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Everything needed to run detection and pose initialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub target: TargetGeometry,
    /// Detection backend; the target's default backend when omitted.
    #[serde(default)]
    pub backend: Option<BackendConfig>,
    /// Worker threads, `0` for one per core.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Directory holding the corner cache; no caching when omitted.
    #[serde(default)]
    pub cache: Option<PathBuf>,
    #[serde(default)]
    pub pose: PoseInitParams,
}

impl PipelineConfig {
    pub fn new(target: TargetGeometry) -> Self {
        Self {
            target,
            backend: None,
            workers: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache: None,
            pose: PoseInitParams::default(),
        }
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn backend(&self) -> BackendConfig {
        self.backend
            .clone()
            .unwrap_or_else(|| BackendConfig::default_for(&self.target))
    }

    pub fn build_strategy(&self) -> Result<DetectionStrategy, ConfigError> {
        Ok(DetectionStrategy::new(&self.target, &self.backend())?)
    }

    pub fn build_context(&self) -> Result<PipelineContext, ConfigError> {
        Ok(PipelineContext::new(self.workers, self.chunk_size)?)
    }

    pub fn build_pose_initializer(&self) -> Result<PoseInitializer, ConfigError> {
        Ok(PoseInitializer::new(self.pose.clone())?)
    }

    pub fn cache_paths(&self) -> Option<CachePaths> {
        self.cache.as_ref().map(CachePaths::in_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calib_corners_core::AprilGrid;

    #[test]
    fn minimal_config_uses_defaults() {
        let json = r#"{
            "target": {
                "targetType": "aprilgrid",
                "tagCols": 6, "tagRows": 5, "tagSize": 0.03, "tagSpacing": 0.3,
                "tagFamily": "16h5", "lowId": 0
            }
        }"#;
        let cfg: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.workers, 0);
        assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(cfg.cache_paths().is_none());
        assert_eq!(cfg.build_strategy().unwrap().cache_tag(), "aprilgrid");
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let mut cfg = PipelineConfig::new(AprilGrid::new(5, 4, 0.088, 0.3, 0, "16h5").unwrap().into());
        cfg.workers = 3;
        cfg.cache = Some(dir.path().join("cache"));
        cfg.write_json(&path).unwrap();

        let back = PipelineConfig::load_json(&path).unwrap();
        assert_eq!(back.target, cfg.target);
        assert_eq!(back.workers, 3);
        assert_eq!(
            back.cache_paths().unwrap().bin,
            dir.path().join("cache").join("calib_corners.bin")
        );
    }
}
