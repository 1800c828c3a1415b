//! Multi-camera image sources.

use calib_corners_core::{ImageError, RawImage};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Highest number of cameras a folder dataset may declare.
pub const MAX_CAMERAS: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    #[error("camera directory {path} is out of range (at most {max} cameras)", max = MAX_CAMERAS)]
    CameraIndex { path: PathBuf },

    #[error("unknown timestamp {0}")]
    UnknownTimestamp(i64),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Time-synchronized frames of several cameras.
///
/// Implementations are shared by all detection workers.
pub trait Dataset: Sync {
    /// Frame timestamps in nanoseconds, ascending and without duplicates.
    fn timestamps(&self) -> &[i64];

    fn num_cams(&self) -> usize;

    /// One slot per camera; `None` where that camera has no frame.
    fn images(&self, timestamp_ns: i64) -> Result<Vec<Option<Arc<RawImage>>>, DatasetError>;
}

/// Dataset held entirely in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDataset {
    num_cams: usize,
    timestamps: Vec<i64>,
    frames: BTreeMap<i64, Vec<Option<Arc<RawImage>>>>,
}

impl InMemoryDataset {
    pub fn new(num_cams: usize) -> Self {
        Self {
            num_cams,
            ..Default::default()
        }
    }

    /// Add or replace the frame of `cam_id` at `timestamp_ns`.
    ///
    /// Camera ids beyond the current count grow the dataset.
    pub fn insert(&mut self, timestamp_ns: i64, cam_id: usize, image: RawImage) {
        self.num_cams = self.num_cams.max(cam_id + 1);
        let slots = self.frames.entry(timestamp_ns).or_default();
        if slots.len() <= cam_id {
            slots.resize(cam_id + 1, None);
        }
        slots[cam_id] = Some(Arc::new(image));
        self.timestamps = self.frames.keys().copied().collect();
    }
}

impl Dataset for InMemoryDataset {
    fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    fn num_cams(&self) -> usize {
        self.num_cams
    }

    fn images(&self, timestamp_ns: i64) -> Result<Vec<Option<Arc<RawImage>>>, DatasetError> {
        let slots = self
            .frames
            .get(&timestamp_ns)
            .ok_or(DatasetError::UnknownTimestamp(timestamp_ns))?;
        let mut out = slots.clone();
        out.resize(self.num_cams, None);
        Ok(out)
    }
}

#[cfg(feature = "image")]
pub use folder::FolderDataset;

#[cfg(feature = "image")]
mod folder {
    use super::{Dataset, DatasetError, MAX_CAMERAS};
    use calib_corners_core::RawImage;
    use log::debug;
    use std::collections::{BTreeMap, BTreeSet};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    /// Images laid out as `<root>/cam<N>/<timestamp_ns>.png`.
    ///
    /// Files are decoded lazily, one timestamp at a time.
    #[derive(Clone, Debug)]
    pub struct FolderDataset {
        root: PathBuf,
        timestamps: Vec<i64>,
        cams: Vec<BTreeMap<i64, PathBuf>>,
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> DatasetError + '_ {
        move |source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn cam_index(name: &str) -> Option<usize> {
        name.strip_prefix("cam")?.parse().ok()
    }

    fn timestamp_of(path: &Path) -> Option<i64> {
        let ext = path.extension()?.to_str()?;
        if !ext.eq_ignore_ascii_case("png") {
            return None;
        }
        path.file_stem()?.to_str()?.parse().ok()
    }

    impl FolderDataset {
        pub fn open(root: impl AsRef<Path>) -> Result<Self, DatasetError> {
            let root = root.as_ref().to_path_buf();
            let mut by_cam: BTreeMap<usize, BTreeMap<i64, PathBuf>> = BTreeMap::new();

            for entry in fs::read_dir(&root).map_err(io_err(&root))? {
                let entry = entry.map_err(io_err(&root))?;
                let path = entry.path();
                let Some(idx) = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(cam_index)
                else {
                    continue;
                };
                if !path.is_dir() {
                    continue;
                }
                if idx >= MAX_CAMERAS {
                    return Err(DatasetError::CameraIndex { path });
                }
                let files = by_cam.entry(idx).or_default();
                for f in fs::read_dir(&path).map_err(io_err(&path))? {
                    let f = f.map_err(io_err(&path))?.path();
                    if let Some(ts) = timestamp_of(&f) {
                        files.insert(ts, f);
                    }
                }
            }

            let num_cams = by_cam.keys().next_back().map_or(0, |&k| k + 1);
            let mut cams = vec![BTreeMap::new(); num_cams];
            for (idx, files) in by_cam {
                cams[idx] = files;
            }
            let timestamps: Vec<i64> = cams
                .iter()
                .flat_map(|c| c.keys().copied())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            debug!(
                "folder dataset {}: {} cameras, {} timestamps",
                root.display(),
                num_cams,
                timestamps.len()
            );

            Ok(Self {
                root,
                timestamps,
                cams,
            })
        }

        pub fn root(&self) -> &Path {
            &self.root
        }
    }

    impl Dataset for FolderDataset {
        fn timestamps(&self) -> &[i64] {
            &self.timestamps
        }

        fn num_cams(&self) -> usize {
            self.cams.len()
        }

        fn images(&self, timestamp_ns: i64) -> Result<Vec<Option<Arc<RawImage>>>, DatasetError> {
            if self.timestamps.binary_search(&timestamp_ns).is_err() {
                return Err(DatasetError::UnknownTimestamp(timestamp_ns));
            }
            self.cams
                .iter()
                .map(|files| {
                    let Some(path) = files.get(&timestamp_ns) else {
                        return Ok(None);
                    };
                    let img = image::open(path).map_err(|e| DatasetError::Decode {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                    Ok(Some(Arc::new(RawImage::from_dynamic(img)?)))
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(v: u8) -> RawImage {
        RawImage::mono8(2, 2, vec![v; 4]).unwrap()
    }

    #[test]
    fn in_memory_orders_timestamps_and_pads_cameras() {
        let mut ds = InMemoryDataset::new(1);
        ds.insert(30, 0, frame(1));
        ds.insert(10, 2, frame(2));
        ds.insert(30, 1, frame(3));

        assert_eq!(ds.timestamps(), &[10, 30]);
        assert_eq!(ds.num_cams(), 3);
        let imgs = ds.images(10).unwrap();
        assert_eq!(imgs.len(), 3);
        assert!(imgs[0].is_none() && imgs[1].is_none());
        assert!(imgs[2].is_some());
        assert!(matches!(
            ds.images(20),
            Err(DatasetError::UnknownTimestamp(20))
        ));
    }

    #[cfg(feature = "image")]
    #[test]
    fn folder_dataset_reads_camera_directories() {
        let dir = tempfile::tempdir().unwrap();
        for (cam, ts) in [(0, 100i64), (0, 200), (1, 200)] {
            let cam_dir = dir.path().join(format!("cam{cam}"));
            std::fs::create_dir_all(&cam_dir).unwrap();
            image::GrayImage::from_pixel(4, 3, image::Luma([ts as u8]))
                .save(cam_dir.join(format!("{ts}.png")))
                .unwrap();
        }
        std::fs::write(dir.path().join("cam0").join("notes.txt"), "x").unwrap();

        let ds = FolderDataset::open(dir.path()).unwrap();
        assert_eq!(ds.timestamps(), &[100, 200]);
        assert_eq!(ds.num_cams(), 2);

        let at100 = ds.images(100).unwrap();
        assert!(at100[1].is_none());
        let img = at100[0].as_ref().unwrap();
        assert_eq!((img.width, img.height), (4, 3));
        assert_eq!(img.to_gray8().data[0], 100);
        assert!(ds.images(200).unwrap().iter().all(Option::is_some));
    }

    #[cfg(feature = "image")]
    #[test]
    fn absurd_camera_index_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("cam0")).unwrap();
        std::fs::create_dir_all(dir.path().join("cam99999999999")).unwrap();

        let err = FolderDataset::open(dir.path()).unwrap_err();
        match err {
            DatasetError::CameraIndex { path } => assert!(path.ends_with("cam99999999999")),
            other => panic!("unexpected error {other}"),
        }
    }
}
