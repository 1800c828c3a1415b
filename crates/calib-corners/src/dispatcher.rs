//! Parallel corner detection over a dataset, backed by the corner cache.

use crate::cache::{CacheError, CachePaths, CornerCache};
use crate::context::PipelineContext;
use crate::dataset::{Dataset, DatasetError};
use crate::strategy::DetectionStrategy;
use calib_corners_core::{CornerMap, FrameId, ImageError};
use log::{debug, info};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("detection run cancelled")]
    Cancelled,

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Cooperative cancellation flag shared between a run and its caller.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug, Default)]
pub struct DetectionOutcome {
    pub cache: CornerCache,
    /// `true` when the corners were loaded instead of detected.
    pub from_cache: bool,
}

/// One corner detection pass: `new`, optional builders, then [`run`].
///
/// [`run`]: CornerDetectionRun::run
pub struct CornerDetectionRun<'a, D: Dataset + ?Sized> {
    ctx: &'a PipelineContext,
    dataset: &'a D,
    strategy: &'a DetectionStrategy,
    cache: Option<CachePaths>,
    cancel: Option<CancelToken>,
}

type ChunkMaps = (CornerMap, CornerMap);

impl<'a, D: Dataset + ?Sized> CornerDetectionRun<'a, D> {
    pub fn new(ctx: &'a PipelineContext, dataset: &'a D, strategy: &'a DetectionStrategy) -> Self {
        Self {
            ctx,
            dataset,
            strategy,
            cache: None,
            cancel: None,
        }
    }

    pub fn with_cache(mut self, paths: CachePaths) -> Self {
        self.cache = Some(paths);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Load the cache if it matches, otherwise detect every frame and save.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self),
            fields(backend = self.strategy.cache_tag(), frames = self.dataset.timestamps().len())
        )
    )]
    pub fn run(&self) -> Result<DetectionOutcome, DispatchError> {
        let mut cache = CornerCache::default();
        if let Some(paths) = &self.cache {
            if cache.load(paths, self.strategy) {
                return Ok(DetectionOutcome {
                    cache,
                    from_cache: true,
                });
            }
        }
        cache.clear();

        let frames: Vec<(u64, i64)> = self
            .dataset
            .timestamps()
            .iter()
            .enumerate()
            .map(|(j, &ts)| (j as u64, ts))
            .collect();
        info!(
            "detecting {} corners in {} timestamps x {} cameras on {} threads",
            self.strategy.cache_tag(),
            frames.len(),
            self.dataset.num_cams(),
            self.ctx.num_threads()
        );

        let chunk_size = self.ctx.chunk_size();
        let results: Vec<Result<ChunkMaps, DispatchError>> = self.ctx.install(|| {
            frames
                .par_chunks(chunk_size)
                .map(|chunk| self.detect_chunk(chunk, self.strategy.clone()))
                .collect()
        });

        for res in results {
            let (accepted, rejected) = res?;
            cache.accepted.extend(accepted);
            cache.rejected.extend(rejected);
        }
        if self.cancelled() {
            return Err(DispatchError::Cancelled);
        }

        if let Some(paths) = &self.cache {
            cache.save(paths, self.strategy)?;
        }
        Ok(DetectionOutcome {
            cache,
            from_cache: false,
        })
    }

    fn detect_chunk(
        &self,
        chunk: &[(u64, i64)],
        strategy: DetectionStrategy,
    ) -> Result<ChunkMaps, DispatchError> {
        let mut accepted = CornerMap::new();
        let mut rejected = CornerMap::new();

        for &(seq, ts) in chunk {
            if self.cancelled() {
                return Err(DispatchError::Cancelled);
            }
            let images = self.dataset.images(ts)?;
            for (cam, image) in images.iter().enumerate() {
                let Some(image) = image else {
                    continue;
                };
                let (mut acc, mut rej) = strategy.process(image)?;
                acc.seq = seq;
                rej.seq = seq;
                debug!(
                    "image ({ts},{cam}) detected {} corners ({} rejected)",
                    acc.len(),
                    rej.len()
                );
                let frame = FrameId::new(ts, cam);
                accepted.insert(frame, acc);
                rejected.insert(frame, rej);
            }
        }
        Ok((accepted, rejected))
    }
}
