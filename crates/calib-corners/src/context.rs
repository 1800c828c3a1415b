//! Execution context shared by a detection run.

use crate::dispatcher::DispatchError;

pub const DEFAULT_CHUNK_SIZE: usize = 8;

/// Owns the worker pool; nothing in the pipeline touches rayon's global pool.
#[derive(Debug)]
pub struct PipelineContext {
    pool: rayon::ThreadPool,
    chunk_size: usize,
}

impl PipelineContext {
    /// `workers == 0` uses rayon's default thread count; `chunk_size` is the
    /// number of consecutive timestamps handled by one task.
    pub fn new(workers: usize, chunk_size: usize) -> Result<Self, DispatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("calib-corners-{idx}"))
            .build()
            .map_err(|e| DispatchError::ThreadPool(e.to_string()))?;
        Ok(Self {
            pool,
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run `op` inside the context's pool.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_honoured() {
        let ctx = PipelineContext::new(3, 0).unwrap();
        assert_eq!(ctx.num_threads(), 3);
        assert_eq!(ctx.chunk_size(), 1);
        assert_eq!(ctx.install(rayon::current_num_threads), 3);
    }
}
