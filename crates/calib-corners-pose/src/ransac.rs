//! Small model-agnostic RANSAC loop.
//!
//! Estimators carry their own context (`&self`), so residuals can be measured
//! in pixels through a camera model. Failure to reach consensus is reported
//! through [`RansacResult::success`], never by panicking.

use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacOptions {
    pub max_iters: usize,
    /// Inlier residual threshold, in the estimator's residual units.
    pub thresh: f64,
    pub min_inliers: usize,
    /// Desired probability in `[0, 1]` of drawing one all-inlier sample.
    pub confidence: f64,
    pub seed: u64,
    /// Refit on the full inlier set before scoring a hypothesis.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 500,
            thresh: 2.0,
            min_inliers: 4,
            confidence: 0.99,
            seed: 0x5eed_ca1b,
            refit_on_inliers: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub success: bool,
    pub model: Option<M>,
    pub inliers: Vec<usize>,
    pub inlier_rms: f64,
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            success: false,
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }
}

pub trait Estimator {
    type Datum;
    type Model;

    /// Size of a minimal sample.
    const MIN_SAMPLES: usize;

    fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// Non-negative error of one datum under `model`.
    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64;

    fn is_degenerate(&self, _data: &[Self::Datum], _sample: &[usize]) -> bool {
        false
    }

    /// Least-squares fit on an inlier set; `None` keeps the sample model.
    fn refit(&self, _data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

fn rms(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::INFINITY;
    }
    (vals.iter().map(|v| v * v).sum::<f64>() / vals.len() as f64).sqrt()
}

/// Iterations needed to hit `confidence` at the observed inlier ratio.
fn required_iterations(
    confidence: f64,
    inlier_ratio: f64,
    min_samples: usize,
    done: usize,
    max_iters: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iters;
    }
    let denom = (1.0 - inlier_ratio.powi(min_samples as i32)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iters;
    }
    let n = ((1.0 - confidence.min(1.0 - 1e-12)).ln() / denom).ceil() as usize;
    n.clamp(done, max_iters)
}

fn collect_inliers<E: Estimator>(
    est: &E,
    model: &E::Model,
    data: &[E::Datum],
    thresh: f64,
    inliers: &mut Vec<usize>,
    residuals: &mut Vec<f64>,
) {
    inliers.clear();
    residuals.clear();
    for (i, d) in data.iter().enumerate() {
        let r = est.residual(model, d);
        if r <= thresh {
            inliers.push(i);
            residuals.push(r);
        }
    }
}

/// Run RANSAC with a seeded RNG; results are reproducible for a given seed.
pub fn ransac<E: Estimator>(est: &E, data: &[E::Datum], opts: &RansacOptions) -> RansacResult<E::Model> {
    let mut best = RansacResult::default();
    if data.len() < E::MIN_SAMPLES || E::MIN_SAMPLES == 0 {
        return best;
    }

    let indices: Vec<usize> = (0..data.len()).collect();
    let mut sample = vec![0usize; E::MIN_SAMPLES];
    let mut rng = StdRng::seed_from_u64(opts.seed);

    let mut inliers = Vec::with_capacity(data.len());
    let mut residuals = Vec::with_capacity(data.len());

    let mut budget = opts.max_iters;
    let mut iters = 0;
    while iters < budget {
        iters += 1;
        for (slot, &idx) in sample
            .iter_mut()
            .zip(indices.choose_multiple(&mut rng, E::MIN_SAMPLES))
        {
            *slot = idx;
        }
        if est.is_degenerate(data, &sample) {
            continue;
        }
        let Some(mut model) = est.fit(data, &sample) else {
            continue;
        };

        collect_inliers(est, &model, data, opts.thresh, &mut inliers, &mut residuals);
        if inliers.len() < opts.min_inliers.max(E::MIN_SAMPLES) {
            continue;
        }
        if opts.refit_on_inliers {
            if let Some(refit) = est.refit(data, &inliers) {
                model = refit;
                collect_inliers(est, &model, data, opts.thresh, &mut inliers, &mut residuals);
            }
        }

        let score = rms(&residuals);
        let better = !best.success
            || inliers.len() > best.inliers.len()
            || (inliers.len() == best.inliers.len() && score < best.inlier_rms);
        if better {
            best.success = true;
            best.model = Some(model);
            best.inliers = inliers.clone();
            best.inlier_rms = score;
            best.iters = iters;
        }

        budget = required_iterations(
            opts.confidence,
            best.inliers.len() as f64 / data.len() as f64,
            E::MIN_SAMPLES,
            iters,
            opts.max_iters,
        );
    }

    best
}
