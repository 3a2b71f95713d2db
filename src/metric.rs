//! Provides the `Metric` trait and the default `L2` implementation.

use rayon::prelude::*;

/// A `Metric` is a function that takes two points and deterministically
/// produces a non-negative f32. It must satisfy `d(x, x) == 0` and the
/// triangle inequality; the tree and queries treat it as opaque and assume
/// nothing else. Callers may inject their own implementation (a
/// SIMD-specialized L2, an edit distance, a kernel distance) at store
/// construction.
pub trait Metric: std::fmt::Debug + Send + Sync {
    /// Returns the name of the `Metric` as a str.
    fn name(&self) -> &str;

    /// Returns the distance between two points.
    fn one_to_one(&self, x: &[f32], y: &[f32]) -> f32;

    fn one_to_many(&self, x: &[f32], ys: &[&[f32]]) -> Vec<f32> {
        ys.iter().map(|y| self.one_to_one(x, y)).collect()
    }

    fn par_one_to_many(&self, x: &[f32], ys: &[&[f32]]) -> Vec<f32> {
        ys.par_iter().map(|y| self.one_to_one(x, y)).collect()
    }
}

/// L2-norm.
#[derive(Debug, Clone, Copy, Default)]
pub struct L2;

impl Metric for L2 {
    fn name(&self) -> &str {
        "l2"
    }

    fn one_to_one(&self, x: &[f32], y: &[f32]) -> f32 {
        x.iter()
            .zip(y.iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}
