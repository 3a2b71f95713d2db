//! Monte-Carlo baseline for the drift trackers.
//!
//! A tracker fed points from the training distribution still reports
//! nonzero KL, because every posterior concentrates as evidence arrives.
//! The baseline characterizes that floor: it replays `sequence_count`
//! synthetic in-distribution streams (uniform draws from the stored points)
//! through fresh trackers, snapshots the summary statistics every
//! `sample_rate` steps, and keeps the per-offset mean and variance of each
//! statistic across runs. Live readings are then normalized against the
//! snapshot interpolated at the live stream's length.

use log::info;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;

use crate::builder::CancelToken;
use crate::errors::{TreeError, TreeResult};
use crate::helpers;
use crate::tracker::TrackerStats;
use crate::tree::CoverTree;

/// Mean and population variance of one statistic across baseline runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsMoments {
    pub mean: f64,
    pub var: f64,
}

impl StatsMoments {
    fn from_samples(values: &[f64]) -> StatsMoments {
        let mean = helpers::mean(values);
        StatsMoments {
            mean,
            var: helpers::variance(values, mean),
        }
    }

    fn lerp(a: StatsMoments, b: StatsMoments, t: f64) -> StatsMoments {
        StatsMoments {
            mean: a.mean + (b.mean - a.mean) * t,
            var: a.var + (b.var - a.var) * t,
        }
    }

    /// `(live - mean) / sqrt(var)`, or the raw difference when the variance
    /// vanishes.
    pub fn normalize(&self, live: f64) -> f64 {
        let diff = live - self.mean;
        if self.var > 0.0 {
            diff / self.var.sqrt()
        } else {
            diff
        }
    }
}

/// The baseline moments of every tracker statistic at one stream offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BaselineSnapshot {
    pub max: StatsMoments,
    pub min: StatsMoments,
    pub nz_count: StatsMoments,
    pub moment1_nz: StatsMoments,
    pub moment2_nz: StatsMoments,
}

/// A live statistics vector expressed in baseline standard deviations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedStats {
    pub max: f64,
    pub min: f64,
    pub nz_count: f64,
    pub moment1_nz: f64,
    pub moment2_nz: f64,
}

impl BaselineSnapshot {
    fn lerp(a: &BaselineSnapshot, b: &BaselineSnapshot, t: f64) -> BaselineSnapshot {
        BaselineSnapshot {
            max: StatsMoments::lerp(a.max, b.max, t),
            min: StatsMoments::lerp(a.min, b.min, t),
            nz_count: StatsMoments::lerp(a.nz_count, b.nz_count, t),
            moment1_nz: StatsMoments::lerp(a.moment1_nz, b.moment1_nz, t),
            moment2_nz: StatsMoments::lerp(a.moment2_nz, b.moment2_nz, t),
        }
    }

    pub fn normalize(&self, live: &TrackerStats) -> NormalizedStats {
        NormalizedStats {
            max: self.max.normalize(live.max),
            min: self.min.normalize(live.min),
            nz_count: self.nz_count.normalize(live.nz_count as f64),
            moment1_nz: self.moment1_nz.normalize(live.moment1_nz),
            moment2_nz: self.moment2_nz.normalize(live.moment2_nz),
        }
    }
}

/// Expected in-distribution tracker statistics, indexed by stream offset.
/// Construct through [`CoverTree::kl_div_dirichlet_baseline`].
#[derive(Debug, Clone)]
pub struct DirichletBaseline {
    offsets: Vec<usize>,
    snapshots: Vec<BaselineSnapshot>,
}

impl DirichletBaseline {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn generate(
        tree: &CoverTree,
        prior_weight: f64,
        observation_weight: f64,
        window_size: usize,
        sequence_count: usize,
        sample_rate: usize,
        seed: u64,
        cancel: Option<&CancelToken>,
    ) -> TreeResult<DirichletBaseline> {
        if window_size == 0 {
            return Err(TreeError::InvalidConfig(
                "baseline needs a bounded window to fix its sequence length".into(),
            ));
        }
        if sequence_count == 0 || sample_rate == 0 {
            return Err(TreeError::InvalidConfig(
                "sequence_count and sample_rate must be positive".into(),
            ));
        }

        let sequence_len = window_size;
        let sampled = |step: usize| step % sample_rate == 0 || step == sequence_len;
        let offsets: Vec<usize> = (0..=sequence_len).filter(|&s| sampled(s)).collect();

        let runs: Vec<Vec<TrackerStats>> = (0..sequence_count)
            .into_par_iter()
            .map(|run| -> TreeResult<Vec<TrackerStats>> {
                if cancel.map_or(false, CancelToken::is_cancelled) {
                    return Err(TreeError::Cancelled);
                }
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(run as u64));
                let mut tracker =
                    tree.kl_div_dirichlet(prior_weight, observation_weight, window_size);
                let mut snapshots = Vec::with_capacity(offsets.len());
                for step in 0..=sequence_len {
                    if sampled(step) {
                        snapshots.push(tracker.stats());
                    }
                    if step == sequence_len {
                        break;
                    }
                    let pi = rng.gen_range(0..tree.len());
                    tracker.push(tree.data_point(pi)?)?;
                }
                Ok(snapshots)
            })
            .collect::<TreeResult<Vec<_>>>()?;

        let snapshots = (0..offsets.len())
            .map(|slot| {
                let column = |f: &dyn Fn(&TrackerStats) -> f64| {
                    let values: Vec<f64> = runs.iter().map(|run| f(&run[slot])).collect();
                    StatsMoments::from_samples(&values)
                };
                BaselineSnapshot {
                    max: column(&|s| s.max),
                    min: column(&|s| s.min),
                    nz_count: column(&|s| s.nz_count as f64),
                    moment1_nz: column(&|s| s.moment1_nz),
                    moment2_nz: column(&|s| s.moment2_nz),
                }
            })
            .collect();

        info!(
            "dirichlet baseline: {} runs of {} steps, {} snapshot offsets",
            sequence_count,
            sequence_len,
            offsets.len()
        );
        Ok(DirichletBaseline { offsets, snapshots })
    }

    /// The snapshot offsets actually sampled.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// The baseline at a stream offset. Offsets between snapshots are
    /// linearly interpolated; offsets beyond the last snapshot clamp to it.
    pub fn stats(&self, offset: usize) -> BaselineSnapshot {
        let last = *self.offsets.last().expect("baseline has snapshots");
        if offset >= last {
            return self.snapshots[self.snapshots.len() - 1];
        }
        // First snapshot is at offset zero, so `offset` sits in a bracket.
        let hi = self.offsets.partition_point(|&o| o <= offset);
        let lo = hi - 1;
        if self.offsets[lo] == offset {
            return self.snapshots[lo];
        }
        let span = (self.offsets[hi] - self.offsets[lo]) as f64;
        let t = (offset - self.offsets[lo]) as f64 / span;
        BaselineSnapshot::lerp(&self.snapshots[lo], &self.snapshots[hi], t)
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use crate::builder::{CancelToken, CoverTreeBuilder};
    use crate::point_store::PointStore;
    use crate::tree::CoverTree;

    fn clustered_tree(count: usize, seed: u64) -> CoverTree {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let data: Vec<f32> = (0..count * 2).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let store = PointStore::from_ram(data, 2).unwrap();
        CoverTreeBuilder::new()
            .with_scale_base(1.5)
            .with_leaf_cutoff(10)
            .build(store, None)
            .unwrap()
    }

    #[test]
    fn deterministic_given_seed() {
        let tree = clustered_tree(200, 3);
        let a = tree
            .kl_div_dirichlet_baseline_seeded(1.0, 1.0, 60, 4, 20, 99, None)
            .unwrap();
        let b = tree
            .kl_div_dirichlet_baseline_seeded(1.0, 1.0, 60, 4, 20, 99, None)
            .unwrap();
        assert_eq!(a.offsets(), b.offsets());
        for (&offset, (sa, sb)) in a
            .offsets()
            .iter()
            .zip(a.snapshots.iter().zip(b.snapshots.iter()))
        {
            assert_eq!(sa, sb, "offset {offset}");
        }
    }

    #[test]
    fn snapshots_cover_and_interpolate() {
        let tree = clustered_tree(200, 3);
        let baseline = tree
            .kl_div_dirichlet_baseline(1.0, 1.0, 50, 4, 20)
            .unwrap();
        assert_eq!(baseline.offsets(), &[0, 20, 40, 50]);

        // Offset zero is the empty tracker.
        let zero = baseline.stats(0);
        assert_eq!(zero.moment1_nz.mean, 0.0);
        assert_eq!(zero.nz_count.mean, 0.0);

        let lo = baseline.stats(20);
        let hi = baseline.stats(40);
        let mid = baseline.stats(30);
        assert!(approx_eq!(
            f64,
            mid.moment1_nz.mean,
            (lo.moment1_nz.mean + hi.moment1_nz.mean) / 2.0,
            epsilon = 1e-9
        ));

        // Beyond the last snapshot the baseline clamps.
        assert_eq!(baseline.stats(1000), baseline.stats(50));
    }

    #[test]
    fn in_distribution_stays_near_baseline_and_replay_escapes_it() {
        let tree = clustered_tree(400, 17);
        let window = 200;
        let baseline = tree
            .kl_div_dirichlet_baseline_seeded(1.0, 1.0, window, 16, 25, 7, None)
            .unwrap();

        // An in-distribution stream: uniform draws with a seed no baseline
        // run used.
        let mut rng = ChaCha8Rng::seed_from_u64(1234);
        let mut tracker = tree.kl_div_dirichlet(1.0, 1.0, window);
        for _ in 0..window {
            let pi = rng.gen_range(0..tree.len());
            tracker.push(tree.data_point(pi).unwrap()).unwrap();
        }
        let normal = baseline.stats(window).normalize(&tracker.stats());

        // The same point replayed over and over.
        let mut attack = tree.kl_div_dirichlet(1.0, 1.0, window);
        let replay = tree.data_point(0).unwrap().to_vec();
        for _ in 0..window {
            attack.push(&replay).unwrap();
        }
        let attacked = baseline.stats(window).normalize(&attack.stats());

        assert!(normal.moment1_nz.abs() < 5.0, "in-distribution z = {normal:?}");
        assert!(
            attacked.moment1_nz > 5.0,
            "replay z = {attacked:?} should stand out"
        );
        assert!(attacked.moment1_nz > normal.moment1_nz);
    }

    #[test]
    fn cancellation_propagates() {
        let tree = clustered_tree(100, 5);
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            tree.kl_div_dirichlet_baseline_seeded(1.0, 1.0, 50, 4, 10, 42, Some(&token)),
            Err(crate::errors::TreeError::Cancelled)
        ));
    }

    #[test]
    fn unbounded_window_rejected() {
        let tree = clustered_tree(100, 5);
        assert!(matches!(
            tree.kl_div_dirichlet_baseline(1.0, 1.0, 0, 4, 10),
            Err(crate::errors::TreeError::InvalidConfig(_))
        ));
    }
}
