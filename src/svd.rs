//! Per-node spectra: the top singular values of each node's centered
//! singleton matrix, computed on demand by `CoverTree::attach_svds` and
//! cached on the tree. Singular values come from power iteration with
//! deflation on the (ridge-regularized) Gram matrix, so no external linear
//! algebra backend is needed; `sample_cap` bounds the Gram size per node.

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::constants::{DEFAULT_SEED, POWER_ITERATION_LIMIT, POWER_ITERATION_TOL};
use crate::errors::{TreeError, TreeResult};
use crate::tree::CoverTree;

/// One entry per node id; nodes with fewer than two singleton rows get an
/// empty vector.
pub(crate) fn singular_value_table(
    tree: &CoverTree,
    k: usize,
    sample_cap: usize,
    reg: f64,
) -> TreeResult<Vec<Vec<f32>>> {
    if k == 0 {
        return Err(TreeError::InvalidConfig("attach_svds needs k >= 1".into()));
    }
    if sample_cap < 2 {
        return Err(TreeError::InvalidConfig(
            "attach_svds needs sample_cap >= 2".into(),
        ));
    }
    if !(reg >= 0.0) {
        return Err(TreeError::InvalidConfig(
            "attach_svds regularizer must be non-negative".into(),
        ));
    }

    let arena = tree.arena();
    arena
        .nodes()
        .par_iter()
        .enumerate()
        .map(|(id, node)| -> TreeResult<Vec<f32>> {
            let mut rows = node.singletons().to_vec();
            if rows.len() < 2 {
                return Ok(Vec::new());
            }
            if rows.len() > sample_cap {
                let mut rng = ChaCha8Rng::seed_from_u64(DEFAULT_SEED ^ id as u64);
                rows = rows
                    .choose_multiple(&mut rng, sample_cap)
                    .copied()
                    .collect();
            }

            let dim = tree.dim();
            let mut a = Array2::<f64>::zeros((rows.len(), dim));
            for (r, &pi) in rows.iter().enumerate() {
                for (c, &v) in tree.data_point(pi)?.iter().enumerate() {
                    a[[r, c]] = v as f64;
                }
            }
            let mean = a.mean_axis(Axis(0)).expect("at least two rows");
            a -= &mean;

            let mut gram = a.dot(&a.t());
            for i in 0..gram.nrows() {
                gram[[i, i]] += reg;
            }

            let eigenvalues = top_eigenvalues(gram, k.min(rows.len()));
            Ok(eigenvalues
                .into_iter()
                .map(|l| l.max(0.0).sqrt() as f32)
                .collect())
        })
        .collect()
}

/// The k largest eigenvalues of a symmetric PSD matrix, by power iteration
/// with deflation.
fn top_eigenvalues(mut work: Array2<f64>, k: usize) -> Vec<f64> {
    let n = work.nrows();
    let mut out = Vec::with_capacity(k);
    for round in 0..k {
        // Deterministic start, perturbed per round so a deflated direction
        // cannot be a fixed point of the next one.
        let mut v = Array1::from_shape_fn(n, |i| 1.0 + ((i * (round + 1)) as f64 + 0.5).sin());
        let norm = v.dot(&v).sqrt();
        v.mapv_inplace(|x| x / norm);

        let mut eigenvalue = 0.0;
        for _ in 0..POWER_ITERATION_LIMIT {
            let w = work.dot(&v);
            let norm = w.dot(&w).sqrt();
            if norm <= POWER_ITERATION_TOL {
                eigenvalue = 0.0;
                break;
            }
            let w = w / norm;
            let next = w.dot(&work.dot(&w));
            let converged = (next - eigenvalue).abs() <= POWER_ITERATION_TOL * next.abs().max(1.0);
            v = w;
            eigenvalue = next;
            if converged {
                break;
            }
        }
        let eigenvalue = eigenvalue.max(0.0);
        out.push(eigenvalue);

        let outer = v
            .view()
            .insert_axis(Axis(1))
            .dot(&v.view().insert_axis(Axis(0)));
        work = work - outer * eigenvalue;
    }
    out
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;
    use ndarray::array;

    use crate::builder::CoverTreeBuilder;
    use crate::point_store::PointStore;

    use super::*;

    #[test]
    fn power_iteration_on_known_spectrum() {
        let m = array![[3.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.5]];
        let eigs = top_eigenvalues(m, 3);
        assert!(approx_eq!(f64, eigs[0], 3.0, epsilon = 1e-6));
        assert!(approx_eq!(f64, eigs[1], 1.0, epsilon = 1e-6));
        assert!(approx_eq!(f64, eigs[2], 0.5, epsilon = 1e-6));
    }

    #[test]
    fn attached_values_match_line_spectrum() {
        // Points on a line in 2-D; one big leaf holds them as singletons.
        let xs: Vec<f32> = (0..9).map(|i| i as f32).collect();
        let data: Vec<f32> = xs.iter().flat_map(|&x| [x, 0.0]).collect();
        let store = PointStore::from_ram(data, 2).unwrap();
        let tree = CoverTreeBuilder::new()
            .with_leaf_cutoff(100)
            .build(store, None)
            .unwrap();

        tree.attach_svds(2, 100, 0.0).unwrap();
        let values = tree.singular_values(tree.root_address()).unwrap().unwrap();

        // The root's singletons are points 1..9; centered, the first
        // singular value is the root sum of squares along the line.
        let singles: Vec<f64> = (1..9).map(|i| i as f64).collect();
        let mean = singles.iter().sum::<f64>() / singles.len() as f64;
        let expected: f64 = singles.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>();
        assert!(approx_eq!(f64, values[0] as f64, expected.sqrt(), epsilon = 1e-3));
        assert!(values.len() == 2 && values[1] < 1e-3);
    }

    #[test]
    fn nodes_without_rows_get_nothing() {
        let store = PointStore::from_ram(vec![0.0, 1.0, 5.0, 9.0], 1).unwrap();
        let tree = CoverTreeBuilder::new().build(store, None).unwrap();
        tree.attach_svds(3, 10, 0.0).unwrap();
        // Every leaf here holds a single center and no singleton rows.
        for layer in tree.layers() {
            for node in layer.nodes() {
                if node.singleton_len() < 2 {
                    assert!(tree.singular_values(node.address()).unwrap().is_none());
                }
            }
        }
    }
}
