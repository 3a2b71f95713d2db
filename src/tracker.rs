//! Streaming drift detection over a tree's paths.
//!
//! Each node's training-time child masses define a symmetric-by-mass
//! Dirichlet prior over which bucket a descending point picks: bucket 0 is
//! the singleton pile, the rest are the children in stored order. A pushed
//! point contributes `observation_weight` to the chosen bucket of every
//! node on its path; the posterior stays Dirichlet, so its KL divergence to
//! the prior has the closed form evaluated in [`dirichlet_kl`]. A ring
//! buffer of the last `window_size` paths retracts old contributions, and
//! the per-node KL is recomputed only where evidence actually changed.
//!
//! A tracker is owned by one logical stream; it is not safe for concurrent
//! pushes, but any number of trackers run independently over a shared tree.

use std::collections::VecDeque;

use serde::Serialize;

use crate::constants::{ALPHA_CLAMP, EVIDENCE_FLOOR};
use crate::errors::TreeResult;
use crate::helpers::{digamma, ln_gamma};
use crate::tree::CoverTree;
use crate::{NodeAddress, NodeId};

/// Aggregates over every node with nonzero evidence.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TrackerStats {
    /// Largest per-node KL.
    pub max: f64,
    /// Smallest per-node KL.
    pub min: f64,
    /// Number of nodes holding evidence.
    pub nz_count: u64,
    /// Sum of per-node KL.
    pub moment1_nz: f64,
    /// Sum of squared per-node KL.
    pub moment2_nz: f64,
    /// Points currently in the window.
    pub sequence_len: usize,
}

#[derive(Debug, Clone)]
struct NodeEvidence {
    observations: Vec<f64>,
    total: f64,
    kl: f64,
}

/// Sliding-window Dirichlet-categorical posterior tracker; see the module
/// docs. Construct through [`CoverTree::kl_div_dirichlet`].
#[derive(Debug)]
pub struct BayesCategoricalTracker {
    tree: CoverTree,
    prior_weight: f64,
    observation_weight: f64,
    window_size: usize,
    evidence: Vec<Option<NodeEvidence>>,
    touched: Vec<NodeId>,
    window: VecDeque<Vec<(NodeId, usize)>>,
    total_pushes: usize,
}

impl BayesCategoricalTracker {
    pub(crate) fn new(
        tree: CoverTree,
        prior_weight: f64,
        observation_weight: f64,
        window_size: usize,
    ) -> BayesCategoricalTracker {
        let node_count = tree.arena().len();
        BayesCategoricalTracker {
            tree,
            prior_weight,
            observation_weight,
            window_size,
            evidence: vec![None; node_count],
            touched: Vec::new(),
            window: VecDeque::new(),
            total_pushes: 0,
        }
    }

    pub fn tree(&self) -> &CoverTree {
        &self.tree
    }

    pub fn prior_weight(&self) -> f64 {
        self.prior_weight
    }

    pub fn observation_weight(&self) -> f64 {
        self.observation_weight
    }

    /// Zero means the window is unbounded.
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Routes the point through the tree, adds its path to the evidence,
    /// and retracts the oldest path once the window overflows.
    pub fn push(&mut self, point: &[f32]) -> TreeResult<()> {
        let path = self.tracked_path(point)?;
        for &(id, bucket) in &path {
            self.add_observation(id, bucket, self.observation_weight);
        }
        self.total_pushes += 1;
        if self.window_size > 0 {
            self.window.push_back(path);
            if self.window.len() > self.window_size {
                let oldest = self.window.pop_front().expect("window was nonempty");
                for &(id, bucket) in &oldest {
                    self.add_observation(id, bucket, -self.observation_weight);
                }
            }
        }
        Ok(())
    }

    /// The path of a point as `(node id, chosen bucket)` pairs: the bucket
    /// of the child descended into at each routing node, and the singleton
    /// bucket at the terminal leaf.
    fn tracked_path(&self, point: &[f32]) -> TreeResult<Vec<(NodeId, usize)>> {
        let path = self.tree.path(point)?;
        let arena = self.tree.arena();
        let mut out = Vec::with_capacity(path.len());
        for pair in path.windows(2) {
            let (_, addr) = pair[0];
            let (_, next) = pair[1];
            let id = arena.id_of(addr).expect("path node exists");
            let bucket = arena
                .node(id)
                .child_addresses()
                .position(|a| a == next)
                .expect("path follows stored children")
                + 1;
            out.push((id, bucket));
        }
        if let Some(&(_, last)) = path.last() {
            if self.tree.use_singletons() {
                out.push((arena.id_of(last).expect("path node exists"), 0));
            }
        }
        Ok(out)
    }

    fn add_observation(&mut self, id: NodeId, bucket: usize, weight: f64) {
        let prior = Self::node_prior(&self.tree, self.prior_weight, id);
        let cell = match &mut self.evidence[id] {
            Some(cell) => cell,
            slot => {
                self.touched.push(id);
                slot.insert(NodeEvidence {
                    observations: vec![0.0; prior.len()],
                    total: 0.0,
                    kl: 0.0,
                })
            }
        };
        cell.observations[bucket] += weight;
        cell.total = cell.observations.iter().sum();
        if cell.total <= EVIDENCE_FLOOR {
            // Fully retracted; snap float residue to a clean empty state.
            cell.observations.iter_mut().for_each(|o| *o = 0.0);
            cell.total = 0.0;
            cell.kl = 0.0;
        } else {
            cell.kl = dirichlet_kl(&prior, &cell.observations);
        }
    }

    /// The Dirichlet prior at one node: `prior_weight` times the
    /// training-time mass of each bucket.
    fn node_prior(tree: &CoverTree, prior_weight: f64, id: NodeId) -> Vec<f64> {
        let arena = tree.arena();
        let node = arena.node(id);
        let singleton_mass = if tree.use_singletons() {
            node.singleton_len() as f64
        } else {
            0.0
        };
        let mut prior = Vec::with_capacity(node.children_len() + 1);
        prior.push(prior_weight * singleton_mass);
        for addr in node.child_addresses() {
            let cid = arena.id_of(addr).expect("child exists");
            prior.push(prior_weight * arena.node(cid).coverage_count() as f64);
        }
        prior
    }

    /// Summary statistics over all nodes with nonzero evidence.
    pub fn stats(&self) -> TrackerStats {
        let mut stats = TrackerStats {
            max: f64::NEG_INFINITY,
            min: f64::INFINITY,
            ..TrackerStats::default()
        };
        for &id in &self.touched {
            let Some(cell) = &self.evidence[id] else { continue };
            if cell.total <= EVIDENCE_FLOOR {
                continue;
            }
            stats.nz_count += 1;
            stats.moment1_nz += cell.kl;
            stats.moment2_nz += cell.kl * cell.kl;
            stats.max = stats.max.max(cell.kl);
            stats.min = stats.min.min(cell.kl);
        }
        if stats.nz_count == 0 {
            stats.max = 0.0;
            stats.min = 0.0;
        }
        stats.sequence_len = if self.window_size > 0 {
            self.window.len()
        } else {
            self.total_pushes
        };
        stats
    }

    /// The observation vector accumulated at an address, if any.
    pub fn evidence(&self, address: NodeAddress) -> Option<&[f64]> {
        let id = self.tree.arena().id_of(address)?;
        self.evidence[id]
            .as_ref()
            .map(|cell| cell.observations.as_slice())
    }

    /// Posterior bucket probabilities at an address: the normalized
    /// concentration vector, evidence included if any has arrived.
    pub fn marginal_posterior_probs(&self, address: NodeAddress) -> Option<Vec<f64>> {
        let id = self.tree.arena().id_of(address)?;
        let mut alphas = Self::node_prior(&self.tree, self.prior_weight, id);
        if let Some(cell) = &self.evidence[id] {
            for (a, &o) in alphas.iter_mut().zip(cell.observations.iter()) {
                *a += o;
            }
        }
        for a in alphas.iter_mut() {
            *a = a.max(ALPHA_CLAMP);
        }
        let total: f64 = alphas.iter().sum();
        Some(alphas.into_iter().map(|a| a / total).collect())
    }

    /// Every nonzero-evidence node's KL, paired with its address.
    pub fn all_kl(&self) -> Vec<(f64, NodeAddress)> {
        self.touched
            .iter()
            .filter_map(|&id| {
                let cell = self.evidence[id].as_ref()?;
                if cell.total <= EVIDENCE_FLOOR {
                    return None;
                }
                Some((cell.kl, self.tree.arena().node(id).address()))
            })
            .collect()
    }
}

/// Closed-form KL(posterior ‖ prior) between Dirichlets, where
/// `posterior_k = prior_k + observations_k`. Concentrations are clamped to
/// [`ALPHA_CLAMP`] before `lnGamma` and digamma.
fn dirichlet_kl(prior: &[f64], observations: &[f64]) -> f64 {
    let clamped: Vec<(f64, f64)> = prior
        .iter()
        .zip(observations.iter())
        .map(|(&a, &o)| (a.max(ALPHA_CLAMP), (a + o).max(ALPHA_CLAMP)))
        .collect();
    let prior_total: f64 = clamped.iter().map(|&(a, _)| a).sum();
    let post_total: f64 = clamped.iter().map(|&(_, ap)| ap).sum();

    let mut kl = ln_gamma(post_total) - ln_gamma(prior_total);
    let psi_post_total = digamma(post_total);
    for &(a, ap) in &clamped {
        kl -= ln_gamma(ap) - ln_gamma(a);
        kl += (ap - a) * (digamma(ap) - psi_post_total);
    }
    kl.max(0.0)
}
