//! Parallel top-down cover tree construction.
//!
//! The builder descends from a single root covering the whole point set,
//! splitting each node into a nested self-child plus farthest-first elected
//! children at the next finer scale. Sibling subtrees share nothing, so each
//! split fans its children out over the rayon pool; every task returns its
//! subtree as a local node buffer and parents concatenate the buffers in
//! child order, which keeps node ids and addresses identical across runs
//! and thread counts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;

use crate::arena::NodeArena;
use crate::config::TreeConfig;
use crate::errors::{TreeError, TreeResult};
use crate::helpers;
use crate::labels::{LabelSummary, LabelTable};
use crate::node::CoverNode;
use crate::point_store::PointStore;
use crate::tree::{CoverTree, TreeParams};
use crate::{NodeAddress, NodeId, PointIndex, ScaleIndex};

/// Cooperative cancellation flag for long-running operations. Cloning
/// shares the flag; `cancel` may be called from any thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Constructs [`CoverTree`]s. Chain `with_*` calls and finish with `build`.
#[derive(Debug, Clone)]
pub struct CoverTreeBuilder {
    scale_base: f32,
    leaf_cutoff: usize,
    min_res_index: ScaleIndex,
    use_singletons: bool,
    verbosity: u8,
    cancel: CancelToken,
}

impl Default for CoverTreeBuilder {
    fn default() -> Self {
        CoverTreeBuilder {
            scale_base: 2.0,
            leaf_cutoff: 0,
            min_res_index: -30,
            use_singletons: true,
            verbosity: 0,
            cancel: CancelToken::new(),
        }
    }
}

impl CoverTreeBuilder {
    pub fn new() -> CoverTreeBuilder {
        CoverTreeBuilder::default()
    }

    pub fn from_config(config: &TreeConfig) -> CoverTreeBuilder {
        CoverTreeBuilder {
            scale_base: config.scale_base,
            leaf_cutoff: config.leaf_cutoff as usize,
            min_res_index: config.min_res_index,
            use_singletons: config.use_singletons,
            verbosity: config.verbosity,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_scale_base(mut self, scale_base: f32) -> Self {
        self.scale_base = scale_base;
        self
    }

    pub fn with_leaf_cutoff(mut self, leaf_cutoff: usize) -> Self {
        self.leaf_cutoff = leaf_cutoff;
        self
    }

    pub fn with_min_res_index(mut self, min_res_index: ScaleIndex) -> Self {
        self.min_res_index = min_res_index;
        self
    }

    pub fn with_use_singletons(mut self, use_singletons: bool) -> Self {
        self.use_singletons = use_singletons;
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Builds the tree over the given store, consuming both. Labels, when
    /// present, must have one row per point; their per-node summaries are
    /// folded in during finalization.
    pub fn build(
        &self,
        store: PointStore,
        labels: Option<LabelTable>,
    ) -> TreeResult<CoverTree> {
        if !(self.scale_base > 1.0) || !self.scale_base.is_finite() {
            return Err(TreeError::InvalidConfig(format!(
                "scale_base must be a finite number > 1, got {}",
                self.scale_base
            )));
        }
        if store.is_empty() {
            return Err(TreeError::EmptyTree);
        }
        if let Some(table) = &labels {
            if table.len() != store.len() {
                return Err(TreeError::InvalidConfig(format!(
                    "labels table has {} rows for {} points",
                    table.len(),
                    store.len()
                )));
            }
        }
        store.validate_finite()?;

        let root_center: PointIndex = 0;
        let others: Vec<PointIndex> = (1..store.len()).collect();
        let dists = store.distances_to_point_index(root_center, &others)?;
        let r_max = dists.iter().cloned().fold(0.0, f32::max);

        let nodes = if r_max == 0.0 {
            // Degenerate set: every point coincides with the center.
            let mut root = CoverNode::new((self.min_res_index, root_center), None);
            root.insert_singletons(others);
            vec![root]
        } else {
            let top_si = r_max.log(self.scale_base).ceil() as ScaleIndex;
            let covered = Covered {
                center: root_center,
                points: others,
                dists,
            };
            self.build_subtree(&store, top_si, covered, None)?
        };

        let mut arena = NodeArena::from_nodes(nodes);
        let point_to_leaf = finalize(&mut arena, &store, labels.as_ref())?;
        info!(
            "built cover tree: {} nodes over {} points, scales {}..={}",
            arena.len(),
            store.len(),
            arena.bottom_scale(),
            arena.top_scale()
        );

        Ok(CoverTree::assemble(
            store,
            arena,
            labels,
            point_to_leaf,
            TreeParams {
                scale_base: self.scale_base,
                leaf_cutoff: self.leaf_cutoff,
                min_res_index: self.min_res_index,
                use_singletons: self.use_singletons,
            },
        ))
    }

    /// Builds the node at `(si, covered.center)` and everything beneath it,
    /// returned in depth-first pre-order with the node itself first.
    fn build_subtree(
        &self,
        store: &PointStore,
        si: ScaleIndex,
        covered: Covered,
        parent: Option<NodeAddress>,
    ) -> TreeResult<Vec<CoverNode>> {
        if self.cancel.is_cancelled() {
            return Err(TreeError::Cancelled);
        }

        let address = (si, covered.center);
        let mut node = CoverNode::new(address, parent);
        node.set_radius(covered.dists.iter().cloned().fold(0.0, f32::max));

        if covered.points.len() <= self.leaf_cutoff || si <= self.min_res_index {
            node.insert_singletons(covered.points);
            return Ok(vec![node]);
        }

        let child_si = si - 1;
        let child_radius = self.scale_base.powi(child_si);
        let (child_centers, buckets) = self.elect_and_partition(store, covered, child_radius)?;

        node.set_children(
            child_si,
            child_centers.iter().map(|&c| (child_si, c)).collect(),
        );
        if self.verbosity >= 2 {
            debug!(
                "split ({}, {}) into {} children",
                si,
                address.1,
                child_centers.len() + 1
            );
        }

        let subtrees = buckets
            .into_par_iter()
            .map(|bucket| self.build_subtree(store, child_si, bucket, Some(address)))
            .collect::<TreeResult<Vec<_>>>()?;

        let mut nodes = vec![node];
        for subtree in subtrees {
            nodes.extend(subtree);
        }
        Ok(nodes)
    }

    /// Farthest-first child election followed by nearest-center assignment.
    ///
    /// While any covered point sits farther than `child_radius` from every
    /// elected center, the farthest such point (ties to the lowest index,
    /// since covered points stay in ascending index order) becomes a new
    /// center. Election order fixes the children's bucket order; the
    /// returned buckets lead with the self bucket.
    fn elect_and_partition(
        &self,
        store: &PointStore,
        covered: Covered,
        child_radius: f32,
    ) -> TreeResult<(Vec<PointIndex>, Vec<Covered>)> {
        let n = covered.points.len();
        let mut nearest_dist: Vec<f32> = covered.dists;
        let mut nearest_center: Vec<PointIndex> = vec![covered.center; n];
        let mut is_center = vec![false; n];
        let mut child_centers: Vec<PointIndex> = Vec::new();

        loop {
            let (slot, d) = helpers::arg_max(&nearest_dist);
            if d <= child_radius {
                break;
            }
            let center = covered.points[slot];
            is_center[slot] = true;
            // Elected slots drop out of the farthest scan.
            nearest_dist[slot] = f32::NEG_INFINITY;
            child_centers.push(center);
            let dists = store.distances_to_point_index(center, &covered.points)?;
            for (slot2, &d2) in dists.iter().enumerate() {
                if is_center[slot2] {
                    continue;
                }
                if d2 < nearest_dist[slot2]
                    || (d2 == nearest_dist[slot2] && center < nearest_center[slot2])
                {
                    nearest_dist[slot2] = d2;
                    nearest_center[slot2] = center;
                }
            }
        }

        let mut bucket_of: HashMap<PointIndex, usize> = child_centers
            .iter()
            .enumerate()
            .map(|(j, &c)| (c, j + 1))
            .collect();
        bucket_of.insert(covered.center, 0);

        let mut buckets: Vec<Covered> = std::iter::once(covered.center)
            .chain(child_centers.iter().copied())
            .map(Covered::empty)
            .collect();
        for slot in 0..n {
            if is_center[slot] {
                continue;
            }
            let bucket = &mut buckets[bucket_of[&nearest_center[slot]]];
            bucket.points.push(covered.points[slot]);
            bucket.dists.push(nearest_dist[slot]);
        }

        Ok((child_centers, buckets))
    }
}

/// A center and the points it covers, with their distances to it.
struct Covered {
    center: PointIndex,
    points: Vec<PointIndex>,
    dists: Vec<f32>,
}

impl Covered {
    fn empty(center: PointIndex) -> Covered {
        Covered {
            center,
            points: Vec::new(),
            dists: Vec::new(),
        }
    }
}

fn add_point(sum: &mut [f64], point: &[f32]) {
    for (s, &v) in sum.iter_mut().zip(point) {
        *s += v as f64;
    }
}

/// Bottom-up pass over the committed arena: coverage counts, cover means,
/// label summaries, and the point-to-leaf registry backing `known_path`.
/// Ids are depth-first pre-order, so a reverse scan sees children first.
fn finalize(
    arena: &mut NodeArena,
    store: &PointStore,
    labels: Option<&LabelTable>,
) -> TreeResult<Vec<NodeId>> {
    let n_nodes = arena.len();
    let dim = store.dim();

    let child_ids: Vec<Vec<NodeId>> = (0..n_nodes)
        .map(|id| {
            arena
                .node(id)
                .child_addresses()
                .map(|addr| arena.id_of(addr).expect("child address was committed"))
                .collect()
        })
        .collect();

    let mut coverage = vec![0usize; n_nodes];
    let mut sums: Vec<Vec<f64>> = vec![Vec::new(); n_nodes];
    let mut means: Vec<Vec<f32>> = vec![Vec::new(); n_nodes];
    let mut summaries: Vec<Option<LabelSummary>> = vec![None; n_nodes];
    let mut point_to_leaf = vec![usize::MAX; store.len()];

    for id in (0..n_nodes).rev() {
        let node = arena.node(id);
        for &pi in node.singletons() {
            point_to_leaf[pi] = id;
        }
        if node.is_leaf() {
            point_to_leaf[node.center_index()] = id;
        }

        let mut count = node.singleton_len();
        let mut sum = vec![0.0f64; dim];
        if node.is_leaf() {
            count += 1;
            add_point(&mut sum, store.point(node.center_index())?);
        }
        for &pi in node.singletons() {
            add_point(&mut sum, store.point(pi)?);
        }
        for &cid in &child_ids[id] {
            count += coverage[cid];
            // The child's f32 mean is already extracted, so its running sum
            // can be surrendered to the parent.
            let child_sum = std::mem::take(&mut sums[cid]);
            add_point_sums(&mut sum, &child_sum);
        }
        coverage[id] = count;
        means[id] = sum.iter().map(|&s| (s / count as f64) as f32).collect();
        sums[id] = sum;

        if let Some(table) = labels {
            let mut summary = if node.is_leaf() {
                table.summarize(
                    std::iter::once(node.center_index()).chain(node.singletons().iter().copied()),
                )
            } else {
                table.summarize(node.singletons().iter().copied())
            };
            for &cid in &child_ids[id] {
                summary.merge(summaries[cid].as_ref().expect("children finalized first"));
            }
            summaries[id] = Some(summary);
        }
    }
    debug_assert_eq!(coverage[arena.root_id()], store.len());
    debug_assert!(point_to_leaf.iter().all(|&id| id != usize::MAX));

    drop(sums);
    for id in 0..n_nodes {
        let node = arena.node_mut(id);
        node.set_coverage_count(coverage[id]);
        node.set_cover_mean(std::mem::take(&mut means[id]));
        if let Some(summary) = summaries[id].take() {
            node.set_label_summary(summary);
        }
    }

    Ok(point_to_leaf)
}

fn add_point_sums(sum: &mut [f64], other: &[f64]) {
    for (s, &v) in sum.iter_mut().zip(other) {
        *s += v;
    }
}
