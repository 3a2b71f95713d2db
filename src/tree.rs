//! The queryable cover tree: an immutable arena plus its point store behind
//! a cheaply-clonable shared handle. Every query descends with the routing
//! rule, from a node to the child whose center is nearest the query; k-NN
//! additionally keeps a pruned frontier of unvisited nodes. Trackers hold a
//! clone of the handle, so a tracker can never outlive its tree.

use std::collections::BinaryHeap;
use std::sync::{Arc, OnceLock};

use rand::Rng;

use crate::arena::NodeArena;
use crate::baseline::DirichletBaseline;
use crate::builder::{CancelToken, CoverTreeBuilder};
use crate::config::TreeConfig;
use crate::constants::DEFAULT_SEED;
use crate::errors::{TreeError, TreeResult};
use crate::helpers;
use crate::labels::{LabelRecord, LabelTable};
use crate::node::CoverNode;
use crate::point_store::PointStore;
use crate::query_heap::{KnnQueryHeap, QueryAddress};
use crate::tracker::BayesCategoricalTracker;
use crate::{NodeAddress, NodeId, PointIndex, ScaleIndex};

/// Construction parameters the tree carries for its lifetime.
#[derive(Debug, Clone)]
pub(crate) struct TreeParams {
    pub scale_base: f32,
    pub leaf_cutoff: usize,
    pub min_res_index: ScaleIndex,
    pub use_singletons: bool,
}

#[derive(Debug)]
struct TreeInner {
    store: PointStore,
    arena: NodeArena,
    labels: Option<LabelTable>,
    point_to_leaf: Vec<NodeId>,
    params: TreeParams,
    svds: OnceLock<Vec<Vec<f32>>>,
}

/// An immutable cover tree over a point store. Clones share the tree.
#[derive(Clone)]
pub struct CoverTree {
    inner: Arc<TreeInner>,
}

impl std::fmt::Debug for CoverTree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CoverTree")
            .field("points", &self.len())
            .field("dim", &self.dim())
            .field("nodes", &self.node_count())
            .field("scales", &(self.bottom_scale()..=self.top_scale()))
            .finish()
    }
}

impl CoverTree {
    pub(crate) fn assemble(
        store: PointStore,
        arena: NodeArena,
        labels: Option<LabelTable>,
        point_to_leaf: Vec<NodeId>,
        params: TreeParams,
    ) -> CoverTree {
        CoverTree {
            inner: Arc::new(TreeInner {
                store,
                arena,
                labels,
                point_to_leaf,
                params,
                svds: OnceLock::new(),
            }),
        }
    }

    /// Builds a tree from a configuration document: opens the data file,
    /// reads the labels table when configured, and runs the builder.
    pub fn from_config(config: &TreeConfig) -> TreeResult<CoverTree> {
        config.validate()?;
        let data_path = config.data_path.as_ref().ok_or_else(|| {
            TreeError::InvalidConfig("data_path is required to build from a config".into())
        })?;
        let store = PointStore::from_flat_file(
            data_path,
            config.count.unwrap_or(0) as usize,
            config.data_dim.unwrap_or(0) as usize,
            config.in_ram,
        )?;
        let labels = match (&config.labels_path, &config.schema) {
            (Some(path), Some(schema)) => Some(LabelTable::from_csv(path, schema, store.len())?),
            _ => None,
        };
        CoverTreeBuilder::from_config(config).build(store, labels)
    }

    pub(crate) fn arena(&self) -> &NodeArena {
        &self.inner.arena
    }

    pub(crate) fn scale_radius(&self, si: ScaleIndex) -> f32 {
        self.inner.params.scale_base.powi(si)
    }

    pub(crate) fn use_singletons(&self) -> bool {
        self.inner.params.use_singletons
    }

    /// Number of points in the store.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Point dimension.
    pub fn dim(&self) -> usize {
        self.inner.store.dim()
    }

    pub fn node_count(&self) -> usize {
        self.inner.arena.len()
    }

    pub fn scale_base(&self) -> f32 {
        self.inner.params.scale_base
    }

    pub fn leaf_cutoff(&self) -> usize {
        self.inner.params.leaf_cutoff
    }

    pub fn min_res_index(&self) -> ScaleIndex {
        self.inner.params.min_res_index
    }

    /// A view of a stored point.
    pub fn data_point(&self, pi: PointIndex) -> TreeResult<&[f32]> {
        self.inner.store.point(pi)
    }

    pub fn root_address(&self) -> NodeAddress {
        self.inner.arena.root().address()
    }

    /// Coarsest scale in the tree, the root's.
    pub fn top_scale(&self) -> ScaleIndex {
        self.inner.arena.top_scale()
    }

    /// Finest scale any node reaches.
    pub fn bottom_scale(&self) -> ScaleIndex {
        self.inner.arena.bottom_scale()
    }

    /// The node at the given address.
    pub fn node(&self, address: NodeAddress) -> TreeResult<&CoverNode> {
        self.inner
            .arena
            .get(address)
            .ok_or(TreeError::AddressNotFound(address))
    }

    /// The layer of nodes at one scale index.
    pub fn layer(&self, si: ScaleIndex) -> TreeResult<Layer<'_>> {
        let ids = self
            .inner
            .arena
            .layer_ids(si)
            .ok_or(TreeError::AddressNotFound((si, 0)))?;
        Ok(Layer {
            si,
            arena: &self.inner.arena,
            ids,
        })
    }

    /// All layers, coarsest first.
    pub fn layers(&self) -> impl Iterator<Item = Layer<'_>> {
        let arena = &self.inner.arena;
        arena.scales().map(move |si| Layer {
            si,
            arena,
            ids: arena.layer_ids(si).expect("scale came from the arena"),
        })
    }

    /// The k nearest stored points to the query, nearest first.
    pub fn knn(&self, query: &[f32], k: usize) -> TreeResult<Vec<(f32, PointIndex)>> {
        self.knn_impl(query, k, true)
    }

    /// Like [`CoverTree::knn`] but only node centers are candidates, giving
    /// representative rather than exact neighbors.
    pub fn routing_knn(&self, query: &[f32], k: usize) -> TreeResult<Vec<(f32, PointIndex)>> {
        self.knn_impl(query, k, false)
    }

    fn knn_impl(
        &self,
        query: &[f32],
        k: usize,
        include_singletons: bool,
    ) -> TreeResult<Vec<(f32, PointIndex)>> {
        let inner = &*self.inner;
        inner.store.check_dim(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let arena = &inner.arena;
        let root = arena.root();
        let root_dist = inner
            .store
            .metric()
            .one_to_one(query, inner.store.point(root.center_index())?);

        let mut results = KnnQueryHeap::new(k);
        results.push(root_dist, root.center_index());

        let mut frontier = BinaryHeap::new();
        frontier.push(QueryAddress {
            min_dist: (root_dist - self.scale_radius(root.scale_index())).max(0.0),
            dist_to_center: root_dist,
            id: arena.root_id(),
        });

        while let Some(entry) = frontier.pop() {
            // The frontier is ordered by achievable distance, so the first
            // entry that cannot beat the current k-th ends the search.
            if entry.min_dist >= results.bound() {
                break;
            }
            let node = arena.node(entry.id);

            if include_singletons && node.singleton_len() > 0 {
                let dists = inner.store.distances_to_point(query, node.singletons())?;
                for (&pi, &d) in node.singletons().iter().zip(dists.iter()) {
                    results.push(d, pi);
                }
            }

            if let Some((nested_scale, addresses)) = node.children() {
                let child_bound = self.scale_radius(nested_scale);
                let nested_id = arena
                    .id_of((nested_scale, node.center_index()))
                    .expect("nested child was committed");
                // The nested child shares this center; its distance is known.
                frontier.push(QueryAddress {
                    min_dist: (entry.dist_to_center - child_bound).max(0.0),
                    dist_to_center: entry.dist_to_center,
                    id: nested_id,
                });
                for &(csi, cpi) in addresses {
                    let d = inner
                        .store
                        .metric()
                        .one_to_one(query, inner.store.point(cpi)?);
                    // A center joins the candidates once, on discovery.
                    results.push(d, cpi);
                    frontier.push(QueryAddress {
                        min_dist: (d - child_bound).max(0.0),
                        dist_to_center: d,
                        id: arena.id_of((csi, cpi)).expect("child was committed"),
                    });
                }
            }
        }

        Ok(results.unpack())
    }

    /// The routing descent for a query: the visited `(distance_to_center,
    /// address)` pairs from the root down to a leaf.
    pub fn path(&self, query: &[f32]) -> TreeResult<Vec<(f32, NodeAddress)>> {
        let inner = &*self.inner;
        inner.store.check_dim(query)?;
        let arena = &inner.arena;

        let mut id = arena.root_id();
        let mut dist = inner
            .store
            .metric()
            .one_to_one(query, inner.store.point(arena.root().center_index())?);
        let mut out = Vec::new();
        loop {
            let node = arena.node(id);
            out.push((dist, node.address()));
            let Some((nested_scale, addresses)) = node.children() else {
                break;
            };
            let mut best_addr = (nested_scale, node.center_index());
            let mut best_dist = dist;
            for &(csi, cpi) in addresses {
                let d = inner
                    .store
                    .metric()
                    .one_to_one(query, inner.store.point(cpi)?);
                if d < best_dist || (d == best_dist && cpi < best_addr.1) {
                    best_dist = d;
                    best_addr = (csi, cpi);
                }
            }
            id = arena.id_of(best_addr).expect("child was committed");
            dist = best_dist;
        }
        Ok(out)
    }

    /// The path of a point already in the store, following the stored
    /// lineage instead of re-routing; only on-path center distances are
    /// computed.
    pub fn known_path(&self, pi: PointIndex) -> TreeResult<Vec<(f32, NodeAddress)>> {
        let inner = &*self.inner;
        let leaf_id = *inner
            .point_to_leaf
            .get(pi)
            .ok_or_else(|| TreeError::InvalidPoint(format!("no point with index {pi}")))?;

        let mut addresses = Vec::new();
        let mut node = inner.arena.node(leaf_id);
        loop {
            addresses.push(node.address());
            match node.parent() {
                Some(parent) => {
                    node = inner
                        .arena
                        .get(parent)
                        .expect("parent address was committed");
                }
                None => break,
            }
        }
        addresses.reverse();

        let point = inner.store.point(pi)?;
        addresses
            .into_iter()
            .map(|addr| {
                let d = inner
                    .store
                    .metric()
                    .one_to_one(point, inner.store.point(addr.1)?);
                Ok((d, addr))
            })
            .collect()
    }

    /// Computes and caches per-node singular values; see [`crate::svd`].
    /// Later calls are no-ops.
    pub fn attach_svds(&self, k: usize, sample_cap: usize, reg: f64) -> TreeResult<()> {
        if self.inner.svds.get().is_some() {
            return Ok(());
        }
        let table = crate::svd::singular_value_table(self, k, sample_cap, reg)?;
        let _ = self.inner.svds.set(table);
        Ok(())
    }

    /// The top singular values attached to a node, if `attach_svds` ran and
    /// the node had enough singleton rows.
    pub fn singular_values(&self, address: NodeAddress) -> TreeResult<Option<&[f32]>> {
        let id = self
            .inner
            .arena
            .id_of(address)
            .ok_or(TreeError::AddressNotFound(address))?;
        Ok(self
            .inner
            .svds
            .get()
            .and_then(|table| table.get(id))
            .filter(|values| !values.is_empty())
            .map(|values| values.as_slice()))
    }

    /// Draws a synthetic point from the tree as a generative model: descend
    /// by coverage mass, then draw from a per-dimension Gaussian fit to the
    /// terminal leaf's covered points. The label is the leaf center's label
    /// row, when a labels table is attached.
    pub fn sample(&self) -> TreeResult<(Vec<f32>, Option<LabelRecord>)> {
        let inner = &*self.inner;
        let arena = &inner.arena;
        let mut rng = rand::thread_rng();

        let mut id = arena.root_id();
        loop {
            let node = arena.node(id);
            let Some(_) = node.children() else { break };
            let buckets: Vec<(Option<NodeId>, f64)> = std::iter::once((
                None,
                node.singleton_len() as f64,
            ))
            .chain(node.child_addresses().map(|addr| {
                let cid = arena.id_of(addr).expect("child was committed");
                (Some(cid), arena.node(cid).coverage_count() as f64)
            }))
            .collect();
            let total: f64 = buckets.iter().map(|(_, mass)| mass).sum();
            let mut draw = rng.gen_range(0.0..total);
            let mut chosen = None;
            for (bucket, mass) in buckets {
                if draw < mass {
                    chosen = bucket;
                    break;
                }
                draw -= mass;
            }
            match chosen {
                Some(cid) => id = cid,
                // The singleton bucket terminates the descent here.
                None => break,
            }
        }

        let node = arena.node(id);
        let indices: Vec<PointIndex> = if node.is_leaf() {
            std::iter::once(node.center_index())
                .chain(node.singletons().iter().copied())
                .collect()
        } else {
            node.singletons().to_vec()
        };

        let dim = inner.store.dim();
        let mut mean = vec![0.0f64; dim];
        for &pi in &indices {
            for (m, &v) in mean.iter_mut().zip(inner.store.point(pi)?) {
                *m += v as f64;
            }
        }
        for m in mean.iter_mut() {
            *m /= indices.len() as f64;
        }
        let mut var = vec![0.0f64; dim];
        for &pi in &indices {
            for ((v, &m), &x) in var.iter_mut().zip(mean.iter()).zip(inner.store.point(pi)?) {
                let d = x as f64 - m;
                *v += d * d;
            }
        }
        let sample: Vec<f32> = mean
            .iter()
            .zip(var.iter())
            .map(|(&m, &v)| {
                let std = (v / indices.len() as f64).sqrt();
                helpers::normal_draw(&mut rng, m, std) as f32
            })
            .collect();

        let label = inner
            .labels
            .as_ref()
            .and_then(|table| table.record(node.center_index()));
        Ok((sample, label))
    }

    /// A fresh sliding-window Dirichlet-categorical drift tracker over this
    /// tree. `window_size == 0` tracks an unbounded window.
    pub fn kl_div_dirichlet(
        &self,
        prior_weight: f64,
        observation_weight: f64,
        window_size: usize,
    ) -> BayesCategoricalTracker {
        BayesCategoricalTracker::new(self.clone(), prior_weight, observation_weight, window_size)
    }

    /// Monte-Carlo baseline for the tracker's summary statistics over
    /// in-distribution streams; see [`DirichletBaseline`].
    pub fn kl_div_dirichlet_baseline(
        &self,
        prior_weight: f64,
        observation_weight: f64,
        window_size: usize,
        sequence_count: usize,
        sample_rate: usize,
    ) -> TreeResult<DirichletBaseline> {
        DirichletBaseline::generate(
            self,
            prior_weight,
            observation_weight,
            window_size,
            sequence_count,
            sample_rate,
            DEFAULT_SEED,
            None,
        )
    }

    /// [`CoverTree::kl_div_dirichlet_baseline`] with an explicit seed and an
    /// optional cancellation token.
    pub fn kl_div_dirichlet_baseline_seeded(
        &self,
        prior_weight: f64,
        observation_weight: f64,
        window_size: usize,
        sequence_count: usize,
        sample_rate: usize,
        seed: u64,
        cancel: Option<&CancelToken>,
    ) -> TreeResult<DirichletBaseline> {
        DirichletBaseline::generate(
            self,
            prior_weight,
            observation_weight,
            window_size,
            sequence_count,
            sample_rate,
            seed,
            cancel,
        )
    }
}

/// All nodes at one scale index. Iteration order within a layer is
/// unspecified.
#[derive(Clone, Copy)]
pub struct Layer<'a> {
    si: ScaleIndex,
    arena: &'a NodeArena,
    ids: &'a [NodeId],
}

impl<'a> Layer<'a> {
    pub fn scale_index(&self) -> ScaleIndex {
        self.si
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &'a CoverNode> + 'a {
        let arena = self.arena;
        self.ids.iter().map(move |&id| arena.node(id))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::Write;

    use float_cmp::approx_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use crate::builder::CoverTreeBuilder;
    use crate::metric::Metric;
    use crate::metric::L2;

    use super::*;

    fn line_tree() -> CoverTree {
        let store =
            PointStore::from_ram(vec![0.499, 0.48, -0.49, 0.0], 1).unwrap();
        CoverTreeBuilder::new()
            .with_scale_base(2.0)
            .with_leaf_cutoff(0)
            .build(store, None)
            .unwrap()
    }

    fn random_tree(count: usize, dim: usize, seed: u64, leaf_cutoff: usize) -> CoverTree {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let data: Vec<f32> = (0..count * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let store = PointStore::from_ram(data, dim).unwrap();
        CoverTreeBuilder::new()
            .with_scale_base(1.4)
            .with_leaf_cutoff(leaf_cutoff)
            .build(store, None)
            .unwrap()
    }

    fn brute_knn(tree: &CoverTree, query: &[f32], k: usize) -> Vec<(f32, PointIndex)> {
        let metric = L2;
        let mut all: Vec<(f32, PointIndex)> = (0..tree.len())
            .map(|pi| (metric.one_to_one(query, tree.data_point(pi).unwrap()), pi))
            .collect();
        all.sort_by(|a, b| a.partial_cmp(b).unwrap());
        all.truncate(k);
        all
    }

    #[test]
    fn four_point_line_scenario() {
        let tree = line_tree();
        assert_eq!(tree.root_address(), (0, 0));
        assert_eq!(tree.top_scale(), 0);

        let nearest = tree.knn(&[0.499], 1).unwrap();
        assert_eq!(nearest, vec![(0.0, 0)]);

        let two = tree.knn(&[0.499], 2).unwrap();
        assert_eq!(two[0], (0.0, 0));
        assert_eq!(two[1].1, 1);
        assert!(approx_eq!(f32, two[1].0, 0.019, epsilon = 1e-6));

        // The chain bottoms out with each point as its own leaf center.
        for pi in 0..4 {
            let path = tree.known_path(pi).unwrap();
            let &(_, terminal) = path.last().unwrap();
            let node = tree.node(terminal).unwrap();
            assert!(node.is_leaf());
            assert_eq!(node.center_index(), pi);
        }
    }

    #[test]
    fn knn_contains_self() {
        let tree = random_tree(120, 3, 41, 4);
        for pi in 0..tree.len() {
            let point = tree.data_point(pi).unwrap().to_vec();
            let hits = tree.knn(&point, 1).unwrap();
            assert_eq!(hits[0].1, pi);
            assert!(approx_eq!(f32, hits[0].0, 0.0));
        }
    }

    #[test]
    fn knn_agrees_with_brute_force() {
        let tree = random_tree(300, 3, 29, 5);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..25 {
            let query: Vec<f32> = (0..3).map(|_| rng.gen_range(-1.2..1.2)).collect();
            let expected = brute_knn(&tree, &query, 10);
            let got = tree.knn(&query, 10).unwrap();
            for ((ed, ei), (gd, gi)) in expected.iter().zip(got.iter()) {
                assert!(approx_eq!(f32, *ed, *gd, epsilon = 1e-5));
                // Equal distances may legally order differently.
                if (ed - gd).abs() < 1e-9 && ei != gi {
                    continue;
                }
                assert_eq!(ei, gi);
            }
        }
    }

    #[test]
    fn routing_knn_returns_centers_only() {
        let tree = random_tree(200, 2, 31, 8);
        let centers: HashSet<PointIndex> = tree
            .layers()
            .flat_map(|layer| layer.nodes().map(|n| n.center_index()).collect::<Vec<_>>())
            .collect();

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..10 {
            let query: Vec<f32> = (0..2).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let routed = tree.routing_knn(&query, 5).unwrap();
            assert!(!routed.is_empty());
            for (_, pi) in &routed {
                assert!(centers.contains(pi), "{pi} is not a routing center");
            }
            // The nearest center is found exactly.
            let metric = L2;
            let best = centers
                .iter()
                .map(|&pi| {
                    let d = metric.one_to_one(&query, tree.data_point(pi).unwrap());
                    (d, pi)
                })
                .min_by(|a, b| a.partial_cmp(b).unwrap())
                .unwrap();
            assert!(approx_eq!(f32, routed[0].0, best.0, epsilon = 1e-6));
        }
    }

    #[test]
    fn path_distances_change_within_scale() {
        let tree = random_tree(200, 3, 53, 4);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..10 {
            let query: Vec<f32> = (0..3).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let path = tree.path(&query).unwrap();
            assert_eq!(path[0].1, tree.root_address());
            for pair in path.windows(2) {
                let (d_parent, (si, _)) = pair[0];
                let (d_child, _) = pair[1];
                let hop_bound = tree.scale_base().powi(si);
                assert!(
                    (d_parent - d_child).abs() <= hop_bound * (1.0 + 1e-5),
                    "hop from {d_parent} to {d_child} exceeds {hop_bound}"
                );
            }
        }
    }

    #[test]
    fn known_path_matches_routed_path() {
        let tree = random_tree(180, 2, 61, 3);
        for pi in 0..tree.len() {
            let point = tree.data_point(pi).unwrap().to_vec();
            let routed = tree.path(&point).unwrap();
            let known = tree.known_path(pi).unwrap();
            assert_eq!(
                routed.iter().map(|&(_, a)| a).collect::<Vec<_>>(),
                known.iter().map(|&(_, a)| a).collect::<Vec<_>>(),
                "lineage of point {pi}"
            );
            for ((rd, _), (kd, _)) in routed.iter().zip(known.iter()) {
                assert!(approx_eq!(f32, *rd, *kd, epsilon = 1e-5));
            }
            // The known path ends at the node that registered the point.
            let (_, last) = *known.last().unwrap();
            let node = tree.node(last).unwrap();
            assert!(node.center_index() == pi || node.singletons().contains(&pi));
        }
    }

    #[test]
    fn coincident_points_still_answer_queries() {
        let store = PointStore::from_ram(vec![0.5f32; 100 * 2], 2).unwrap();
        let tree = CoverTreeBuilder::new().build(store, None).unwrap();
        let hits = tree.knn(&[0.0, 0.5], 5).unwrap();
        assert_eq!(hits.len(), 5);
        let mut seen = HashSet::new();
        for (d, pi) in hits {
            assert!(approx_eq!(f32, d, 0.5, epsilon = 1e-6));
            assert!(seen.insert(pi), "duplicate index {pi}");
        }
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let tree = line_tree();
        assert!(matches!(
            tree.knn(&[0.0, 0.0], 1),
            Err(TreeError::DimensionMismatch {
                expected: 1,
                found: 2
            })
        ));
        assert!(matches!(
            tree.path(&[0.0, 0.0]),
            Err(TreeError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn unknown_address_is_an_error() {
        let tree = line_tree();
        assert!(matches!(
            tree.node((99, 99)),
            Err(TreeError::AddressNotFound((99, 99)))
        ));
    }

    #[test]
    fn layers_run_coarse_to_fine_and_cover_all_nodes() {
        let tree = random_tree(150, 2, 19, 5);
        let scales: Vec<ScaleIndex> = tree.layers().map(|l| l.scale_index()).collect();
        let mut sorted = scales.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(scales, sorted);
        assert_eq!(scales[0], tree.top_scale());
        assert_eq!(*scales.last().unwrap(), tree.bottom_scale());

        let total: usize = tree.layers().map(|l| l.node_count()).sum();
        assert_eq!(total, tree.node_count());

        let top = tree.layer(tree.top_scale()).unwrap();
        assert_eq!(top.node_count(), 1);
        assert_eq!(top.nodes().next().unwrap().address(), tree.root_address());
    }

    #[test]
    fn sample_draws_plausible_points() {
        let tree = random_tree(100, 2, 47, 10);
        for _ in 0..20 {
            let (point, label) = tree.sample().unwrap();
            assert_eq!(point.len(), 2);
            assert!(point.iter().all(|v| v.is_finite()));
            assert!(label.is_none());
        }
    }

    #[test]
    fn builds_from_config_files() {
        let dir = tempfile::tempdir().unwrap();

        let data_path = dir.path().join("points.dat");
        let mut data_file = std::fs::File::create(&data_path).unwrap();
        let points: [[f32; 2]; 6] = [
            [0.0, 0.0],
            [0.1, 0.0],
            [1.0, 1.0],
            [1.1, 1.0],
            [-1.0, 0.5],
            [-1.1, 0.5],
        ];
        for point in &points {
            for v in point {
                data_file.write_all(&v.to_le_bytes()).unwrap();
            }
        }
        data_file.flush().unwrap();

        let labels_path = dir.path().join("labels.csv");
        std::fs::write(
            &labels_path,
            "index,cluster\n0,a\n1,a\n2,b\n3,b\n4,c\n5,c\n",
        )
        .unwrap();

        let document = format!(
            r#"
            scale_base = 1.5
            leaf_cutoff = 1
            data_path = "{}"
            labels_path = "{}"
            count = 6
            data_dim = 2

            [schema]
            cluster = "string"
            "#,
            data_path.display(),
            labels_path.display()
        );
        let config = TreeConfig::from_toml_str(&document).unwrap();
        let tree = crate::build(&config).unwrap();

        assert_eq!(tree.len(), 6);
        assert_eq!(tree.dim(), 2);
        let hits = tree.knn(&[1.05, 1.0], 2).unwrap();
        let indices: HashSet<PointIndex> = hits.iter().map(|&(_, pi)| pi).collect();
        assert_eq!(indices, HashSet::from([2, 3]));

        let root = tree.node(tree.root_address()).unwrap();
        let summary = root.label_summary().unwrap();
        match summary.get("cluster").unwrap() {
            crate::labels::ColumnSummary::Discrete(s) => {
                assert_eq!(s.count("a"), 2);
                assert_eq!(s.count("b"), 2);
                assert_eq!(s.count("c"), 2);
            }
            _ => panic!("cluster should be discrete"),
        }

        let (_, label) = tree.sample().unwrap();
        assert!(label.is_some());
    }
}
