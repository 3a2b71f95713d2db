//! Flat storage for all nodes of a tree, with the two secondary indices the
//! rest of the crate navigates by: address to node id, and scale index to
//! the ids on that layer. Populated once by the builder, immutable and
//! shareable afterwards. Node ids are dense, so per-node side tables (the
//! tracker's evidence, the SVD attachment) can be plain vectors.

use std::collections::{BTreeMap, HashMap};

use crate::node::CoverNode;
use crate::{NodeAddress, NodeId, ScaleIndex};

#[derive(Debug)]
pub(crate) struct NodeArena {
    nodes: Vec<CoverNode>,
    by_address: HashMap<NodeAddress, NodeId>,
    layers: BTreeMap<ScaleIndex, Vec<NodeId>>,
}

impl NodeArena {
    /// Adopts the builder's node buffer. The first node is the root; ids
    /// follow the buffer order, which the builder keeps deterministic.
    pub(crate) fn from_nodes(nodes: Vec<CoverNode>) -> NodeArena {
        let mut by_address = HashMap::with_capacity(nodes.len());
        let mut layers: BTreeMap<ScaleIndex, Vec<NodeId>> = BTreeMap::new();
        for (id, node) in nodes.iter().enumerate() {
            by_address.insert(node.address(), id);
            layers.entry(node.scale_index()).or_default().push(id);
        }
        NodeArena {
            nodes,
            by_address,
            layers,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn root_id(&self) -> NodeId {
        0
    }

    pub(crate) fn root(&self) -> &CoverNode {
        &self.nodes[0]
    }

    pub(crate) fn node(&self, id: NodeId) -> &CoverNode {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut CoverNode {
        &mut self.nodes[id]
    }

    pub(crate) fn nodes(&self) -> &[CoverNode] {
        &self.nodes
    }

    pub(crate) fn id_of(&self, address: NodeAddress) -> Option<NodeId> {
        self.by_address.get(&address).copied()
    }

    pub(crate) fn get(&self, address: NodeAddress) -> Option<&CoverNode> {
        self.id_of(address).map(|id| &self.nodes[id])
    }

    /// Root scale, the coarsest in the tree.
    pub(crate) fn top_scale(&self) -> ScaleIndex {
        *self.layers.keys().next_back().expect("arena is never empty")
    }

    /// Finest scale any node reaches.
    pub(crate) fn bottom_scale(&self) -> ScaleIndex {
        *self.layers.keys().next().expect("arena is never empty")
    }

    pub(crate) fn layer_ids(&self, si: ScaleIndex) -> Option<&[NodeId]> {
        self.layers.get(&si).map(|ids| ids.as_slice())
    }

    /// Scale indices present in the tree, coarsest first.
    pub(crate) fn scales(&self) -> impl Iterator<Item = ScaleIndex> + '_ {
        self.layers.keys().rev().copied()
    }
}
