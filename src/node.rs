//! The cover node. Each node owns its address, the query caches (`radius`,
//! `coverage_count`, `cover_mean`, label summary), and the children and
//! singleton piles. Singletons sit in a `SmallVec` directly on the node so
//! the common small-leaf case avoids a heap redirect; the children struct
//! keeps the nested (self-child) scale separate from the other child
//! addresses, so a node with children always covers its nested child.

use smallvec::SmallVec;

use crate::labels::LabelSummary;
use crate::{NodeAddress, PointIndex, ScaleIndex};

/// The children of a routing node: the scale of the nested self-child plus
/// the addresses of the other children. The nested child always exists for
/// a routing node and shares the parent's center, which is why only its
/// scale is stored.
#[derive(Debug, Clone)]
pub(crate) struct NodeChildren {
    pub(crate) nested_scale: ScaleIndex,
    pub(crate) addresses: SmallVec<[NodeAddress; 10]>,
}

/// A node of the cover tree.
#[derive(Debug, Clone)]
pub struct CoverNode {
    address: NodeAddress,
    parent: Option<NodeAddress>,
    /// Maximum observed distance from the center to a covered point. Always
    /// at most `scale_base^scale_index`.
    radius: f32,
    coverage_count: usize,
    cover_mean: Option<Vec<f32>>,
    label_summary: Option<LabelSummary>,
    children: Option<NodeChildren>,
    singletons: SmallVec<[PointIndex; 20]>,
}

impl CoverNode {
    pub(crate) fn new(address: NodeAddress, parent: Option<NodeAddress>) -> CoverNode {
        CoverNode {
            address,
            parent,
            radius: 0.0,
            coverage_count: 0,
            cover_mean: None,
            label_summary: None,
            children: None,
            singletons: SmallVec::new(),
        }
    }

    /// Node address, unique across the tree.
    pub fn address(&self) -> NodeAddress {
        self.address
    }

    /// Address of the parent node; `None` for the root.
    pub fn parent(&self) -> Option<NodeAddress> {
        self.parent
    }

    pub fn center_index(&self) -> PointIndex {
        self.address.1
    }

    pub fn scale_index(&self) -> ScaleIndex {
        self.address.0
    }

    /// A node with no nested child is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Maximum observed distance from the center to any covered point.
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Total points reachable beneath this node, the center counted once.
    pub fn coverage_count(&self) -> usize {
        self.coverage_count
    }

    /// Mean of all covered points, if computed at build finalization.
    pub fn cover_mean(&self) -> Option<&[f32]> {
        self.cover_mean.as_deref()
    }

    /// Aggregates over the labels of all covered points, if a labels table
    /// was attached at build time.
    pub fn label_summary(&self) -> Option<&LabelSummary> {
        self.label_summary.as_ref()
    }

    pub fn singletons(&self) -> &[PointIndex] {
        &self.singletons
    }

    pub fn singleton_len(&self) -> usize {
        self.singletons.len()
    }

    /// Children count, the nested child included.
    pub fn children_len(&self) -> usize {
        match &self.children {
            Some(children) => children.addresses.len() + 1,
            None => 0,
        }
    }

    /// For a routing node, the nested child's scale and the addresses of
    /// the other children.
    pub fn children(&self) -> Option<(ScaleIndex, &[NodeAddress])> {
        self.children
            .as_ref()
            .map(|c| (c.nested_scale, &c.addresses[..]))
    }

    /// Address of the nested self-child, if this is a routing node.
    pub fn nested_address(&self) -> Option<NodeAddress> {
        self.children
            .as_ref()
            .map(|c| (c.nested_scale, self.address.1))
    }

    /// All child addresses, the nested child first.
    pub fn child_addresses(&self) -> impl Iterator<Item = NodeAddress> + '_ {
        self.children.iter().flat_map(move |c| {
            std::iter::once((c.nested_scale, self.address.1)).chain(c.addresses.iter().copied())
        })
    }

    pub(crate) fn set_children(&mut self, nested_scale: ScaleIndex, addresses: Vec<NodeAddress>) {
        self.children = Some(NodeChildren {
            nested_scale,
            addresses: SmallVec::from_vec(addresses),
        });
    }

    pub(crate) fn insert_singletons(&mut self, indexes: impl IntoIterator<Item = PointIndex>) {
        self.singletons.extend(indexes);
    }

    pub(crate) fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
    }

    pub(crate) fn set_coverage_count(&mut self, count: usize) {
        self.coverage_count = count;
    }

    pub(crate) fn set_cover_mean(&mut self, mean: Vec<f32>) {
        self.cover_mean = Some(mean);
    }

    pub(crate) fn set_label_summary(&mut self, summary: LabelSummary) {
        self.label_summary = Some(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routing_node() -> CoverNode {
        let mut node = CoverNode::new((0, 7), None);
        node.set_children(-1, vec![(-1, 3), (-1, 9)]);
        node.set_coverage_count(12);
        node
    }

    #[test]
    fn child_addresses_lead_with_nested() {
        let node = routing_node();
        assert_eq!(node.children_len(), 3);
        assert_eq!(node.nested_address(), Some((-1, 7)));
        let children: Vec<_> = node.child_addresses().collect();
        assert_eq!(children, vec![(-1, 7), (-1, 3), (-1, 9)]);
    }

    #[test]
    fn leaf_has_no_children() {
        let mut leaf = CoverNode::new((-2, 4), Some((-1, 7)));
        leaf.insert_singletons([1, 2, 5]);
        assert!(leaf.is_leaf());
        assert_eq!(leaf.children_len(), 0);
        assert_eq!(leaf.singleton_len(), 3);
        assert_eq!(leaf.parent(), Some((-1, 7)));
        assert_eq!(leaf.child_addresses().count(), 0);
    }
}
