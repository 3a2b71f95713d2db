//! canopy: cover-tree indexing and streaming drift detection.
//!
//! Builds a cover tree over a fixed set of f32 vectors, answers k-NN and
//! path queries against it, and tracks streams of query points with
//! Dirichlet-categorical posteriors at every visited node, reporting KL
//! divergence against the training distribution. A Monte-Carlo baseline
//! characterizes the in-distribution KL floor so live readings can be
//! normalized.

mod arena;
mod baseline;
mod builder;
mod config;
mod errors;
mod labels;
mod metric;
mod node;
mod point_store;
mod query_heap;
mod svd;
mod tracker;
mod tree;

pub mod constants;
pub mod helpers;

pub use baseline::{BaselineSnapshot, DirichletBaseline, NormalizedStats, StatsMoments};
pub use builder::{CancelToken, CoverTreeBuilder};
pub use config::TreeConfig;
pub use errors::{TreeError, TreeResult};
pub use labels::{
    ColumnSummary, ColumnType, DiscreteSummary, LabelRecord, LabelSummary, LabelTable, LabelValue,
    NumericSummary,
};
pub use metric::{Metric, L2};
pub use node::CoverNode;
pub use point_store::PointStore;
pub use tracker::{BayesCategoricalTracker, TrackerStats};
pub use tree::{CoverTree, Layer};

/// Index of a point in the store.
pub type PointIndex = usize;

/// Scale index: a node at scale `si` covers to radius `scale_base^si`.
pub type ScaleIndex = i32;

/// Unique node identifier: `(scale_index, center_point_index)`.
pub type NodeAddress = (ScaleIndex, PointIndex);

/// Dense arena index of a node, assigned at build commit.
pub(crate) type NodeId = usize;

/// Builds a tree from a configuration document. Shorthand for
/// [`CoverTree::from_config`].
pub fn build(config: &TreeConfig) -> TreeResult<CoverTree> {
    CoverTree::from_config(config)
}
