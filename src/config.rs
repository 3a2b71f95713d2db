//! Builder-parameter plumbing: the configuration document recognized by
//! [`crate::build`], deserializable from a TOML key/value file or built in
//! code.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{TreeError, TreeResult};
use crate::labels::ColumnType;
use crate::ScaleIndex;

fn default_scale_base() -> f32 {
    2.0
}

fn default_min_res_index() -> ScaleIndex {
    -30
}

fn default_use_singletons() -> bool {
    true
}

fn default_in_ram() -> bool {
    true
}

/// Configuration needed to build a [`crate::CoverTree`] from files.
///
/// ```toml
/// scale_base = 1.3
/// leaf_cutoff = 50
/// min_res_index = -30
/// data_path = "data/mnist.dat"
/// labels_path = "data/mnist_labels.csv"
/// count = 60000
/// data_dim = 784
/// in_ram = true
///
/// [schema]
/// digit = "i32"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeConfig {
    /// Geometric base for covering radii; must be > 1.
    #[serde(default = "default_scale_base")]
    pub scale_base: f32,

    /// Stop splitting nodes that cover at most this many points.
    #[serde(default)]
    pub leaf_cutoff: u32,

    /// Lower bound on the scale index; the tree refuses to split below it.
    #[serde(default = "default_min_res_index", alias = "resolution")]
    pub min_res_index: ScaleIndex,

    /// Whether singletons participate in routing shortcuts.
    #[serde(default = "default_use_singletons")]
    pub use_singletons: bool,

    /// Flat little-endian f32 file of shape `(count, data_dim)`.
    #[serde(default)]
    pub data_path: Option<PathBuf>,

    /// Labels CSV with a leading unique integer `index` column.
    #[serde(default)]
    pub labels_path: Option<PathBuf>,

    /// Number of points in the data file.
    #[serde(default)]
    pub count: Option<u64>,

    /// Dimension of each point.
    #[serde(default)]
    pub data_dim: Option<u32>,

    /// Load the data file into RAM rather than memory-mapping it.
    #[serde(default = "default_in_ram")]
    pub in_ram: bool,

    /// Label column types, required when `labels_path` is set.
    #[serde(default)]
    pub schema: Option<BTreeMap<String, ColumnType>>,

    /// Builder log level; 0 is quiet, 2 adds per-split progress.
    #[serde(default)]
    pub verbosity: u8,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            scale_base: default_scale_base(),
            leaf_cutoff: 0,
            min_res_index: default_min_res_index(),
            use_singletons: default_use_singletons(),
            data_path: None,
            labels_path: None,
            count: None,
            data_dim: None,
            in_ram: default_in_ram(),
            schema: None,
            verbosity: 0,
        }
    }
}

impl TreeConfig {
    /// Parses a TOML configuration document.
    pub fn from_toml_str(document: &str) -> TreeResult<Self> {
        let config: TreeConfig = toml::from_str(document)
            .map_err(|e| TreeError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> TreeResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> TreeResult<()> {
        if !(self.scale_base > 1.0) || !self.scale_base.is_finite() {
            return Err(TreeError::InvalidConfig(format!(
                "scale_base must be a finite number > 1, got {}",
                self.scale_base
            )));
        }
        if let Some(count) = self.count {
            if count == 0 {
                return Err(TreeError::InvalidConfig("count must be positive".into()));
            }
        }
        if let Some(dim) = self.data_dim {
            if dim == 0 {
                return Err(TreeError::InvalidConfig("data_dim must be positive".into()));
            }
        }
        if self.data_path.is_some() && (self.count.is_none() || self.data_dim.is_none()) {
            return Err(TreeError::InvalidConfig(
                "data_path requires both count and data_dim".into(),
            ));
        }
        if self.labels_path.is_some() && self.schema.is_none() {
            return Err(TreeError::InvalidConfig(
                "labels_path requires a schema".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TreeConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_full_document() {
        let config = TreeConfig::from_toml_str(
            r#"
            scale_base = 1.3
            leaf_cutoff = 50
            resolution = -20
            data_path = "points.dat"
            count = 100
            data_dim = 8
            in_ram = false
            labels_path = "labels.csv"
            verbosity = 2

            [schema]
            digit = "i32"
            score = "f64"
            "#,
        )
        .unwrap();
        assert_eq!(config.scale_base, 1.3);
        assert_eq!(config.leaf_cutoff, 50);
        assert_eq!(config.min_res_index, -20);
        assert!(!config.in_ram);
        assert_eq!(config.schema.unwrap().len(), 2);
    }

    #[test]
    fn bad_scale_base_rejected() {
        assert!(matches!(
            TreeConfig::from_toml_str("scale_base = 1.0"),
            Err(TreeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn labels_require_schema() {
        assert!(matches!(
            TreeConfig::from_toml_str("labels_path = \"labels.csv\""),
            Err(TreeError::InvalidConfig(_))
        ));
    }
}
