//! Optional tabular labels attached to the point set, and the per-node
//! aggregates computed over them at build time.
//!
//! The on-disk format is a CSV file with a leading unique integer `index`
//! column mapped to point indices, plus one column per schema entry. Numeric
//! columns are summarized as (count, sum, sum of squares, min, max);
//! discrete columns as a bounded frequency map that spills to `other`; every
//! column tracks a null count. Summaries are folded bottom-up into each node
//! at build finalization and cached there.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constants::DISCRETE_CAP;
use crate::errors::{TreeError, TreeResult};
use crate::PointIndex;

/// Column types recognized by the labels schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    I32,
    F32,
    F64,
    Bool,
    String,
}

impl ColumnType {
    fn is_numeric(self) -> bool {
        matches!(self, ColumnType::F32 | ColumnType::F64)
    }
}

/// A single typed label cell.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelValue {
    I32(i32),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Null,
}

impl LabelValue {
    fn parse(field: &str, ty: ColumnType) -> Result<LabelValue, String> {
        if field.is_empty() {
            return Ok(LabelValue::Null);
        }
        match ty {
            ColumnType::I32 => field
                .parse()
                .map(LabelValue::I32)
                .map_err(|_| format!("expected i32, found {field:?}")),
            ColumnType::F32 => field
                .parse()
                .map(LabelValue::F32)
                .map_err(|_| format!("expected f32, found {field:?}")),
            ColumnType::F64 => field
                .parse()
                .map(LabelValue::F64)
                .map_err(|_| format!("expected f64, found {field:?}")),
            ColumnType::Bool => field
                .parse()
                .map(LabelValue::Bool)
                .map_err(|_| format!("expected bool, found {field:?}")),
            ColumnType::String => Ok(LabelValue::String(field.to_string())),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            LabelValue::F32(v) => Some(*v as f64),
            LabelValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    fn discrete_key(&self) -> Option<String> {
        match self {
            LabelValue::I32(v) => Some(v.to_string()),
            LabelValue::Bool(v) => Some(v.to_string()),
            LabelValue::String(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// One label row, in schema column order.
pub type LabelRecord = Vec<(String, LabelValue)>;

/// The full labels table, one row per point index.
#[derive(Debug)]
pub struct LabelTable {
    names: Arc<[String]>,
    types: Vec<ColumnType>,
    rows: Vec<Vec<LabelValue>>,
}

impl LabelTable {
    /// Reads a labels CSV against the given schema. Rows are keyed by the
    /// `index` column; indices outside `[0, expected_len)` or duplicated are
    /// rejected, points never mentioned get all-null rows.
    pub fn from_csv<P: AsRef<Path>>(
        path: P,
        schema: &BTreeMap<String, ColumnType>,
        expected_len: usize,
    ) -> TreeResult<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let headers = reader.headers()?.clone();

        let index_pos = headers
            .iter()
            .position(|h| h == "index")
            .ok_or_else(|| TreeError::InvalidConfig("labels file has no `index` column".into()))?;

        let mut names = Vec::with_capacity(schema.len());
        let mut types = Vec::with_capacity(schema.len());
        let mut positions = Vec::with_capacity(schema.len());
        for (name, &ty) in schema {
            let pos = headers.iter().position(|h| h == name).ok_or_else(|| {
                TreeError::InvalidConfig(format!("labels file has no `{name}` column"))
            })?;
            names.push(name.clone());
            types.push(ty);
            positions.push(pos);
        }

        let mut rows = vec![vec![LabelValue::Null; names.len()]; expected_len];
        let mut seen = vec![false; expected_len];
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let bad_row = |msg: String| {
                TreeError::IoError(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("labels row {line}: {msg}"),
                ))
            };
            let pi: PointIndex = record
                .get(index_pos)
                .unwrap_or_default()
                .parse()
                .map_err(|_| bad_row("unparseable index".into()))?;
            if pi >= expected_len {
                return Err(bad_row(format!("index {pi} out of range")));
            }
            if seen[pi] {
                return Err(bad_row(format!("duplicate index {pi}")));
            }
            seen[pi] = true;
            for (slot, (&pos, &ty)) in positions.iter().zip(types.iter()).enumerate() {
                rows[pi][slot] = LabelValue::parse(record.get(pos).unwrap_or_default(), ty)
                    .map_err(bad_row)?;
            }
        }

        Ok(LabelTable {
            names: names.into(),
            types,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// The label row for a point, paired with column names.
    pub fn record(&self, pi: PointIndex) -> Option<LabelRecord> {
        self.rows.get(pi).map(|row| {
            self.names
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect()
        })
    }

    /// An empty summary with this table's shape, the unit of `merge`.
    pub fn empty_summary(&self) -> LabelSummary {
        let columns = self
            .types
            .iter()
            .map(|ty| {
                if ty.is_numeric() {
                    ColumnSummary::Numeric(NumericSummary::default())
                } else {
                    ColumnSummary::Discrete(DiscreteSummary::default())
                }
            })
            .collect();
        LabelSummary {
            names: self.names.clone(),
            columns,
        }
    }

    /// Summarizes the rows for the given point indices.
    pub fn summarize(&self, indices: impl Iterator<Item = PointIndex>) -> LabelSummary {
        let mut summary = self.empty_summary();
        for pi in indices {
            let Some(row) = self.rows.get(pi) else { continue };
            for (value, column) in row.iter().zip(summary.columns.iter_mut()) {
                column.push(value);
            }
        }
        summary
    }
}

/// Accumulator for a numeric label column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumericSummary {
    count: u64,
    nulls: u64,
    sum: f64,
    sum_sq: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl NumericSummary {
    fn push(&mut self, v: f64) {
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    fn merge(&mut self, other: &NumericSummary) {
        self.count += other.count;
        self.nulls += other.nulls;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        if let Some(m) = other.min {
            self.min = Some(self.min.map_or(m, |s| s.min(m)));
        }
        if let Some(m) = other.max {
            self.max = Some(self.max.map_or(m, |s| s.max(m)));
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn nulls(&self) -> u64 {
        self.nulls
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Population variance.
    pub fn variance(&self) -> Option<f64> {
        self.mean()
            .map(|m| (self.sum_sq / self.count as f64 - m * m).max(0.0))
    }
}

/// Bounded frequency map for a discrete label column. At most
/// [`DISCRETE_CAP`] distinct values are tracked; the rest land in `other`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscreteSummary {
    counts: BTreeMap<String, u64>,
    other: u64,
    nulls: u64,
}

impl DiscreteSummary {
    fn push_n(&mut self, key: &str, n: u64) {
        if let Some(count) = self.counts.get_mut(key) {
            *count += n;
        } else if self.counts.len() < DISCRETE_CAP {
            self.counts.insert(key.to_string(), n);
        } else {
            self.other += n;
        }
    }

    fn merge(&mut self, other: &DiscreteSummary) {
        for (key, &n) in &other.counts {
            self.push_n(key, n);
        }
        self.other += other.other;
        self.nulls += other.nulls;
    }

    pub fn count(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn other(&self) -> u64 {
        self.other
    }

    pub fn nulls(&self) -> u64 {
        self.nulls
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum::<u64>() + self.other
    }
}

/// One label column's aggregate over the points a node covers.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSummary {
    Numeric(NumericSummary),
    Discrete(DiscreteSummary),
}

impl ColumnSummary {
    fn push(&mut self, value: &LabelValue) {
        match self {
            ColumnSummary::Numeric(s) => match value.as_f64() {
                Some(v) => s.push(v),
                None => s.nulls += 1,
            },
            ColumnSummary::Discrete(s) => match value.discrete_key() {
                Some(key) => s.push_n(&key, 1),
                None => s.nulls += 1,
            },
        }
    }

    fn merge(&mut self, other: &ColumnSummary) {
        match (self, other) {
            (ColumnSummary::Numeric(s), ColumnSummary::Numeric(o)) => s.merge(o),
            (ColumnSummary::Discrete(s), ColumnSummary::Discrete(o)) => s.merge(o),
            // Shapes come from one schema, so this cannot be reached.
            _ => {}
        }
    }
}

/// Per-node aggregate over every label column. Column names are shared with
/// the table, so cloning summaries around the tree stays cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelSummary {
    names: Arc<[String]>,
    columns: Vec<ColumnSummary>,
}

impl LabelSummary {
    pub fn get(&self, name: &str) -> Option<&ColumnSummary> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnSummary)> {
        self.names
            .iter()
            .map(|n| n.as_str())
            .zip(self.columns.iter())
    }

    pub fn merge(&mut self, other: &LabelSummary) {
        for (column, o) in self.columns.iter_mut().zip(other.columns.iter()) {
            column.merge(o);
        }
    }
}
