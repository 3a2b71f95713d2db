//! The immutable point store backing a tree: a packed `N x dim` array of
//! f32s held in RAM or memory-mapped from a flat file, plus the injected
//! metric. Everything above this module sees points only through `point`,
//! `distance` and the batch distance helpers.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;

use crate::errors::{TreeError, TreeResult};
use crate::metric::{Metric, L2};
use crate::PointIndex;

/// Below this many targets a batch distance call stays on the calling
/// thread; above it the work is split across the rayon pool.
const PAR_DISTANCE_CUTOFF: usize = 10_000;

enum Storage {
    Ram(Vec<f32>),
    Mapped(memmap2::Mmap),
}

pub struct PointStore {
    storage: Storage,
    dim: usize,
    len: usize,
    metric: Arc<dyn Metric>,
}

impl std::fmt::Debug for PointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PointStore")
            .field("len", &self.len)
            .field("dim", &self.dim)
            .field("metric", &self.metric.name())
            .field(
                "storage",
                &match self.storage {
                    Storage::Ram(_) => "ram",
                    Storage::Mapped(_) => "mapped",
                },
            )
            .finish()
    }
}

impl PointStore {
    /// Wraps an owned packed array. The default metric is [`L2`].
    pub fn from_ram(data: Vec<f32>, dim: usize) -> TreeResult<Self> {
        if dim == 0 || data.len() % dim != 0 {
            return Err(TreeError::InvalidConfig(format!(
                "data length {} is not a multiple of dimension {}",
                data.len(),
                dim
            )));
        }
        let len = data.len() / dim;
        Ok(PointStore {
            storage: Storage::Ram(data),
            dim,
            len,
            metric: Arc::new(L2),
        })
    }

    /// Opens a raw little-endian f32 file of shape `(count, dim)`, either
    /// loading it into RAM or memory-mapping it. The two modes have no
    /// behavioral difference.
    pub fn from_flat_file<P: AsRef<Path>>(
        path: P,
        count: usize,
        dim: usize,
        in_ram: bool,
    ) -> TreeResult<Self> {
        if dim == 0 {
            return Err(TreeError::InvalidConfig("data_dim must be positive".into()));
        }
        let expected_bytes = count * dim * std::mem::size_of::<f32>();
        let mut file = File::open(path.as_ref())?;
        let actual_bytes = file.metadata()?.len() as usize;
        if actual_bytes < expected_bytes {
            return Err(TreeError::InvalidConfig(format!(
                "data file {} holds {} bytes, expected at least {} for {} x {} f32s",
                path.as_ref().display(),
                actual_bytes,
                expected_bytes,
                count,
                dim
            )));
        }

        let storage = if in_ram {
            let mut bytes = vec![0u8; expected_bytes];
            file.read_exact(&mut bytes)?;
            let floats = bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            Storage::Ram(floats)
        } else {
            // Safety of the map itself: the file is opened read-only and the
            // engine never writes through it.
            let map = unsafe { memmap2::Mmap::map(&file)? };
            Storage::Mapped(map)
        };

        Ok(PointStore {
            storage,
            dim,
            len: count,
            metric: Arc::new(L2),
        })
    }

    /// Replaces the default metric. The tree must be built after this call,
    /// not before; distances cached in nodes are not recomputed.
    pub fn with_metric(mut self, metric: Arc<dyn Metric>) -> Self {
        self.metric = metric;
        self
    }

    pub fn metric(&self) -> &dyn Metric {
        self.metric.as_ref()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn floats(&self) -> &[f32] {
        match &self.storage {
            Storage::Ram(data) => data,
            Storage::Mapped(map) => {
                // Safety: the mapping is page-aligned, read-only, and at
                // least `len * dim * 4` bytes (checked at open). The file
                // format is little-endian f32, matching every target this
                // crate builds for.
                unsafe {
                    std::slice::from_raw_parts(map.as_ptr() as *const f32, self.len * self.dim)
                }
            }
        }
    }

    /// A view of the indexed point.
    pub fn point(&self, pi: PointIndex) -> TreeResult<&[f32]> {
        if pi >= self.len {
            return Err(TreeError::InvalidPoint(format!(
                "index {} out of bounds for {} points",
                pi, self.len
            )));
        }
        let start = pi * self.dim;
        Ok(&self.floats()[start..start + self.dim])
    }

    /// Distance between two stored points.
    pub fn distance(&self, a: PointIndex, b: PointIndex) -> TreeResult<f32> {
        if a == b {
            return Ok(0.0);
        }
        Ok(self.metric.one_to_one(self.point(a)?, self.point(b)?))
    }

    /// Distances from one stored point to many stored points.
    pub fn distances_to_point_index(
        &self,
        pi: PointIndex,
        targets: &[PointIndex],
    ) -> TreeResult<Vec<f32>> {
        self.distances_to_point(self.point(pi)?, targets)
    }

    /// Distances from an arbitrary query to many stored points. Large
    /// batches go through the metric's rayon path.
    pub fn distances_to_point(
        &self,
        query: &[f32],
        targets: &[PointIndex],
    ) -> TreeResult<Vec<f32>> {
        self.check_dim(query)?;
        let views: Vec<&[f32]> = targets
            .iter()
            .map(|&t| self.point(t))
            .collect::<TreeResult<_>>()?;
        if targets.len() < PAR_DISTANCE_CUTOFF {
            Ok(self.metric.one_to_many(query, &views))
        } else {
            Ok(self.metric.par_one_to_many(query, &views))
        }
    }

    /// Errors with `DimensionMismatch` unless `query` has the store's
    /// dimension, or `InvalidPoint` if it has non-finite coordinates.
    pub fn check_dim(&self, query: &[f32]) -> TreeResult<()> {
        if query.len() != self.dim {
            return Err(TreeError::DimensionMismatch {
                expected: self.dim,
                found: query.len(),
            });
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(TreeError::InvalidPoint(
                "query has a NaN or infinite coordinate".into(),
            ));
        }
        Ok(())
    }

    /// Scans the whole store for NaN or infinite coordinates. Run once at
    /// build entry so everything downstream can rely on finite distances.
    pub fn validate_finite(&self) -> TreeResult<()> {
        let floats = self.floats();
        if let Some(bad) = (0..self.len)
            .into_par_iter()
            .find_first(|pi| {
                floats[pi * self.dim..(pi + 1) * self.dim]
                    .iter()
                    .any(|v| !v.is_finite())
            })
        {
            return Err(TreeError::InvalidPoint(format!(
                "point {bad} has a NaN or infinite coordinate"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use float_cmp::approx_eq;

    use super::*;

    #[test]
    fn ram_round_trip() {
        let store = PointStore::from_ram(vec![0.0, 0.0, 3.0, 4.0, 1.0, 1.0], 2).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.dim(), 2);
        assert_eq!(store.point(1).unwrap(), &[3.0, 4.0]);
        assert!(approx_eq!(f32, store.distance(0, 1).unwrap(), 5.0));
    }

    #[test]
    fn mapped_matches_ram() {
        let data: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for v in &data {
            file.write_all(&v.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();

        let ram = PointStore::from_flat_file(file.path(), 5, 4, true).unwrap();
        let mapped = PointStore::from_flat_file(file.path(), 5, 4, false).unwrap();
        for pi in 0..5 {
            assert_eq!(ram.point(pi).unwrap(), mapped.point(pi).unwrap());
        }
    }

    #[test]
    fn short_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 8]).unwrap();
        file.flush().unwrap();
        assert!(matches!(
            PointStore::from_flat_file(file.path(), 5, 4, true),
            Err(TreeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn nan_is_flagged() {
        let store = PointStore::from_ram(vec![0.0, f32::NAN, 1.0, 1.0], 2).unwrap();
        assert!(matches!(
            store.validate_finite(),
            Err(TreeError::InvalidPoint(_))
        ));
    }

    #[test]
    fn dimension_checked() {
        let store = PointStore::from_ram(vec![0.0, 0.0], 2).unwrap();
        assert!(matches!(
            store.distances_to_point(&[1.0], &[0]),
            Err(TreeError::DimensionMismatch {
                expected: 2,
                found: 1
            })
        ));
    }
}
