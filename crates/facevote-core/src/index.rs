//! Nearest-neighbor identity index.
//!
//! Stores every enrolled descriptor as a row of one sample matrix and
//! classifies a probe by majority vote among its k nearest rows (Euclidean
//! distance over raw descriptor values).
//!
//! Insertion is incremental: a row appended by [`IdentityIndex::add`] is
//! visible to the next query, and there is no refit step. A query is a full
//! scan, O(samples × descriptor length).

use crate::types::{Classification, Descriptor, EnrollmentBatch, FaceSample, Identity};
use ndarray::{Array2, ArrayView1};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use thiserror::Error;

pub const DEFAULT_NEIGHBORS: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("descriptor length mismatch: index holds {expected}-value descriptors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("descriptor is empty")]
    EmptyDescriptor,
    #[error("neighbor count must be at least 1")]
    InvalidNeighbors,
}

/// Append-only set of (descriptor, identity) pairs.
#[derive(Debug, Clone)]
pub struct IdentityIndex {
    /// One row per sample; zero columns until the first sample fixes the
    /// descriptor length.
    samples: Array2<f32>,
    labels: Vec<Identity>,
    k: usize,
}

impl IdentityIndex {
    pub fn new(k: usize) -> Result<Self, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidNeighbors);
        }
        Ok(Self {
            samples: Array2::zeros((0, 0)),
            labels: Vec::new(),
            k,
        })
    }

    /// Build an index from previously stored samples, in store order.
    pub fn with_samples(
        k: usize,
        samples: impl IntoIterator<Item = FaceSample>,
    ) -> Result<Self, IndexError> {
        let mut index = Self::new(k)?;
        for sample in samples {
            index.insert(&sample.identity, &sample.descriptor)?;
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn neighbors(&self) -> usize {
        self.k
    }

    /// Descriptor length, once the first sample has been added.
    pub fn dimension(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.samples.ncols())
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.labels.iter().any(|l| l == identity)
    }

    pub fn identities(&self) -> BTreeSet<&Identity> {
        self.labels.iter().collect()
    }

    /// Check that every descriptor in `batch` fits this index.
    pub fn check(&self, batch: &EnrollmentBatch) -> Result<(), IndexError> {
        let Some(first) = batch.descriptors.first() else {
            return Ok(());
        };
        let expected = self.dimension().unwrap_or(first.len());
        if expected == 0 {
            return Err(IndexError::EmptyDescriptor);
        }
        for descriptor in &batch.descriptors {
            if descriptor.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: descriptor.len(),
                });
            }
        }
        Ok(())
    }

    /// Append every sample of `batch`. All-or-nothing: a batch with a
    /// mismatched descriptor adds nothing.
    ///
    /// Not idempotent: adding the same batch twice stores its samples twice.
    pub fn add(&mut self, batch: &EnrollmentBatch) -> Result<(), IndexError> {
        self.check(batch)?;
        for descriptor in &batch.descriptors {
            self.insert(&batch.identity, descriptor)?;
        }
        Ok(())
    }

    fn insert(&mut self, identity: &Identity, descriptor: &Descriptor) -> Result<(), IndexError> {
        if descriptor.is_empty() {
            return Err(IndexError::EmptyDescriptor);
        }
        if self.is_empty() {
            self.samples = Array2::zeros((0, descriptor.len()));
        }
        self.samples
            .push_row(ArrayView1::from(&descriptor.values[..]))
            .map_err(|_| IndexError::DimensionMismatch {
                expected: self.samples.ncols(),
                actual: descriptor.len(),
            })?;
        self.labels.push(identity.clone());
        Ok(())
    }

    /// Majority identity among the k nearest samples, or `None` when the
    /// index is empty.
    pub fn query(&self, probe: &Descriptor) -> Result<Option<Identity>, IndexError> {
        Ok(self.classify(probe)?.map(|c| c.identity))
    }

    /// Like [`query`](Self::query), with vote details.
    ///
    /// Neighbors are ranked by (distance, insertion order). When several
    /// identities tie for the most votes, the one owning the nearest
    /// neighbor wins. With fewer than k samples stored, all of them vote.
    pub fn classify(&self, probe: &Descriptor) -> Result<Option<Classification>, IndexError> {
        if self.is_empty() {
            return Ok(None);
        }
        let expected = self.samples.ncols();
        if probe.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: probe.len(),
            });
        }

        let probe = ArrayView1::from(&probe.values[..]);
        let mut ranked: Vec<(f32, usize)> = self
            .samples
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let diff = &row - &probe;
                (diff.dot(&diff), i)
            })
            .collect();

        let by_rank = |a: &(f32, usize), b: &(f32, usize)| -> Ordering {
            a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
        };
        let k = self.k.min(ranked.len());
        if ranked.len() > k {
            ranked.select_nth_unstable_by(k - 1, by_rank);
            ranked.truncate(k);
        }
        ranked.sort_by(by_rank);

        // Tally in order of first appearance, i.e. nearest first.
        let mut tally: Vec<(&Identity, usize)> = Vec::new();
        for &(_, i) in &ranked {
            let label = &self.labels[i];
            match tally.iter_mut().find(|(id, _)| *id == label) {
                Some(entry) => entry.1 += 1,
                None => tally.push((label, 1)),
            }
        }

        let mut best = tally[0];
        for &entry in &tally[1..] {
            if entry.1 > best.1 {
                best = entry;
            }
        }

        Ok(Some(Classification {
            identity: best.0.clone(),
            votes: best.1,
            neighbors: k,
            nearest_distance: ranked[0].0.sqrt(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn id(s: &str) -> Identity {
        Identity::new(s).unwrap()
    }

    fn cluster(rng: &mut StdRng, center: f32, count: usize, dim: usize) -> Vec<Descriptor> {
        (0..count)
            .map(|_| {
                Descriptor::from(
                    (0..dim)
                        .map(|_| center + rng.gen_range(-2.0f32..2.0))
                        .collect::<Vec<_>>(),
                )
            })
            .collect()
    }

    fn batch(identity: &str, values: &[f32]) -> EnrollmentBatch {
        EnrollmentBatch::new(
            id(identity),
            values.iter().map(|&v| Descriptor::from(vec![v])).collect(),
        )
    }

    #[test]
    fn test_empty_index_returns_none() {
        let index = IdentityIndex::new(DEFAULT_NEIGHBORS).unwrap();
        assert_eq!(index.query(&Descriptor::from(vec![1.0; 7])).unwrap(), None);
        assert_eq!(index.dimension(), None);
    }

    #[test]
    fn test_zero_neighbors_rejected() {
        assert_eq!(IdentityIndex::new(0).unwrap_err(), IndexError::InvalidNeighbors);
    }

    #[test]
    fn test_separated_clusters() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut index = IdentityIndex::new(DEFAULT_NEIGHBORS).unwrap();
        index
            .add(&EnrollmentBatch::new(id("A"), cluster(&mut rng, 40.0, 51, 2500)))
            .unwrap();
        index
            .add(&EnrollmentBatch::new(id("B"), cluster(&mut rng, 210.0, 51, 2500)))
            .unwrap();
        assert_eq!(index.len(), 102);

        let probe = &cluster(&mut rng, 41.0, 1, 2500)[0];
        let result = index.classify(probe).unwrap().unwrap();
        assert_eq!(result.identity, id("A"));
        assert_eq!(result.votes, 5);
        assert_eq!(result.neighbors, 5);

        let probe = &cluster(&mut rng, 205.0, 1, 2500)[0];
        assert_eq!(index.query(probe).unwrap(), Some(id("B")));
    }

    #[test]
    fn test_majority_beats_nearest() {
        let mut index = IdentityIndex::new(5).unwrap();
        index.add(&batch("A", &[0.0])).unwrap();
        index.add(&batch("B", &[1.0, 1.5, 2.0])).unwrap();
        index.add(&batch("C", &[2.5])).unwrap();
        let result = index.classify(&Descriptor::from(vec![0.0])).unwrap().unwrap();
        assert_eq!(result.identity, id("B"));
        assert_eq!(result.votes, 3);
        assert_eq!(result.nearest_distance, 0.0);
    }

    #[test]
    fn test_tie_goes_to_nearest_identity() {
        let mut index = IdentityIndex::new(4).unwrap();
        index.add(&batch("A", &[2.0, 3.0])).unwrap();
        index.add(&batch("B", &[1.0, 4.0])).unwrap();
        // Neighbors of 0.0: B(1), A(2), A(3), B(4); 2:2, B is nearest.
        assert_eq!(index.query(&Descriptor::from(vec![0.0])).unwrap(), Some(id("B")));
    }

    #[test]
    fn test_three_way_tie_goes_to_nearest_identity() {
        let mut index = IdentityIndex::new(3).unwrap();
        index.add(&batch("A", &[3.0])).unwrap();
        index.add(&batch("B", &[-2.0])).unwrap();
        index.add(&batch("C", &[1.0])).unwrap();
        assert_eq!(index.query(&Descriptor::from(vec![0.0])).unwrap(), Some(id("C")));
    }

    #[test]
    fn test_equal_distance_prefers_earlier_sample() {
        let mut index = IdentityIndex::new(1).unwrap();
        index.add(&batch("first", &[1.0])).unwrap();
        index.add(&batch("second", &[-1.0])).unwrap();
        assert_eq!(index.query(&Descriptor::from(vec![0.0])).unwrap(), Some(id("first")));
    }

    #[test]
    fn test_fewer_samples_than_k() {
        let mut index = IdentityIndex::new(5).unwrap();
        index.add(&batch("A", &[1.0, 2.0])).unwrap();
        let result = index.classify(&Descriptor::from(vec![0.0])).unwrap().unwrap();
        assert_eq!(result.neighbors, 2);
        assert_eq!(result.votes, 2);
    }

    #[test]
    fn test_dimension_mismatch_rejected_whole_batch() {
        let mut index = IdentityIndex::new(5).unwrap();
        index.add(&batch("A", &[1.0])).unwrap();
        let bad = EnrollmentBatch::new(
            id("B"),
            vec![Descriptor::from(vec![1.0]), Descriptor::from(vec![1.0, 2.0])],
        );
        assert_eq!(
            index.add(&bad).unwrap_err(),
            IndexError::DimensionMismatch { expected: 1, actual: 2 }
        );
        assert_eq!(index.len(), 1);
        assert!(!index.contains(&id("B")));

        let err = index.query(&Descriptor::from(vec![1.0, 2.0])).unwrap_err();
        assert_eq!(err, IndexError::DimensionMismatch { expected: 1, actual: 2 });
    }

    #[test]
    fn test_add_is_not_idempotent() {
        let mut index = IdentityIndex::new(5).unwrap();
        let b = batch("A", &[1.0, 2.0, 3.0]);
        index.add(&b).unwrap();
        index.add(&b).unwrap();
        assert_eq!(index.len(), 6);
    }

    #[test]
    fn test_incremental_add_visible_to_query() {
        let mut index = IdentityIndex::new(1).unwrap();
        index.add(&batch("A", &[10.0])).unwrap();
        assert_eq!(index.query(&Descriptor::from(vec![0.0])).unwrap(), Some(id("A")));
        index.add(&batch("B", &[0.5])).unwrap();
        assert_eq!(index.query(&Descriptor::from(vec![0.0])).unwrap(), Some(id("B")));
    }

    #[test]
    fn test_with_samples_matches_incremental() {
        let a = batch("A", &[0.0, 0.1, 0.2]);
        let b = batch("B", &[5.0, 5.1, 5.2]);
        let stored: Vec<FaceSample> = a.samples().chain(b.samples()).collect();
        let rebuilt = IdentityIndex::with_samples(3, stored).unwrap();
        assert_eq!(rebuilt.len(), 6);
        assert_eq!(rebuilt.identities().len(), 2);
        assert_eq!(rebuilt.query(&Descriptor::from(vec![4.9])).unwrap(), Some(id("B")));
    }
}
