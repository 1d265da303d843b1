//! Durable-store seams for enrolled samples and cast votes, plus in-memory
//! implementations.

use crate::types::{EnrollmentBatch, EnrollmentReceipt, FaceSample, Identity, Vote};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[source] BoxError),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn unavailable(err: impl Into<BoxError>) -> Self {
        Self::Unavailable(err.into())
    }
}

/// Append-only persistence for the identity index.
pub trait SampleStore: Send + Sync {
    /// Every stored sample, in append order.
    fn load(&self) -> Result<Vec<FaceSample>, StoreError>;

    /// Persist a whole batch atomically: either every sample is stored or
    /// none is.
    fn append(&self, batch: &EnrollmentBatch) -> Result<(), StoreError>;

    /// One record per committed batch, oldest first.
    fn enrollments(&self) -> Result<Vec<EnrollmentReceipt>, StoreError>;
}

/// Persistence for cast votes, unique per identity.
pub trait LedgerStore: Send + Sync {
    fn exists(&self, identity: &Identity) -> Result<bool, StoreError>;

    /// Insert `vote` unless its identity already has one. Returns `false`
    /// (and stores nothing) when a vote was already present. Must be a
    /// single atomic operation with respect to concurrent callers.
    fn insert_if_absent(&self, vote: &Vote) -> Result<bool, StoreError>;

    fn get(&self, identity: &Identity) -> Result<Option<Vote>, StoreError>;

    /// Vote count per choice.
    fn tally(&self) -> Result<BTreeMap<String, u64>, StoreError>;
}

impl<T: SampleStore + ?Sized> SampleStore for Arc<T> {
    fn load(&self) -> Result<Vec<FaceSample>, StoreError> {
        (**self).load()
    }

    fn append(&self, batch: &EnrollmentBatch) -> Result<(), StoreError> {
        (**self).append(batch)
    }

    fn enrollments(&self) -> Result<Vec<EnrollmentReceipt>, StoreError> {
        (**self).enrollments()
    }
}

impl<T: LedgerStore + ?Sized> LedgerStore for Arc<T> {
    fn exists(&self, identity: &Identity) -> Result<bool, StoreError> {
        (**self).exists(identity)
    }

    fn insert_if_absent(&self, vote: &Vote) -> Result<bool, StoreError> {
        (**self).insert_if_absent(vote)
    }

    fn get(&self, identity: &Identity) -> Result<Option<Vote>, StoreError> {
        (**self).get(identity)
    }

    fn tally(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        (**self).tally()
    }
}

#[derive(Debug, Default)]
pub struct InMemorySampleStore {
    batches: Mutex<Vec<EnrollmentBatch>>,
}

impl InMemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleStore for InMemorySampleStore {
    fn load(&self) -> Result<Vec<FaceSample>, StoreError> {
        Ok(self.batches.lock().iter().flat_map(|b| b.samples()).collect())
    }

    fn append(&self, batch: &EnrollmentBatch) -> Result<(), StoreError> {
        self.batches.lock().push(batch.clone());
        Ok(())
    }

    fn enrollments(&self) -> Result<Vec<EnrollmentReceipt>, StoreError> {
        Ok(self.batches.lock().iter().map(EnrollmentBatch::receipt).collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    votes: Mutex<HashMap<Identity, Vote>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn exists(&self, identity: &Identity) -> Result<bool, StoreError> {
        Ok(self.votes.lock().contains_key(identity))
    }

    fn insert_if_absent(&self, vote: &Vote) -> Result<bool, StoreError> {
        match self.votes.lock().entry(vote.identity.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(vote.clone());
                Ok(true)
            }
        }
    }

    fn get(&self, identity: &Identity) -> Result<Option<Vote>, StoreError> {
        Ok(self.votes.lock().get(identity).cloned())
    }

    fn tally(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let mut counts = BTreeMap::new();
        for vote in self.votes.lock().values() {
            *counts.entry(vote.choice.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
