//! The identity index paired with its durable sample store.

use crate::index::{IdentityIndex, IndexError};
use crate::store::{SampleStore, StoreError};
use crate::types::{Descriptor, EnrollmentBatch, EnrollmentReceipt, Identity};
use parking_lot::{RwLock, RwLockReadGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("identity index unavailable: {0}")]
    IndexUnavailable(#[source] StoreError),
    #[error("sample store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Shared enrollment state: every committed batch is in the store, and the
/// in-memory index mirrors the store.
pub struct FaceRegistry<S> {
    store: S,
    index: RwLock<IdentityIndex>,
}

impl<S: SampleStore> FaceRegistry<S> {
    /// Rebuild the index from everything `store` holds.
    pub fn open(store: S, neighbors: usize) -> Result<Self, RegistryError> {
        let samples = store.load().map_err(RegistryError::IndexUnavailable)?;
        let index = IdentityIndex::with_samples(neighbors, samples)?;

        tracing::info!(
            samples = index.len(),
            identities = index.identities().len(),
            neighbors = index.neighbors(),
            "identity index loaded"
        );

        Ok(Self {
            store,
            index: RwLock::new(index),
        })
    }

    /// Persist `batch`, then make it visible to queries.
    ///
    /// The write lock is held across both steps so concurrent commits land
    /// in the store and the index in the same order. If the store append
    /// fails the index is left untouched.
    pub fn commit(&self, batch: &EnrollmentBatch) -> Result<EnrollmentReceipt, RegistryError> {
        let mut index = self.index.write();
        index.check(batch)?;

        if index.contains(&batch.identity) {
            tracing::warn!(
                identity = %batch.identity,
                "identity already enrolled; adding another batch"
            );
        }

        self.store
            .append(batch)
            .map_err(RegistryError::StoreUnavailable)?;
        index.add(batch)?;

        tracing::info!(
            identity = %batch.identity,
            batch = %batch.id,
            samples = batch.len(),
            total = index.len(),
            "enrollment committed"
        );

        Ok(batch.receipt())
    }

    /// Read access for verification. Commits wait while the guard is held.
    pub fn index(&self) -> RwLockReadGuard<'_, IdentityIndex> {
        self.index.read()
    }

    pub fn query(&self, descriptor: &Descriptor) -> Result<Option<Identity>, IndexError> {
        self.index.read().query(descriptor)
    }

    pub fn is_enrolled(&self, identity: &Identity) -> bool {
        self.index.read().contains(identity)
    }

    pub fn enrollments(&self) -> Result<Vec<EnrollmentReceipt>, RegistryError> {
        self.store.enrollments().map_err(RegistryError::StoreUnavailable)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
