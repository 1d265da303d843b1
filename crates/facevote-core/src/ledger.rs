//! One-vote-per-identity ledger.
//!
//! Recording a vote is a single conditional insert at the store, never a
//! read followed by a write, so concurrent attempts for the same identity
//! resolve to exactly one success and `DuplicateVote` for the rest.

use crate::store::{LedgerStore, StoreError};
use crate::types::{Identity, Vote};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("identity {0} has already voted")]
    DuplicateVote(Identity),
    #[error("invalid choice {0:?}")]
    InvalidChoice(String),
    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
}

pub struct VoteLedger<L> {
    store: L,
    /// Closed set of valid choices; `None` accepts any non-blank choice.
    options: Option<BTreeSet<String>>,
}

impl<L: LedgerStore> VoteLedger<L> {
    pub fn new(store: L) -> Self {
        Self { store, options: None }
    }

    /// Restrict choices to `options`. An empty set leaves choices open.
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options: BTreeSet<String> = options.into_iter().map(Into::into).collect();
        self.options = (!options.is_empty()).then_some(options);
        self
    }

    pub fn options(&self) -> Option<&BTreeSet<String>> {
        self.options.as_ref()
    }

    pub fn store(&self) -> &L {
        &self.store
    }

    pub fn has_voted(&self, identity: &Identity) -> Result<bool, LedgerError> {
        self.store.exists(identity).map_err(LedgerError::StoreUnavailable)
    }

    /// Record `identity`'s vote for `choice`.
    pub fn record(&self, identity: &Identity, choice: &str) -> Result<Vote, LedgerError> {
        self.validate_choice(choice)?;

        let vote = Vote {
            identity: identity.clone(),
            choice: choice.to_string(),
            cast_at: Utc::now(),
        };

        let inserted = self
            .store
            .insert_if_absent(&vote)
            .map_err(LedgerError::StoreUnavailable)?;
        if !inserted {
            tracing::warn!(identity = %identity, "duplicate vote rejected");
            return Err(LedgerError::DuplicateVote(identity.clone()));
        }

        tracing::info!(identity = %identity, choice, "vote recorded");
        Ok(vote)
    }

    pub fn vote_for(&self, identity: &Identity) -> Result<Option<Vote>, LedgerError> {
        self.store.get(identity).map_err(LedgerError::StoreUnavailable)
    }

    pub fn tally(&self) -> Result<BTreeMap<String, u64>, LedgerError> {
        self.store.tally().map_err(LedgerError::StoreUnavailable)
    }

    fn validate_choice(&self, choice: &str) -> Result<(), LedgerError> {
        let valid = match &self.options {
            Some(options) => options.contains(choice),
            None => !choice.trim().is_empty(),
        };
        if valid {
            Ok(())
        } else {
            Err(LedgerError::InvalidChoice(choice.to_string()))
        }
    }
}
