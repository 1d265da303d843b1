//! Polling station: enrollment, verification and vote casting wired
//! together over shared registry and ledger state.

use crate::detector::Detector;
use crate::enrollment::{EnrollmentError, EnrollmentSession};
use crate::extractor::FeatureExtractor;
use crate::frame::Frame;
use crate::ledger::{LedgerError, VoteLedger};
use crate::registry::{FaceRegistry, RegistryError};
use crate::store::{LedgerStore, SampleStore};
use crate::types::{EnrollmentReceipt, Identity, Vote};
use crate::verification::{first_face_descriptor, match_descriptor, Verification, VerifyError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StationError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face not recognized")]
    NotRecognized,
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Counts for a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationStatus {
    pub identities: usize,
    pub samples: usize,
    pub votes: u64,
}

impl StationStatus {
    /// Counts straight from a registry and ledger; no detector involved.
    pub fn collect<S: SampleStore, L: LedgerStore>(
        registry: &FaceRegistry<S>,
        ledger: &VoteLedger<L>,
    ) -> Result<Self, StationError> {
        let (identities, samples) = {
            let index = registry.index();
            (index.identities().len(), index.len())
        };
        let votes = ledger.tally()?.values().sum();
        Ok(Self {
            identities,
            samples,
            votes,
        })
    }
}

pub struct PollingStation<D, S, L> {
    detector: D,
    extractor: FeatureExtractor,
    registry: FaceRegistry<S>,
    ledger: VoteLedger<L>,
    samples_required: usize,
}

impl<D, S, L> PollingStation<D, S, L>
where
    D: Detector,
    S: SampleStore,
    L: LedgerStore,
{
    pub fn new(
        detector: D,
        extractor: FeatureExtractor,
        registry: FaceRegistry<S>,
        ledger: VoteLedger<L>,
        samples_required: usize,
    ) -> Self {
        Self {
            detector,
            extractor,
            registry,
            ledger,
            samples_required,
        }
    }

    pub fn registry(&self) -> &FaceRegistry<S> {
        &self.registry
    }

    pub fn ledger(&self) -> &VoteLedger<L> {
        &self.ledger
    }

    /// Start collecting samples for `identity`. Nothing is stored until
    /// [`complete_enrollment`](Self::complete_enrollment).
    pub fn begin_enrollment(
        &self,
        identity: Identity,
    ) -> Result<EnrollmentSession<'_, D>, StationError> {
        Ok(EnrollmentSession::new(
            identity,
            &self.detector,
            &self.extractor,
            self.samples_required,
        )?)
    }

    /// Finalize `session` and commit its batch.
    pub fn complete_enrollment(
        &self,
        session: &mut EnrollmentSession<'_, D>,
    ) -> Result<EnrollmentReceipt, StationError> {
        let batch = session.finalize()?;
        Ok(self.registry.commit(&batch)?)
    }

    /// Run a whole enrollment attempt over at most `window` frames.
    pub fn enroll<I>(
        &self,
        identity: Identity,
        frames: I,
        window: usize,
    ) -> Result<EnrollmentReceipt, StationError>
    where
        I: IntoIterator<Item = Frame>,
    {
        let mut session = self.begin_enrollment(identity)?;
        session.capture(frames, window)?;
        self.complete_enrollment(&mut session)
    }

    /// Detection and extraction run without the index lock; it is taken
    /// only to classify, so commits are not held up by a slow detector.
    pub fn verify(&self, frame: &Frame) -> Result<Verification, StationError> {
        let Some(descriptor) = first_face_descriptor(&self.detector, &self.extractor, frame)? else {
            return Ok(Verification::NoFace);
        };
        let index = self.registry.index();
        Ok(match_descriptor(&index, &descriptor).map_err(VerifyError::from)?)
    }

    /// Verify the voter in `frame` and record their vote.
    pub fn cast_vote(&self, frame: &Frame, choice: &str) -> Result<Vote, StationError> {
        let identity = match self.verify(frame)? {
            Verification::Matched(c) => c.identity,
            Verification::NoFace => return Err(StationError::NoFaceDetected),
            Verification::NoMatch => return Err(StationError::NotRecognized),
        };
        Ok(self.ledger.record(&identity, choice)?)
    }

    pub fn status(&self) -> Result<StationStatus, StationError> {
        StationStatus::collect(&self.registry, &self.ledger)
    }
}
