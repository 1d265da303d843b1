//! Enrollment sessions: accumulate face samples for one identity until the
//! sufficiency threshold is met.

use crate::detector::Detector;
use crate::extractor::{ExtractError, FeatureExtractor};
use crate::frame::Frame;
use crate::types::{Descriptor, EnrollmentBatch, Identity};
use thiserror::Error;

/// Samples an enrollment must collect before it can be finalized.
pub const DEFAULT_SAMPLES_REQUIRED: usize = 51;
/// Frames pulled from the source per enrollment attempt.
pub const DEFAULT_CAPTURE_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Collecting,
    Sufficient,
    Insufficient,
}

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("enrollment incomplete: collected {collected} of {required} required samples")]
    EnrollmentIncomplete { collected: usize, required: usize },
    #[error("enrollment session already finalized ({0:?})")]
    SessionClosed(SessionState),
    #[error("sample threshold must be at least 1")]
    InvalidThreshold,
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
}

/// One enrollment attempt for one identity.
///
/// `Collecting` until [`finalize`](Self::finalize), which moves to
/// `Sufficient` (batch returned) or `Insufficient` (attempt failed). A
/// session that is dropped before commit leaves no trace anywhere.
pub struct EnrollmentSession<'a, D: ?Sized> {
    detector: &'a D,
    extractor: &'a FeatureExtractor,
    identity: Identity,
    required: usize,
    samples: Vec<Descriptor>,
    frames_seen: usize,
    state: SessionState,
}

impl<'a, D: Detector + ?Sized> EnrollmentSession<'a, D> {
    pub fn new(
        identity: Identity,
        detector: &'a D,
        extractor: &'a FeatureExtractor,
        required: usize,
    ) -> Result<Self, EnrollmentError> {
        if required == 0 {
            return Err(EnrollmentError::InvalidThreshold);
        }
        Ok(Self {
            detector,
            extractor,
            identity,
            required,
            samples: Vec::new(),
            frames_seen: 0,
            state: SessionState::Collecting,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Samples collected so far.
    pub fn collected(&self) -> usize {
        self.samples.len()
    }

    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    /// Detect faces in `frame` and add one sample per detected region.
    /// Returns the number of samples added (zero when no face was found).
    pub fn submit(&mut self, frame: &Frame) -> Result<usize, EnrollmentError> {
        self.ensure_collecting()?;

        let regions = self.detector.detect(frame);
        for region in &regions {
            self.samples.push(self.extractor.extract(frame, region)?);
        }
        self.frames_seen += 1;

        tracing::debug!(
            identity = %self.identity,
            frame = self.frames_seen,
            faces = regions.len(),
            collected = self.samples.len(),
            "enroll: frame processed"
        );

        Ok(regions.len())
    }

    /// Submit at most `window` frames pulled from `frames`. Returns the
    /// number of samples added.
    pub fn capture<I>(&mut self, frames: I, window: usize) -> Result<usize, EnrollmentError>
    where
        I: IntoIterator<Item = Frame>,
    {
        let mut added = 0;
        for frame in frames.into_iter().take(window) {
            added += self.submit(&frame)?;
        }
        Ok(added)
    }

    /// Close the session.
    ///
    /// With at least `required` samples, keeps exactly the first `required`
    /// in arrival order and returns them as a batch. Otherwise the attempt
    /// fails with `EnrollmentIncomplete` and the samples are discarded.
    pub fn finalize(&mut self) -> Result<EnrollmentBatch, EnrollmentError> {
        self.ensure_collecting()?;

        let collected = self.samples.len();
        if collected < self.required {
            self.state = SessionState::Insufficient;
            self.samples.clear();
            tracing::info!(
                identity = %self.identity,
                collected,
                required = self.required,
                "enroll: not enough samples"
            );
            return Err(EnrollmentError::EnrollmentIncomplete {
                collected,
                required: self.required,
            });
        }

        self.state = SessionState::Sufficient;
        let mut samples = std::mem::take(&mut self.samples);
        samples.truncate(self.required);

        tracing::info!(
            identity = %self.identity,
            collected,
            kept = samples.len(),
            frames = self.frames_seen,
            "enroll: batch finalized"
        );

        Ok(EnrollmentBatch::new(self.identity.clone(), samples))
    }

    fn ensure_collecting(&self) -> Result<(), EnrollmentError> {
        match self.state {
            SessionState::Collecting => Ok(()),
            closed => Err(EnrollmentError::SessionClosed(closed)),
        }
    }
}
