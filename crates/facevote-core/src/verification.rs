//! Verification: match one live frame against the identity index.

use crate::detector::Detector;
use crate::extractor::{ExtractError, FeatureExtractor};
use crate::frame::Frame;
use crate::index::{IdentityIndex, IndexError};
use crate::types::{Classification, Descriptor, Identity};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("index query failed: {0}")]
    Index(#[from] IndexError),
}

/// Outcome of verifying one frame. Keeps "no face" and "no match" apart.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    NoFace,
    /// A face was found but the index holds no samples.
    NoMatch,
    Matched(Classification),
}

impl Verification {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Verification::Matched(c) => Some(&c.identity),
            _ => None,
        }
    }
}

pub struct VerificationQuery<'a, D: ?Sized> {
    detector: &'a D,
    extractor: &'a FeatureExtractor,
    index: &'a IdentityIndex,
}

impl<'a, D: Detector + ?Sized> VerificationQuery<'a, D> {
    pub fn new(detector: &'a D, extractor: &'a FeatureExtractor, index: &'a IdentityIndex) -> Self {
        Self { detector, extractor, index }
    }

    /// Best-matching identity for the face in `frame`, or `None` when there
    /// is no face or nothing to match against.
    pub fn verify(&self, frame: &Frame) -> Result<Option<Identity>, VerifyError> {
        Ok(match self.verify_detailed(frame)? {
            Verification::Matched(c) => Some(c.identity),
            Verification::NoFace | Verification::NoMatch => None,
        })
    }

    /// Only the first region the detector reports is matched; later regions
    /// are ignored regardless of size.
    pub fn verify_detailed(&self, frame: &Frame) -> Result<Verification, VerifyError> {
        match first_face_descriptor(self.detector, self.extractor, frame)? {
            Some(descriptor) => Ok(match_descriptor(self.index, &descriptor)?),
            None => Ok(Verification::NoFace),
        }
    }
}

/// Descriptor of the first region the detector reports, if any.
///
/// Needs no index, so callers can run it before taking the index lock.
pub fn first_face_descriptor<D: Detector + ?Sized>(
    detector: &D,
    extractor: &FeatureExtractor,
    frame: &Frame,
) -> Result<Option<Descriptor>, VerifyError> {
    let regions = detector.detect(frame);
    let Some(region) = regions.first() else {
        tracing::debug!("verify: no face detected");
        return Ok(None);
    };
    if regions.len() > 1 {
        tracing::debug!(faces = regions.len(), "verify: using first detected region");
    }
    Ok(Some(extractor.extract(frame, region)?))
}

/// Classify a face descriptor against `index`.
pub fn match_descriptor(
    index: &IdentityIndex,
    descriptor: &Descriptor,
) -> Result<Verification, IndexError> {
    let outcome = match index.classify(descriptor)? {
        Some(classification) => {
            tracing::info!(
                identity = %classification.identity,
                votes = classification.votes,
                neighbors = classification.neighbors,
                distance = classification.nearest_distance,
                "verify: matched"
            );
            Verification::Matched(classification)
        }
        None => {
            tracing::info!("verify: index is empty");
            Verification::NoMatch
        }
    };
    Ok(outcome)
}
