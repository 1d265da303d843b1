use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("identity must not be empty")]
pub struct InvalidIdentity;

/// Caller-supplied voter key (e.g. a national ID number).
///
/// Opaque: the only validation is that it is not blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidIdentity> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(InvalidIdentity);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = InvalidIdentity;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Axis-aligned face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }
}

/// Fixed-length face descriptor: the flattened RGB intensities of a
/// normalized face crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// One stored descriptor together with the identity that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSample {
    pub identity: Identity,
    pub descriptor: Descriptor,
}

/// Samples collected for one identity during one enrollment attempt, in
/// capture order.
///
/// Normally produced by [`EnrollmentSession::finalize`](crate::EnrollmentSession::finalize),
/// which guarantees the sufficiency threshold was met.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentBatch {
    pub id: Uuid,
    pub identity: Identity,
    pub descriptors: Vec<Descriptor>,
    pub created_at: DateTime<Utc>,
}

impl EnrollmentBatch {
    pub fn new(identity: Identity, descriptors: Vec<Descriptor>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            descriptors,
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Samples in arrival order, each tagged with the batch identity.
    pub fn samples(&self) -> impl Iterator<Item = FaceSample> + '_ {
        self.descriptors.iter().map(|descriptor| FaceSample {
            identity: self.identity.clone(),
            descriptor: descriptor.clone(),
        })
    }

    pub fn receipt(&self) -> EnrollmentReceipt {
        EnrollmentReceipt {
            batch_id: self.id,
            identity: self.identity.clone(),
            samples: self.len(),
            created_at: self.created_at,
        }
    }
}

/// Record of a committed enrollment (a registered voter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentReceipt {
    pub batch_id: Uuid,
    pub identity: Identity,
    pub samples: usize,
    pub created_at: DateTime<Utc>,
}

/// A cast vote. At most one exists per identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub identity: Identity,
    pub choice: String,
    pub cast_at: DateTime<Utc>,
}

/// Outcome of a nearest-neighbor query that found an identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub identity: Identity,
    /// Neighbors that voted for `identity`.
    pub votes: usize,
    /// Neighbors consulted (k, or fewer when the index is smaller).
    pub neighbors: usize,
    /// Euclidean distance to the closest stored sample.
    pub nearest_distance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rejects_blank() {
        assert_eq!(Identity::new(""), Err(InvalidIdentity));
        assert_eq!(Identity::new("   "), Err(InvalidIdentity));
    }

    #[test]
    fn test_identity_is_opaque() {
        let id = Identity::new(" 1234 5678 ").unwrap();
        assert_eq!(id.as_str(), " 1234 5678 ");
    }

    #[test]
    fn test_identity_serde_validates() {
        let ok: Identity = serde_json::from_str("\"123456789012\"").unwrap();
        assert_eq!(ok.as_str(), "123456789012");
        assert!(serde_json::from_str::<Identity>("\"\"").is_err());
    }

    #[test]
    fn test_region_edges() {
        let r = Region::new(10, 20, 30, 40);
        assert_eq!(r.right(), 40);
        assert_eq!(r.bottom(), 60);
    }

    #[test]
    fn test_batch_samples_carry_identity() {
        let id = Identity::new("A").unwrap();
        let batch = EnrollmentBatch::new(
            id.clone(),
            vec![Descriptor::from(vec![1.0]), Descriptor::from(vec![2.0])],
        );
        let samples: Vec<FaceSample> = batch.samples().collect();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.identity == id));
        assert_eq!(samples[1].descriptor.values, vec![2.0]);
        assert_eq!(batch.receipt().samples, 2);
    }
}
