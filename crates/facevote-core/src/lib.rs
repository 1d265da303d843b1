//! facevote-core — Face enrollment, verification and the one-vote ledger.
//!
//! Frames are scanned by an OpenCV-format Haar-cascade detector on their
//! luma plane, face regions become raw 50×50 RGB descriptors, and
//! identities are resolved by k-nearest neighbor majority vote over every
//! enrolled sample. Votes are recorded
//! through an atomic insert-if-absent so each identity votes at most once.

pub mod detector;
pub mod enrollment;
pub mod extractor;
pub mod frame;
pub mod index;
pub mod ledger;
pub mod registry;
pub mod station;
pub mod store;
pub mod types;
pub mod verification;

pub use detector::{CascadeDetector, Detector, DetectorParams};
pub use enrollment::{EnrollmentSession, SessionState};
pub use extractor::FeatureExtractor;
pub use frame::Frame;
pub use index::IdentityIndex;
pub use ledger::VoteLedger;
pub use registry::FaceRegistry;
pub use station::{PollingStation, StationError, StationStatus};
pub use store::{InMemoryLedgerStore, InMemorySampleStore, LedgerStore, SampleStore, StoreError};
pub use types::{
    Classification, Descriptor, EnrollmentBatch, EnrollmentReceipt, FaceSample, Identity, Region,
    Vote,
};
pub use verification::{Verification, VerificationQuery};
