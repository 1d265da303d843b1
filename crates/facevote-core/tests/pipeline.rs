use facevote_core::enrollment::EnrollmentError;
use facevote_core::ledger::LedgerError;
use facevote_core::{
    CascadeDetector, Detector, DetectorParams, FaceRegistry, FeatureExtractor, Frame, Identity,
    InMemoryLedgerStore, InMemorySampleStore, PollingStation, Region, StationError, Verification,
    VoteLedger,
};
use std::path::Path;
use std::sync::{Arc, Barrier};

/// Always reports the same face region.
struct FixedDetector;

impl Detector for FixedDetector {
    fn detect(&self, _frame: &Frame) -> Vec<Region> {
        vec![Region::new(10, 10, 30, 30)]
    }
}

type Station<D> = PollingStation<D, InMemorySampleStore, InMemoryLedgerStore>;

fn station<D: Detector>(detector: D) -> Station<D> {
    PollingStation::new(
        detector,
        FeatureExtractor::default(),
        FaceRegistry::open(InMemorySampleStore::new(), 5).unwrap(),
        VoteLedger::new(InMemoryLedgerStore::new()).with_options(["X", "Y"]),
        51,
    )
}

fn frames(base: u8, count: usize) -> Vec<Frame> {
    (0..count)
        .map(|i| Frame::filled(64, 64, base + (i % 4) as u8).unwrap())
        .collect()
}

fn id(s: &str) -> Identity {
    Identity::new(s).unwrap()
}

#[test]
fn test_enroll_verify_vote() {
    let station = station(FixedDetector);

    let a = station.enroll(id("A"), frames(60, 70), 100).unwrap();
    assert_eq!(a.samples, 51);
    let b = station.enroll(id("B"), frames(200, 55), 100).unwrap();
    assert_eq!(b.samples, 51);

    let err = station.enroll(id("C"), frames(120, 30), 100).unwrap_err();
    assert!(matches!(
        err,
        StationError::Enrollment(EnrollmentError::EnrollmentIncomplete { collected: 30, required: 51 })
    ));

    let status = station.status().unwrap();
    assert_eq!((status.identities, status.samples, status.votes), (2, 102, 0));

    let probe = Frame::filled(64, 64, 62).unwrap();
    match station.verify(&probe).unwrap() {
        Verification::Matched(c) => {
            assert_eq!(c.identity, id("A"));
            assert_eq!(c.votes, 5);
        }
        other => panic!("expected a match, got {other:?}"),
    }

    let vote = station.cast_vote(&probe, "X").unwrap();
    assert_eq!(vote.identity, id("A"));

    let again = station.cast_vote(&Frame::filled(64, 64, 61).unwrap(), "Y");
    assert!(matches!(
        again,
        Err(StationError::Ledger(LedgerError::DuplicateVote(ref who))) if *who == id("A")
    ));
    assert_eq!(station.ledger().vote_for(&id("A")).unwrap().unwrap().choice, "X");

    let vote = station.cast_vote(&Frame::filled(64, 64, 199).unwrap(), "Y").unwrap();
    assert_eq!(vote.identity, id("B"));
    assert_eq!(station.status().unwrap().votes, 2);
}

#[test]
fn test_window_limits_enrollment() {
    let station = station(FixedDetector);
    let err = station.enroll(id("A"), frames(60, 200), 40).unwrap_err();
    assert!(matches!(
        err,
        StationError::Enrollment(EnrollmentError::EnrollmentIncomplete { collected: 40, .. })
    ));
    assert!(station.registry().index().is_empty());
}

#[test]
fn test_abandoned_session_leaves_no_trace() {
    let station = station(FixedDetector);
    {
        let mut session = station.begin_enrollment(id("A")).unwrap();
        session.capture(frames(60, 80), 100).unwrap();
        assert_eq!(session.collected(), 80);
    }
    assert!(station.registry().index().is_empty());
    assert!(station.registry().enrollments().unwrap().is_empty());
}

#[test]
fn test_unknown_face_on_empty_index() {
    let station = station(FixedDetector);
    let frame = Frame::filled(64, 64, 90).unwrap();
    assert_eq!(station.verify(&frame).unwrap(), Verification::NoMatch);
    assert!(matches!(
        station.cast_vote(&frame, "X"),
        Err(StationError::NotRecognized)
    ));
}

#[test]
fn test_concurrent_cast_single_vote() {
    const BOOTHS: usize = 8;
    let station = Arc::new(station(FixedDetector));
    station.enroll(id("A"), frames(60, 60), 100).unwrap();

    let barrier = Arc::new(Barrier::new(BOOTHS));
    let handles: Vec<_> = (0..BOOTHS)
        .map(|_| {
            let station = Arc::clone(&station);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let frame = Frame::filled(64, 64, 61).unwrap();
                barrier.wait();
                station.cast_vote(&frame, "X").is_ok()
            })
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&ok| ok)
        .count();
    assert_eq!(wins, 1);
    assert_eq!(station.status().unwrap().votes, 1);
}

/// Detector over the vertical-edge cascade shipped with the tests.
fn edge_detector() -> CascadeDetector {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/edge_cascade.xml");
    let params = DetectorParams { scale_factor: 1.3, min_neighbors: 3, min_size: 0 };
    CascadeDetector::load(&path, params).unwrap()
}

#[test]
fn test_cascade_faceless_frame() {
    let station = station(edge_detector());
    let blank = Frame::filled(96, 96, 30).unwrap();
    assert_eq!(station.verify(&blank).unwrap(), Verification::NoFace);
    assert!(matches!(
        station.cast_vote(&blank, "X"),
        Err(StationError::NoFaceDetected)
    ));
}

#[test]
fn test_cascade_detected_but_not_enrolled() {
    let station = station(edge_detector());
    let data = (0..96u32)
        .flat_map(|_| (0..96u32).map(|x| if x < 48 { 250 } else { 5 }))
        .collect();
    let frame = Frame::from_luma(data, 96, 96).unwrap();
    assert_eq!(station.verify(&frame).unwrap(), Verification::NoMatch);
}

#[test]
fn test_colour_separates_equal_brightness() {
    let station = station(FixedDetector);
    let reds = (0..60).map(|i| Frame::filled_rgb(64, 64, [200, 40 + (i % 3) as u8, 40]).unwrap());
    let blues = (0..60).map(|i| Frame::filled_rgb(64, 64, [40, 40 + (i % 3) as u8, 200]).unwrap());
    station.enroll(id("R"), reds, 100).unwrap();
    station.enroll(id("B"), blues, 100).unwrap();

    let probe = Frame::filled_rgb(64, 64, [45, 41, 195]).unwrap();
    assert_eq!(station.verify(&probe).unwrap().identity(), Some(&id("B")));
}
