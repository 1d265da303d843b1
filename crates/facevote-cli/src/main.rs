mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facevote_core::{
    CascadeDetector, FaceRegistry, FeatureExtractor, Frame, Identity, PollingStation,
    StationStatus, Verification, VoteLedger,
};
use facevote_store::SqliteStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Registry = FaceRegistry<Arc<SqliteStore>>;
type Ledger = VoteLedger<Arc<SqliteStore>>;
type Station = PollingStation<CascadeDetector, Arc<SqliteStore>, Arc<SqliteStore>>;

#[derive(Parser)]
#[command(name = "facevote", about = "Face-verified one-vote-per-voter polling station")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a voter from a sequence of frames
    Enroll {
        /// Voter identity (e.g. national ID number)
        #[arg(short, long)]
        identity: String,
        /// Frame images, in capture order
        #[arg(required = true)]
        frames: Vec<PathBuf>,
    },
    /// Identify the face in a frame
    Verify {
        frame: PathBuf,
    },
    /// Verify the voter in a frame and record their vote
    Vote {
        #[arg(short, long)]
        choice: String,
        frame: PathBuf,
    },
    /// List registered voters
    List,
    /// Show enrolled identities, stored samples and votes cast
    Status,
    /// Show votes per choice
    Tally,
}

#[derive(Serialize)]
struct VerifyReport {
    face_detected: bool,
    identity: Option<Identity>,
    votes: Option<usize>,
    neighbors: Option<usize>,
    nearest_distance: Option<f32>,
}

impl From<Verification> for VerifyReport {
    fn from(outcome: Verification) -> Self {
        match outcome {
            Verification::NoFace => Self {
                face_detected: false,
                identity: None,
                votes: None,
                neighbors: None,
                nearest_distance: None,
            },
            Verification::NoMatch => Self {
                face_detected: true,
                identity: None,
                votes: None,
                neighbors: None,
                nearest_distance: None,
            },
            Verification::Matched(c) => Self {
                face_detected: true,
                identity: Some(c.identity),
                votes: Some(c.votes),
                neighbors: Some(c.neighbors),
                nearest_distance: Some(c.nearest_distance),
            },
        }
    }
}

#[derive(Serialize)]
struct TallyReport<'a> {
    options: Option<Vec<&'a str>>,
    votes: BTreeMap<String, u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = config::Config::from_env();
    let (registry, ledger) = open_records(&config)?;

    match cli.command {
        Commands::Enroll { identity, frames } => {
            let identity = Identity::new(identity).context("invalid identity")?;
            if frames.len() > config.frames_per_enroll {
                tracing::warn!(
                    given = frames.len(),
                    window = config.frames_per_enroll,
                    "extra frames ignored"
                );
            }

            let station = open_station(&config, registry, ledger)?;
            let mut session = station.begin_enrollment(identity)?;
            for path in frames.iter().take(config.frames_per_enroll) {
                session.submit(&load_frame(path)?)?;
            }
            let receipt = station
                .complete_enrollment(&mut session)
                .context("enrollment failed")?;
            print_json(&receipt)?;
        }
        Commands::Verify { frame } => {
            let station = open_station(&config, registry, ledger)?;
            let outcome = station.verify(&load_frame(&frame)?)?;
            print_json(&VerifyReport::from(outcome))?;
        }
        Commands::Vote { choice, frame } => {
            let station = open_station(&config, registry, ledger)?;
            let vote = station
                .cast_vote(&load_frame(&frame)?, &choice)
                .context("vote not recorded")?;
            print_json(&vote)?;
        }
        Commands::List => {
            print_json(&registry.enrollments()?)?;
        }
        Commands::Status => {
            print_json(&StationStatus::collect(&registry, &ledger)?)?;
        }
        Commands::Tally => {
            let report = TallyReport {
                options: ledger
                    .options()
                    .map(|set| set.iter().map(String::as_str).collect()),
                votes: ledger.tally()?,
            };
            print_json(&report)?;
        }
    }

    Ok(())
}

/// Database-backed state every subcommand needs.
fn open_records(config: &config::Config) -> Result<(Registry, Ledger)> {
    let store = Arc::new(
        SqliteStore::open(&config.db_path, config.busy_timeout())
            .with_context(|| format!("opening database {}", config.db_path.display()))?,
    );
    let registry =
        FaceRegistry::open(Arc::clone(&store), config.neighbors).context("loading enrollments")?;
    let ledger = VoteLedger::new(store).with_options(config.choices.iter().cloned());
    Ok((registry, ledger))
}

/// Only commands that look at frames load the cascade.
fn open_station(config: &config::Config, registry: Registry, ledger: Ledger) -> Result<Station> {
    let detector = CascadeDetector::load(&config.cascade_path, config.detector_params())
        .with_context(|| format!("loading cascade {}", config.cascade_path.display()))?;

    Ok(PollingStation::new(
        detector,
        FeatureExtractor::default(),
        registry,
        ledger,
        config.samples_required,
    ))
}

fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path).with_context(|| format!("reading frame {}", path.display()))?;
    Frame::from_image(&image).with_context(|| format!("decoding frame {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
