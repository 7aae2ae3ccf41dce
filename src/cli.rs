use clap::{Parser, Subcommand};

/// Matchbook - reciprocal JV partner matching for community directories
///
/// Runs the offline matching pipeline against the configured database:
/// resolve staged records into canonical profiles, assemble feature bundles,
/// score every eligible pair reciprocally, apply the popularity cap, and
/// persist ranked suggestions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum TracingFormat {
    /// Use pretty formatter (default in debug mode)
    Pretty,
    /// Use JSON formatter (default in release mode)
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a full match cycle
    RunCycle {
        /// Cycle name recorded on the cycle row
        #[arg(long, default_value = "adhoc")]
        name: String,
    },
    /// Recompute suggestions for a single profile
    RunProfile {
        /// Target profile id
        profile_id: i64,
    },
    /// Resolve a JSON file of raw records into profiles immediately
    Ingest {
        /// Path to a JSON array of records
        file: std::path::PathBuf,
        /// Provenance of the records
        #[arg(long, value_enum, default_value_t = IngestSource::Directory)]
        source: IngestSource,
    },
    /// Record external activity for a profile (bumps last_active_at)
    RecordActivity {
        /// Profile id that was active
        profile_id: i64,
    },
    /// Drop pending suggestions whose expiry has passed
    ExpireSuggestions,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum IngestSource {
    Directory,
    Transcript,
}

impl From<IngestSource> for crate::data::models::RecordSource {
    fn from(value: IngestSource) -> Self {
        match value {
            IngestSource::Directory => crate::data::models::RecordSource::Directory,
            IngestSource::Transcript => crate::data::models::RecordSource::Transcript,
        }
    }
}

#[cfg(debug_assertions)]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Pretty;
#[cfg(not(debug_assertions))]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Json;

fn default_tracing_format() -> TracingFormat {
    DEFAULT_TRACING_FORMAT
}
