//! Configuration module for the matchbook application.
//!
//! Configuration is loaded from environment variables via figment. Matching
//! tunables live in [`MatchingConfig`], which is also serialized verbatim
//! onto every suggestion row as the reproducibility snapshot. Duration
//! fields accept both numeric values (seconds) and strings with units.

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Deserialize)]
pub struct Config {
    /// Log level for the application
    ///
    /// This value sets the level for this application's target specifically,
    /// e.g. "debug" behaves like "warn,matchbook=debug".
    ///
    /// Valid values are: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Database connection URL
    pub database_url: String,
    /// Matching pipeline tunables (flattened into the same env namespace)
    #[serde(flatten)]
    pub matching: MatchingConfig,
}

/// Default log level of "info"
fn default_log_level() -> String {
    "info".to_string()
}

/// Tunables of the matching pipeline.
///
/// Serialized as-is into `match_suggestions.config_snapshot` so a stored
/// suggestion can always be traced back to the thresholds that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Maximum candidates retained per target profile
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Maximum number of targets in whose Top-3 one candidate may appear per cycle
    #[serde(default = "default_popularity_cap")]
    pub popularity_cap: u32,
    /// Suggestion lifetime in days from cycle start
    #[serde(default = "default_expiry_days")]
    pub expiry_days: i64,
    /// Oracle similarity above which a need/offer pair counts as an intent match
    #[serde(default = "default_semantic_match_threshold")]
    pub semantic_match_threshold: f64,
    /// Jaccard overlap at or above which the fallback counts an intent match
    #[serde(default = "default_intent_fallback_threshold")]
    pub intent_fallback_threshold: f64,
    /// Similarity at or above which two niches count as identical
    #[serde(default = "default_niche_identical_threshold")]
    pub niche_identical_threshold: f64,
    /// Similarity at or above which two niches count as client-adjacent
    #[serde(default = "default_niche_adjacent_threshold")]
    pub niche_adjacent_threshold: f64,
    /// Whether the external semantic oracle is consulted at all
    #[serde(default)]
    pub oracle_enabled: bool,
    /// Pairs per oracle call; the oracle contract requires batching
    #[serde(default = "default_oracle_batch_size")]
    pub oracle_batch_size: usize,
    /// Per-batch oracle timeout before falling back to Jaccard
    #[serde(
        default = "default_oracle_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration_secs"
    )]
    pub oracle_timeout: Duration,
    /// Parallel scorer shards; targets are partitioned across this many tasks
    #[serde(default = "default_scorer_shards")]
    pub scorer_shards: usize,
    /// Reach below which a profile counts as a beginner for anti-persona filtering
    #[serde(default = "default_beginner_reach_floor")]
    pub beginner_reach_floor: i64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            top_k: default_top_k(),
            popularity_cap: default_popularity_cap(),
            expiry_days: default_expiry_days(),
            semantic_match_threshold: default_semantic_match_threshold(),
            intent_fallback_threshold: default_intent_fallback_threshold(),
            niche_identical_threshold: default_niche_identical_threshold(),
            niche_adjacent_threshold: default_niche_adjacent_threshold(),
            oracle_enabled: false,
            oracle_batch_size: default_oracle_batch_size(),
            oracle_timeout: default_oracle_timeout(),
            scorer_shards: default_scorer_shards(),
            beginner_reach_floor: default_beginner_reach_floor(),
        }
    }
}

fn default_top_k() -> usize {
    20
}

fn default_popularity_cap() -> u32 {
    5
}

fn default_expiry_days() -> i64 {
    7
}

fn default_semantic_match_threshold() -> f64 {
    0.65
}

fn default_intent_fallback_threshold() -> f64 {
    0.30
}

fn default_niche_identical_threshold() -> f64 {
    0.85
}

fn default_niche_adjacent_threshold() -> f64 {
    0.40
}

/// Default of 64 pairs per call; the oracle contract asks for at least 32
fn default_oracle_batch_size() -> usize {
    64
}

/// Default per-batch oracle timeout of 10 seconds
fn default_oracle_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_scorer_shards() -> usize {
    4
}

fn default_beginner_reach_floor() -> i64 {
    500
}

/// Duration parser that accepts seconds (default unit), milliseconds and
/// minutes, with optional whitespace between number and unit.
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Deserializer for duration fields accepting both numeric and string values.
///
/// - `10` -> 10 seconds
/// - `"1500ms"` -> 1.5 seconds
/// - `"2m"` -> 2 minutes
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "Invalid duration format '{}': {}. Examples: '5' (5 seconds), '1500ms', '30s', '2m'",
                        value, e
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("Duration conversion error: {}", e)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("Duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

/// Serialize durations as whole seconds so the config snapshot stays flat.
fn serialize_duration_secs<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(value.as_secs())
}
