//! Database models for the matching schema.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Origin of a canonical profile or staged record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "record_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    Directory,
    Transcript,
}

/// Data provenance classification driving the trust modifier.
///
/// Variant order is data quality order, so `Ord` gives
/// Legacy < Bronze < Gold < Platinum and `min` of two levels is the
/// weaker side of a pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "trust_level", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Legacy,
    Bronze,
    Gold,
    Platinum,
}

impl TrustLevel {
    /// Multiplicative modifier applied to the harmonic mean.
    pub fn modifier(self) -> f64 {
        match self {
            TrustLevel::Platinum => 1.0,
            TrustLevel::Gold => 0.5,
            TrustLevel::Bronze => 0.3,
            TrustLevel::Legacy => 0.1,
        }
    }
}

/// Lifecycle of a stored suggestion. Transitions are monotone:
/// pending → viewed → contacted → (connected | dismissed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "suggestion_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Viewed,
    Contacted,
    Connected,
    Dismissed,
}

impl SuggestionStatus {
    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(self, next: SuggestionStatus) -> bool {
        use SuggestionStatus::*;
        matches!(
            (self, next),
            (Pending, Viewed)
                | (Viewed, Contacted)
                | (Contacted, Connected)
                | (Contacted, Dismissed)
        )
    }
}

/// Display tier derived from a suggestion's final rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rank_tier", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RankTier {
    Gold,
    Silver,
    Bronze,
}

impl RankTier {
    /// Gold 1–3, Silver 4–8, Bronze 9+.
    pub fn from_rank(rank: i32) -> RankTier {
        match rank {
            ..=3 => RankTier::Gold,
            4..=8 => RankTier::Silver,
            _ => RankTier::Bronze,
        }
    }
}

/// Lifecycle of a match cycle row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "cycle_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Running,
    Complete,
    Failed,
    Cancelled,
}

/// Relationship shapes a profile can request from a match.
///
/// Stored as TEXT[] so legacy single-value data reads as a singleton set;
/// unknown values surface as per-record `invalid_enum` data errors instead
/// of poisoning the column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPreference {
    PeerBundle,
    ReferralUpstream,
    ReferralDownstream,
    ServiceProvider,
}

impl MatchPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPreference::PeerBundle => "peer_bundle",
            MatchPreference::ReferralUpstream => "referral_upstream",
            MatchPreference::ReferralDownstream => "referral_downstream",
            MatchPreference::ServiceProvider => "service_provider",
        }
    }

    pub fn is_referral(&self) -> bool {
        matches!(
            self,
            MatchPreference::ReferralUpstream | MatchPreference::ReferralDownstream
        )
    }
}

impl std::str::FromStr for MatchPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "peer_bundle" => Ok(MatchPreference::PeerBundle),
            "referral_upstream" => Ok(MatchPreference::ReferralUpstream),
            "referral_downstream" => Ok(MatchPreference::ReferralDownstream),
            "service_provider" => Ok(MatchPreference::ServiceProvider),
            other => Err(format!("unknown match preference '{other}'")),
        }
    }
}

/// Classes of profiles a user opts out of being matched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiPersona {
    NoBeginners,
    NoServiceProviders,
    NoCompetitors,
}

impl AntiPersona {
    pub fn as_str(&self) -> &'static str {
        match self {
            AntiPersona::NoBeginners => "no_beginners",
            AntiPersona::NoServiceProviders => "no_service_providers",
            AntiPersona::NoCompetitors => "no_competitors",
        }
    }
}

impl std::str::FromStr for AntiPersona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_beginners" => Ok(AntiPersona::NoBeginners),
            "no_service_providers" => Ok(AntiPersona::NoServiceProviders),
            "no_competitors" => Ok(AntiPersona::NoCompetitors),
            other => Err(format!("unknown anti-persona '{other}'")),
        }
    }
}

/// Canonical person record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Profile {
    pub id: i64,
    pub display_name: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub website: Option<String>,
    pub niche: Option<String>,
    pub audience: Option<String>,
    pub list_size: i32,
    pub social_reach: i32,
    pub last_active_at: Option<DateTime<Utc>>,
    pub offering: Option<String>,
    pub seeking: Option<String>,
    pub what_you_do: Option<String>,
    pub suggested_offers: Vec<String>,
    pub suggested_needs: Vec<String>,
    pub source: RecordSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Combined audience reach.
    pub fn reach(&self) -> i64 {
        self.list_size as i64 + self.social_reach as i64
    }
}

/// Verified per-event declaration of intent for a profile.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IntakeSubmission {
    pub id: i64,
    pub profile_id: i64,
    pub event_id: String,
    pub event_name: String,
    pub event_date: Option<NaiveDate>,
    pub verified_offers: Vec<String>,
    pub verified_needs: Vec<String>,
    pub match_preferences: Vec<String>,
    pub anti_personas: Vec<String>,
    pub suggested_offers: Vec<String>,
    pub suggested_needs: Vec<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One match cycle run.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MatchCycle {
    pub id: i64,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: CycleStatus,
    pub report: Option<Value>,
}

/// Stored output of the pipeline for one (target, candidate) pair.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct MatchSuggestion {
    pub id: i64,
    pub cycle_id: Option<i64>,
    pub target_profile_id: i64,
    pub candidate_profile_id: i64,
    pub score_ab: f32,
    pub score_ba: f32,
    pub harmonic_mean: f32,
    pub scale_symmetry: f32,
    pub trust_level: TrustLevel,
    pub match_reason: String,
    pub rank: i32,
    pub rank_tier: RankTier,
    pub status: SuggestionStatus,
    pub config_snapshot: Value,
    pub suggested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Fairness accounting row, scoped to one cycle.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PopularityRow {
    pub profile_id: i64,
    pub cycle_id: i64,
    pub top3_appearances: i32,
}

/// A tier-4 fuzzy match staged for manual review.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReviewQueueEntry {
    pub id: i64,
    pub staged_name: String,
    pub staged_email: Option<String>,
    pub staged_company: Option<String>,
    pub matched_profile_id: i64,
    pub similarity: f32,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}

/// Inbound raw record awaiting resolution.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StagedRecord {
    pub id: i64,
    pub source: RecordSource,
    pub payload: Value,
    pub staged_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}
