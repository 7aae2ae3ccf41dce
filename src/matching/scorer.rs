//! Reciprocal pair scoring.
//!
//! For an ordered pair (A, B) the directional score is a weighted sum of
//! four components, each clamped to [0, 1]:
//!
//! ```text
//! S_AB = 0.45·Intent(A,B) + 0.25·Synergy(A,B) + 0.20·Momentum(B) + 0.10·Context(A,B)
//! ```
//!
//! The two directions combine through a harmonic mean, which punishes
//! one-sided pairs (zero on either side zeroes the pair), and the result is
//! weighted by the weaker side's trust level. Scores are carried on a 0–100
//! scale once combined.

use crate::config::MatchingConfig;
use crate::data::models::{MatchPreference, TrustLevel};
use crate::matching::features::FeatureBundle;
use crate::matching::semantic::{Similarity, SimilarityCache};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

pub const WEIGHT_INTENT: f64 = 0.45;
pub const WEIGHT_SYNERGY: f64 = 0.25;
pub const WEIGHT_MOMENTUM: f64 = 0.20;
pub const WEIGHT_CONTEXT: f64 = 0.10;

/// Momentum halves roughly every 35 days.
const MOMENTUM_DECAY_PER_DAY: f64 = 0.02;

/// Momentum when `last_active_at` is unknown.
const MOMENTUM_UNKNOWN: f64 = 0.5;

/// Scale modifier when either reach is zero or unknown.
const SCALE_UNKNOWN: f64 = 0.8;

/// Shared-event bonus per event, capped at 1.0.
const CONTEXT_PER_EVENT: f64 = 0.25;

/// How two niches relate, as seen through A's requested preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NicheRelation {
    Identical,
    Adjacent,
    Unrelated,
}

/// The preference/relation cell that won the niche score, kept for the
/// reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicheOutcome {
    PeerIdentical,
    PeerDifferent,
    ReferralCompetitor,
    ReferralAdjacent,
    ReferralUnrelated,
    ServiceProvider,
}

impl NicheOutcome {
    fn score(self) -> f64 {
        match self {
            NicheOutcome::PeerIdentical => 1.0,
            NicheOutcome::PeerDifferent => 0.2,
            // Same niche on a referral ask means a competitor, not a partner
            NicheOutcome::ReferralCompetitor => 0.1,
            NicheOutcome::ReferralAdjacent => 0.9,
            NicheOutcome::ReferralUnrelated => 0.3,
            NicheOutcome::ServiceProvider => 0.7,
        }
    }
}

/// One direction of a scored pair, with its component breakdown.
#[derive(Debug, Clone)]
pub struct DirectionalScore {
    /// Weighted sum in [0, 1].
    pub total: f64,
    pub intent: f64,
    pub synergy: f64,
    pub momentum: f64,
    pub context: f64,
    /// Strongest matching (need, offer) pair when intent fired.
    pub intent_pair: Option<(String, String)>,
    pub niche_outcome: NicheOutcome,
    /// min/max reach ratio, 0 when either side is unknown.
    pub scale_ratio: f64,
    pub shared_events: usize,
}

/// A fully scored ordered pair, ready for ranking and persistence.
#[derive(Debug, Clone)]
pub struct ScoredPair {
    pub target_id: i64,
    pub candidate_id: i64,
    /// Directional scores on the 0–100 scale.
    pub score_ab: f64,
    pub score_ba: f64,
    /// Harmonic mean of the directional scores, 0–100, before trust.
    pub harmonic_mean: f64,
    /// Ranking score: harmonic mean weighted by the pair's trust modifier.
    pub final_score: f64,
    pub trust: TrustLevel,
    pub scale_symmetry: f64,
    /// |S_AB − S_BA| on the 0–100 scale; smaller is more reciprocal.
    pub symmetry_gap: f64,
    pub candidate_last_active: Option<DateTime<Utc>>,
    pub reason: String,
}

/// Does A need anything B offers? Binary, citing the strongest pair.
fn intent(
    a: &FeatureBundle,
    b: &FeatureBundle,
    sim: &SimilarityCache,
    config: &MatchingConfig,
) -> (f64, Option<(String, String)>) {
    if a.needs.is_empty() || b.offers.is_empty() {
        return (0.0, None);
    }

    let mut best: Option<(f64, String, String)> = None;
    for need in &a.needs {
        for offer in &b.offers {
            let matched = match sim.lookup(need, offer) {
                Similarity::Oracle(v) => (v > config.semantic_match_threshold).then_some(v),
                Similarity::Jaccard(v) => (v >= config.intent_fallback_threshold).then_some(v),
            };
            if let Some(v) = matched
                && best.as_ref().is_none_or(|(b, _, _)| v > *b)
            {
                best = Some((v, need.clone(), offer.clone()));
            }
        }
    }

    match best {
        Some((_, need, offer)) => (1.0, Some((need, offer))),
        None => (0.0, None),
    }
}

fn niche_relation(
    a: Option<&str>,
    b: Option<&str>,
    sim: &SimilarityCache,
    config: &MatchingConfig,
) -> NicheRelation {
    let (Some(a), Some(b)) = (a, b) else {
        return NicheRelation::Unrelated;
    };
    if a == b {
        return NicheRelation::Identical;
    }
    let similarity = sim.lookup(a, b).value();
    if similarity >= config.niche_identical_threshold {
        NicheRelation::Identical
    } else if similarity >= config.niche_adjacent_threshold {
        NicheRelation::Adjacent
    } else {
        NicheRelation::Unrelated
    }
}

/// Business-fit: niche score under A's preferences times the scale modifier.
fn synergy(
    a: &FeatureBundle,
    b: &FeatureBundle,
    sim: &SimilarityCache,
    config: &MatchingConfig,
) -> (f64, NicheOutcome, f64, f64) {
    let relation = niche_relation(a.niche.as_deref(), b.niche.as_deref(), sim, config);

    // Max niche score across A's selected preferences; BTreeSet iteration
    // keeps ties deterministic.
    let mut outcome: Option<NicheOutcome> = None;
    for pref in &a.preferences {
        let candidate = match (pref, relation) {
            (MatchPreference::PeerBundle, NicheRelation::Identical) => NicheOutcome::PeerIdentical,
            (MatchPreference::PeerBundle, _) => NicheOutcome::PeerDifferent,
            (MatchPreference::ServiceProvider, _) => NicheOutcome::ServiceProvider,
            (_, NicheRelation::Identical) => NicheOutcome::ReferralCompetitor,
            (_, NicheRelation::Adjacent) => NicheOutcome::ReferralAdjacent,
            (_, NicheRelation::Unrelated) => NicheOutcome::ReferralUnrelated,
        };
        if outcome.is_none_or(|o| candidate.score() > o.score()) {
            outcome = Some(candidate);
        }
    }
    let outcome = outcome.unwrap_or(NicheOutcome::PeerDifferent);

    let (scale, ratio) = scale_modifier(a, b);
    (outcome.score() * scale, outcome, scale, ratio)
}

/// Scale modifier and the min/max reach ratio diagnostic.
fn scale_modifier(a: &FeatureBundle, b: &FeatureBundle) -> (f64, f64) {
    let ratio = if a.reach > 0 && b.reach > 0 {
        a.reach.min(b.reach) as f64 / a.reach.max(b.reach) as f64
    } else {
        0.0
    };

    // Service providers are expected to be smaller than their clients
    if a.service_provider_only() {
        return (1.0, ratio);
    }
    if a.reach <= 0 || b.reach <= 0 {
        return (SCALE_UNKNOWN, ratio);
    }

    let modifier = if ratio > 0.5 {
        1.0
    } else if ratio < 0.1 {
        0.5
    } else {
        0.5 + (ratio - 0.1) * (0.5 / 0.4)
    };
    (modifier, ratio)
}

/// Time-decayed activity of the recipient.
fn momentum(b: &FeatureBundle, now: DateTime<Utc>) -> f64 {
    match b.last_active_at {
        Some(t) => {
            let days = (now - t).num_seconds() as f64 / 86_400.0;
            (-MOMENTUM_DECAY_PER_DAY * days.max(0.0)).exp()
        }
        None => MOMENTUM_UNKNOWN,
    }
}

fn shared_events(a: &FeatureBundle, b: &FeatureBundle) -> usize {
    a.events.intersection(&b.events).count()
}

/// Shared-event bonus.
fn context(a: &FeatureBundle, b: &FeatureBundle) -> f64 {
    (CONTEXT_PER_EVENT * shared_events(a, b) as f64).min(1.0)
}

/// Compute the directional score A → B.
pub fn directional(
    a: &FeatureBundle,
    b: &FeatureBundle,
    sim: &SimilarityCache,
    config: &MatchingConfig,
    now: DateTime<Utc>,
) -> DirectionalScore {
    let (intent_score, intent_pair) = intent(a, b, sim, config);
    let (synergy_score, niche_outcome, _, scale_ratio) = synergy(a, b, sim, config);
    let momentum_score = momentum(b, now);
    let context_score = context(a, b);
    let shared = shared_events(a, b);

    let intent_score = intent_score.clamp(0.0, 1.0);
    let synergy_score = synergy_score.clamp(0.0, 1.0);
    let momentum_score = momentum_score.clamp(0.0, 1.0);
    let context_score = context_score.clamp(0.0, 1.0);

    DirectionalScore {
        total: WEIGHT_INTENT * intent_score
            + WEIGHT_SYNERGY * synergy_score
            + WEIGHT_MOMENTUM * momentum_score
            + WEIGHT_CONTEXT * context_score,
        intent: intent_score,
        synergy: synergy_score,
        momentum: momentum_score,
        context: context_score,
        intent_pair,
        niche_outcome,
        scale_ratio,
        shared_events: shared,
    }
}

/// Harmonic mean of two scores on the same scale; zero if either is zero.
pub fn harmonic_mean(a: f64, b: f64) -> f64 {
    if a + b <= 0.0 {
        0.0
    } else {
        2.0 * a * b / (a + b)
    }
}

/// Human-readable explanation assembled from the target-side direction.
fn reason_string(ab: &DirectionalScore, a_platinum: bool) -> String {
    let mut clauses: Vec<String> = Vec::new();

    if let Some((need, offer)) = &ab.intent_pair {
        clauses.push(format!("You need {need} and they offer {offer}"));
    }
    match ab.niche_outcome {
        NicheOutcome::PeerIdentical => clauses.push("Strong business alignment".to_string()),
        NicheOutcome::ReferralAdjacent => clauses.push("Complementary referral fit".to_string()),
        NicheOutcome::ReferralCompetitor => {
            clauses.push("Competitor — low recommendation".to_string())
        }
        _ => {}
    }
    if ab.momentum > 0.8 {
        clauses.push("Very active recently".to_string());
    } else if ab.momentum < 0.3 {
        clauses.push("Less active".to_string());
    }
    if ab.shared_events > 0 {
        clauses.push(format!("Attended {} shared event(s)", ab.shared_events));
    }
    if a_platinum {
        clauses.push("✅ Verified intent".to_string());
    }

    clauses.join(". ")
}

/// Score the ordered pair (target = A, candidate = B).
///
/// Returns `None` when the pair is ineligible: self-pair, or either side in
/// the other's anti-persona exclusion set.
pub fn score_pair(
    a: &FeatureBundle,
    b: &FeatureBundle,
    sim: &SimilarityCache,
    config: &MatchingConfig,
    now: DateTime<Utc>,
) -> Option<ScoredPair> {
    if a.profile_id == b.profile_id {
        return None;
    }
    if a.excludes(b, config.beginner_reach_floor) || b.excludes(a, config.beginner_reach_floor) {
        return None;
    }

    let ab = directional(a, b, sim, config, now);
    let ba = directional(b, a, sim, config, now);

    let score_ab = ab.total * 100.0;
    let score_ba = ba.total * 100.0;
    let hm = harmonic_mean(score_ab, score_ba);
    let trust = a.trust.min(b.trust);

    let reason = reason_string(&ab, a.trust == TrustLevel::Platinum);

    Some(ScoredPair {
        target_id: a.profile_id,
        candidate_id: b.profile_id,
        score_ab,
        score_ba,
        harmonic_mean: hm,
        final_score: hm * trust.modifier(),
        trust,
        scale_symmetry: ab.scale_ratio,
        symmetry_gap: (score_ab - score_ba).abs(),
        candidate_last_active: b.last_active_at,
        reason,
    })
}

/// Deterministic ordering of one target's candidates: final score, then
/// trust, then reciprocity, then candidate recency, then candidate id.
pub fn rank_cmp(x: &ScoredPair, y: &ScoredPair) -> Ordering {
    y.final_score
        .total_cmp(&x.final_score)
        .then_with(|| y.trust.cmp(&x.trust))
        .then_with(|| x.symmetry_gap.total_cmp(&y.symmetry_gap))
        .then_with(|| y.candidate_last_active.cmp(&x.candidate_last_active))
        .then_with(|| x.candidate_id.cmp(&y.candidate_id))
}
