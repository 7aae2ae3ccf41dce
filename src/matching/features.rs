//! Feature assembly: the per-profile bundle the scorer reads.
//!
//! The bundle table is built once per cycle from three loads (profiles,
//! latest confirmed intakes, event attendance) and then held immutable for
//! the duration. Verified intake data is the sole source of offers and
//! needs; transcript suggestions are informational and never feed them.

use crate::data::models::{
    AntiPersona, IntakeSubmission, MatchPreference, Profile, TrustLevel,
};
use crate::data::names::normalize_text;
use crate::error::DataErrorKind;
use crate::matching::freshness;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use tracing::warn;

static SENTENCE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?;\n]+").expect("static regex"));

/// Split free text on sentence boundaries into trimmed, non-empty clauses.
pub fn split_sentences(text: &str) -> Vec<String> {
    SENTENCE_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Everything the scorer needs to know about one profile.
#[derive(Debug, Clone)]
pub struct FeatureBundle {
    pub profile_id: i64,
    pub display_name: String,
    pub offers: Vec<String>,
    pub needs: Vec<String>,
    pub preferences: BTreeSet<MatchPreference>,
    pub anti_personas: BTreeSet<AntiPersona>,
    /// Normalized niche, when known.
    pub niche: Option<String>,
    pub audience: Option<String>,
    pub reach: i64,
    pub last_active_at: Option<DateTime<Utc>>,
    pub events: BTreeSet<String>,
    pub trust: TrustLevel,
    pub sleeping_giant: bool,
}

impl FeatureBundle {
    /// Whether Service_Provider is this profile's only selected preference.
    pub fn service_provider_only(&self) -> bool {
        self.preferences.len() == 1
            && self.preferences.contains(&MatchPreference::ServiceProvider)
    }

    /// Whether this profile opts out of being matched with `other`.
    pub fn excludes(&self, other: &FeatureBundle, beginner_reach_floor: i64) -> bool {
        for anti in &self.anti_personas {
            let hit = match anti {
                AntiPersona::NoBeginners => other.reach < beginner_reach_floor,
                AntiPersona::NoServiceProviders => other.service_provider_only(),
                AntiPersona::NoCompetitors => match (&self.niche, &other.niche) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                },
            };
            if hit {
                return true;
            }
        }
        false
    }
}

/// Bundle table keyed by profile id, iteration order ascending by id.
pub type FeatureTable = IndexMap<i64, FeatureBundle>;

#[derive(Debug, Default)]
pub struct AssemblyOutput {
    pub table: FeatureTable,
    /// Intake records discarded for carrying unknown enum values.
    pub data_errors: usize,
}

/// Parse a TEXT[] enum column, rejecting the whole record on unknown values.
fn parse_enum_set<T: std::str::FromStr<Err = String> + Ord>(
    values: &[String],
) -> Result<BTreeSet<T>, String> {
    values.iter().map(|v| v.parse::<T>()).collect()
}

/// Build the feature bundle for one profile.
///
/// An intake with invalid enum values is treated as absent (the record is
/// skipped, per the data-error policy) and the profile falls back to its
/// directory fields.
fn assemble_one(
    profile: &Profile,
    intake: Option<&IntakeSubmission>,
    events: BTreeSet<String>,
    now: DateTime<Utc>,
    data_errors: &mut usize,
) -> FeatureBundle {
    let mut usable_intake = intake;
    let mut preferences: BTreeSet<MatchPreference> = BTreeSet::new();
    let mut anti_personas: BTreeSet<AntiPersona> = BTreeSet::new();

    if let Some(i) = intake {
        match (
            parse_enum_set::<MatchPreference>(&i.match_preferences),
            parse_enum_set::<AntiPersona>(&i.anti_personas),
        ) {
            (Ok(prefs), Ok(antis)) => {
                preferences = prefs;
                anti_personas = antis;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(
                    profile_id = profile.id,
                    intake_id = i.id,
                    kind = %DataErrorKind::InvalidEnum,
                    error = %e,
                    "discarding intake with invalid enum values"
                );
                *data_errors += 1;
                usable_intake = None;
            }
        }
    }

    let platinum = freshness::is_platinum_intake(usable_intake, now);

    let (offers, needs) = match usable_intake {
        Some(i) if platinum => (
            i.verified_offers.iter().take(2).cloned().collect(),
            i.verified_needs.iter().take(2).cloned().collect(),
        ),
        _ => (
            profile
                .offering
                .as_deref()
                .map(split_sentences)
                .unwrap_or_default(),
            profile
                .seeking
                .as_deref()
                .map(split_sentences)
                .unwrap_or_default(),
        ),
    };

    if preferences.is_empty() {
        preferences.insert(MatchPreference::PeerBundle);
    }

    let fresh = freshness::classify(profile, usable_intake, now);

    FeatureBundle {
        profile_id: profile.id,
        display_name: profile.display_name.clone(),
        offers,
        needs,
        preferences,
        anti_personas,
        niche: profile.niche.as_deref().map(normalize_text),
        audience: profile.audience.as_deref().map(normalize_text),
        reach: profile.reach(),
        last_active_at: profile.last_active_at,
        events,
        trust: freshness::trust_source(profile, usable_intake, now),
        sleeping_giant: fresh.sleeping_giant,
    }
}

/// Assemble the full feature table for a cycle.
pub fn assemble(
    profiles: &[Profile],
    intakes: &HashMap<i64, IntakeSubmission>,
    attendance: &[(i64, String)],
    now: DateTime<Utc>,
) -> AssemblyOutput {
    let mut events_by_profile: HashMap<i64, BTreeSet<String>> = HashMap::new();
    for (profile_id, event_id) in attendance {
        events_by_profile
            .entry(*profile_id)
            .or_default()
            .insert(event_id.clone());
    }

    let mut out = AssemblyOutput::default();
    for profile in profiles {
        let bundle = assemble_one(
            profile,
            intakes.get(&profile.id),
            events_by_profile.remove(&profile.id).unwrap_or_default(),
            now,
            &mut out.data_errors,
        );
        out.table.insert(profile.id, bundle);
    }
    out.table.sort_unstable_keys();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::RecordSource;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 15, 12, 0, 0).unwrap()
    }

    fn profile(id: i64) -> Profile {
        Profile {
            id,
            display_name: format!("Person {id}"),
            email: None,
            company: None,
            website: None,
            niche: Some("Health & Wellness".to_string()),
            audience: None,
            list_size: 1000,
            social_reach: 500,
            last_active_at: None,
            offering: Some("Done-for-you funnels. Podcast guesting".to_string()),
            seeking: Some("Looking for a video editor".to_string()),
            what_you_do: None,
            suggested_offers: vec![],
            suggested_needs: vec![],
            source: RecordSource::Directory,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn confirmed_intake(profile_id: i64, days_ago: i64) -> IntakeSubmission {
        IntakeSubmission {
            id: profile_id * 10,
            profile_id,
            event_id: "summit-2025".to_string(),
            event_name: "Partner Summit".to_string(),
            event_date: None,
            verified_offers: vec!["list swaps".to_string()],
            verified_needs: vec!["video editor".to_string()],
            match_preferences: vec!["referral_upstream".to_string()],
            anti_personas: vec!["no_competitors".to_string()],
            suggested_offers: vec!["webinar hosting".to_string()],
            suggested_needs: vec![],
            confirmed_at: Some(now() - Duration::days(days_ago)),
            created_at: now() - Duration::days(days_ago + 1),
        }
    }

    #[test]
    fn split_sentences_trims_and_drops_empties() {
        assert_eq!(
            split_sentences("Done-for-you funnels. Podcast guesting!  "),
            vec!["Done-for-you funnels", "Podcast guesting"]
        );
        assert!(split_sentences("  ").is_empty());
    }

    #[test]
    fn recent_intake_supplies_verified_offers_and_needs() {
        let p = profile(1);
        let i = confirmed_intake(1, 5);
        let mut errors = 0;
        let b = assemble_one(&p, Some(&i), BTreeSet::new(), now(), &mut errors);

        assert_eq!(b.offers, vec!["list swaps"]);
        assert_eq!(b.needs, vec!["video editor"]);
        assert_eq!(b.trust, TrustLevel::Platinum);
        assert!(b.preferences.contains(&MatchPreference::ReferralUpstream));
        assert!(b.anti_personas.contains(&AntiPersona::NoCompetitors));
        assert_eq!(errors, 0);
    }

    #[test]
    fn stale_intake_falls_back_to_profile_text() {
        let p = profile(1);
        let i = confirmed_intake(1, 45);
        let mut errors = 0;
        let b = assemble_one(&p, Some(&i), BTreeSet::new(), now(), &mut errors);

        assert_eq!(b.offers, vec!["Done-for-you funnels", "Podcast guesting"]);
        assert_eq!(b.needs, vec!["Looking for a video editor"]);
        assert_eq!(b.trust, TrustLevel::Gold);
        // Preferences still honored from the (stale but valid) intake
        assert!(b.preferences.contains(&MatchPreference::ReferralUpstream));
    }

    #[test]
    fn no_intake_defaults_to_peer_bundle() {
        let p = profile(1);
        let mut errors = 0;
        let b = assemble_one(&p, None, BTreeSet::new(), now(), &mut errors);
        assert_eq!(
            b.preferences.iter().collect::<Vec<_>>(),
            vec![&MatchPreference::PeerBundle]
        );
        assert!(b.anti_personas.is_empty());
    }

    #[test]
    fn invalid_enum_discards_the_intake_record() {
        let p = profile(1);
        let mut i = confirmed_intake(1, 5);
        i.match_preferences = vec!["soulmate".to_string()];
        let mut errors = 0;
        let b = assemble_one(&p, Some(&i), BTreeSet::new(), now(), &mut errors);

        assert_eq!(errors, 1);
        // Intake discarded entirely: no verified offers, no platinum trust
        assert_eq!(b.trust, TrustLevel::Gold);
        assert_eq!(b.offers, vec!["Done-for-you funnels", "Podcast guesting"]);
        assert_eq!(
            b.preferences.iter().collect::<Vec<_>>(),
            vec![&MatchPreference::PeerBundle]
        );
    }

    #[test]
    fn bronze_suggestions_never_feed_offers() {
        let mut p = profile(1);
        p.offering = None;
        p.seeking = None;
        p.suggested_offers = vec!["ai inferred offer".to_string()];
        p.suggested_needs = vec!["ai inferred need".to_string()];
        let mut errors = 0;
        let b = assemble_one(&p, None, BTreeSet::new(), now(), &mut errors);

        assert!(b.offers.is_empty());
        assert!(b.needs.is_empty());
    }

    #[test]
    fn reach_is_list_plus_social() {
        let p = profile(1);
        let mut errors = 0;
        let b = assemble_one(&p, None, BTreeSet::new(), now(), &mut errors);
        assert_eq!(b.reach, 1500);
    }

    #[test]
    fn excludes_beginners_when_opted_out() {
        let mut errors = 0;
        let mut a = assemble_one(&profile(1), None, BTreeSet::new(), now(), &mut errors);
        a.anti_personas.insert(AntiPersona::NoBeginners);
        let mut b = assemble_one(&profile(2), None, BTreeSet::new(), now(), &mut errors);
        b.reach = 50;

        assert!(a.excludes(&b, 500));
        assert!(!b.excludes(&a, 500));
    }

    #[test]
    fn excludes_competitors_on_identical_niche() {
        let mut errors = 0;
        let mut a = assemble_one(&profile(1), None, BTreeSet::new(), now(), &mut errors);
        a.anti_personas.insert(AntiPersona::NoCompetitors);
        let b = assemble_one(&profile(2), None, BTreeSet::new(), now(), &mut errors);

        assert!(a.excludes(&b, 500));
    }

    #[test]
    fn excludes_service_providers_only_when_sole_preference() {
        let mut errors = 0;
        let mut a = assemble_one(&profile(1), None, BTreeSet::new(), now(), &mut errors);
        a.anti_personas.insert(AntiPersona::NoServiceProviders);

        let mut b = assemble_one(&profile(2), None, BTreeSet::new(), now(), &mut errors);
        b.preferences = BTreeSet::from([MatchPreference::ServiceProvider]);
        assert!(a.excludes(&b, 500));

        b.preferences
            .insert(MatchPreference::PeerBundle);
        assert!(!a.excludes(&b, 500));
    }

    #[test]
    fn assemble_orders_table_by_profile_id() {
        let profiles = vec![profile(3), profile(1), profile(2)];
        let out = assemble(&profiles, &HashMap::new(), &[], now());
        let ids: Vec<i64> = out.table.keys().copied().collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn assemble_collects_event_sets() {
        let profiles = vec![profile(1), profile(2)];
        let attendance = vec![
            (1, "summit-2025".to_string()),
            (1, "retreat-2024".to_string()),
            (2, "summit-2025".to_string()),
        ];
        let out = assemble(&profiles, &HashMap::new(), &attendance, now());
        assert_eq!(out.table[&1].events.len(), 2);
        assert_eq!(out.table[&2].events.len(), 1);
    }
}
