//! Freshness and trust classification.
//!
//! Pure functions over a profile, its latest confirmed intake and the
//! caller-supplied clock. Trust drives the final score modifier; the
//! freshness class feeds re-engagement (Sleeping Giant flagging), not
//! scoring.

use crate::data::models::{IntakeSubmission, Profile, RecordSource, TrustLevel};
use chrono::{DateTime, Duration, Utc};

/// Window within which a confirmed intake or activity counts as recent.
pub const RECENT_WINDOW_DAYS: i64 = 30;

/// Reach above which an inactive profile is worth waking up.
pub const SLEEPING_GIANT_REACH: i64 = 5000;

/// Whether `ts` falls within the recent window ending at `now`.
fn is_recent(ts: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    ts.is_some_and(|t| t > now - Duration::days(RECENT_WINDOW_DAYS))
}

/// Whether the intake is confirmed recently enough to qualify as Platinum.
pub fn is_platinum_intake(intake: Option<&IntakeSubmission>, now: DateTime<Utc>) -> bool {
    intake.is_some_and(|i| is_recent(i.confirmed_at, now))
}

/// Provenance classification of the data backing a profile's features.
///
/// Platinum: verified intent confirmed within the window. Gold: manually
/// maintained directory fields with no recent intake. Bronze: nothing but
/// transcript-inferred signals. Legacy: none of the above.
pub fn trust_source(
    profile: &Profile,
    intake: Option<&IntakeSubmission>,
    now: DateTime<Utc>,
) -> TrustLevel {
    if is_platinum_intake(intake, now) {
        return TrustLevel::Platinum;
    }

    let has_directory_fields = profile.source == RecordSource::Directory
        && (profile.niche.is_some()
            || profile.offering.is_some()
            || profile.seeking.is_some()
            || profile.what_you_do.is_some());
    if has_directory_fields {
        return TrustLevel::Gold;
    }

    let transcript_only = profile.source == RecordSource::Transcript
        || !profile.suggested_offers.is_empty()
        || !profile.suggested_needs.is_empty();
    if transcript_only {
        return TrustLevel::Bronze;
    }

    TrustLevel::Legacy
}

/// Activity classification for re-engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessClass {
    /// Confirmed intake within the window.
    Platinum,
    /// Active within the window but no recent confirmed intake.
    BronzeActive,
    /// Neither.
    Legacy,
}

#[derive(Debug, Clone, Copy)]
pub struct Freshness {
    pub class: FreshnessClass,
    /// High-reach profile that has gone quiet.
    pub sleeping_giant: bool,
}

pub fn classify(
    profile: &Profile,
    intake: Option<&IntakeSubmission>,
    now: DateTime<Utc>,
) -> Freshness {
    let class = if is_platinum_intake(intake, now) {
        FreshnessClass::Platinum
    } else if is_recent(profile.last_active_at, now) {
        FreshnessClass::BronzeActive
    } else {
        FreshnessClass::Legacy
    };

    Freshness {
        class,
        sleeping_giant: class == FreshnessClass::Legacy && profile.reach() > SLEEPING_GIANT_REACH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 15, 12, 0, 0).unwrap()
    }

    fn bare_profile() -> Profile {
        Profile {
            id: 1,
            display_name: "Sarah Chen".to_string(),
            email: None,
            company: None,
            website: None,
            niche: None,
            audience: None,
            list_size: 0,
            social_reach: 0,
            last_active_at: None,
            offering: None,
            seeking: None,
            what_you_do: None,
            suggested_offers: vec![],
            suggested_needs: vec![],
            source: RecordSource::Directory,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn intake_confirmed(days_ago: i64) -> IntakeSubmission {
        IntakeSubmission {
            id: 1,
            profile_id: 1,
            event_id: "summit-2025".to_string(),
            event_name: "Partner Summit".to_string(),
            event_date: None,
            verified_offers: vec![],
            verified_needs: vec![],
            match_preferences: vec![],
            anti_personas: vec![],
            suggested_offers: vec![],
            suggested_needs: vec![],
            confirmed_at: Some(now() - Duration::days(days_ago)),
            created_at: now() - Duration::days(days_ago),
        }
    }

    #[test]
    fn recent_confirmed_intake_is_platinum() {
        let p = bare_profile();
        let i = intake_confirmed(10);
        assert_eq!(trust_source(&p, Some(&i), now()), TrustLevel::Platinum);
    }

    #[test]
    fn stale_intake_is_not_platinum() {
        let mut p = bare_profile();
        p.niche = Some("health & wellness".to_string());
        let i = intake_confirmed(45);
        assert_eq!(trust_source(&p, Some(&i), now()), TrustLevel::Gold);
    }

    #[test]
    fn directory_fields_without_intake_are_gold() {
        let mut p = bare_profile();
        p.offering = Some("Done-for-you funnels".to_string());
        assert_eq!(trust_source(&p, None, now()), TrustLevel::Gold);
    }

    #[test]
    fn transcript_only_is_bronze() {
        let mut p = bare_profile();
        p.source = RecordSource::Transcript;
        assert_eq!(trust_source(&p, None, now()), TrustLevel::Bronze);
    }

    #[test]
    fn suggested_fields_alone_are_bronze() {
        let mut p = bare_profile();
        p.suggested_needs = vec!["video editor".to_string()];
        assert_eq!(trust_source(&p, None, now()), TrustLevel::Bronze);
    }

    #[test]
    fn empty_directory_profile_is_legacy() {
        assert_eq!(trust_source(&bare_profile(), None, now()), TrustLevel::Legacy);
    }

    #[test]
    fn classify_platinum_beats_activity() {
        let mut p = bare_profile();
        p.last_active_at = Some(now() - Duration::days(2));
        let i = intake_confirmed(5);
        let f = classify(&p, Some(&i), now());
        assert_eq!(f.class, FreshnessClass::Platinum);
        assert!(!f.sleeping_giant);
    }

    #[test]
    fn classify_recent_activity_is_bronze_active() {
        let mut p = bare_profile();
        p.last_active_at = Some(now() - Duration::days(29));
        let f = classify(&p, None, now());
        assert_eq!(f.class, FreshnessClass::BronzeActive);
    }

    #[test]
    fn sleeping_giant_needs_reach_and_silence() {
        let mut p = bare_profile();
        p.list_size = 4000;
        p.social_reach = 2000;
        let f = classify(&p, None, now());
        assert_eq!(f.class, FreshnessClass::Legacy);
        assert!(f.sleeping_giant);

        // Same reach but recently active: not sleeping
        p.last_active_at = Some(now() - Duration::days(1));
        let f = classify(&p, None, now());
        assert!(!f.sleeping_giant);
    }

    #[test]
    fn small_inactive_profile_is_not_a_giant() {
        let mut p = bare_profile();
        p.list_size = 500;
        let f = classify(&p, None, now());
        assert!(!f.sleeping_giant);
    }
}
