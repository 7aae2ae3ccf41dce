//! Entity resolution: fusing directory rows and transcript-derived speaker
//! records into canonical profiles.
//!
//! Each inbound record walks a cascade, first success wins:
//!
//! 1. normalized email equality (confidence 1.00) — merge
//! 2. exact normalized name + exact normalized company (0.90) — merge
//! 3. exact normalized name, company absent on either side (0.70) — merge
//! 4. fuzzy name similarity >= 0.80 — staged for manual review, never merged
//! 5. no match — create a new profile
//!
//! Tier-2 ambiguity (multiple exact candidates) is a hard error for that
//! record only; the rest of the batch proceeds.

use crate::data::models::{Profile, RecordSource};
use crate::data::names::{fold_for_fuzzy, normalize_email, normalize_text, subsequence_ratio};
use crate::error::{CycleError, DataErrorKind, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Similarity at or above which a fuzzy name match is staged for review.
const FUZZY_REVIEW_THRESHOLD: f64 = 0.80;

/// An inbound record as staged by a collaborator. Only `name` is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub name: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub website: Option<String>,
    pub niche: Option<String>,
    pub audience: Option<String>,
    pub list_size: Option<i32>,
    pub social_reach: Option<i32>,
    pub offering: Option<String>,
    pub seeking: Option<String>,
    pub what_you_do: Option<String>,
    #[serde(default)]
    pub suggested_offers: Vec<String>,
    #[serde(default)]
    pub suggested_needs: Vec<String>,
}

impl RawRecord {
    fn validate(&self) -> Result<(), CycleError> {
        if self.name.trim().is_empty() {
            return Err(CycleError::Data {
                kind: DataErrorKind::MissingName,
                detail: "record has no name".to_string(),
            });
        }
        if self.list_size.is_some_and(|v| v < 0) || self.social_reach.is_some_and(|v| v < 0) {
            return Err(CycleError::Data {
                kind: DataErrorKind::NegativeReach,
                detail: format!("negative reach for '{}'", self.name),
            });
        }
        Ok(())
    }
}

/// Where a record landed in the cascade.
#[derive(Debug, Clone, PartialEq)]
pub enum TierMatch {
    /// Tier 1: merge by email.
    Email(i64),
    /// Tier 2: merge by name + company.
    NameCompany(i64),
    /// Tier 3: merge by name alone.
    NameOnly(i64),
    /// Tier 2 found several exact candidates; hard error for this record.
    Ambiguous(usize),
    /// Tier 4: closest fuzzy candidate with its similarity.
    Fuzzy(i64, f64),
    /// Tier 5: nothing matched.
    None,
}

/// Counters reported back to the cycle.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct ResolutionStats {
    pub total: usize,
    pub merged: usize,
    pub created: usize,
    pub review: usize,
    pub errors: usize,
}

/// In-memory view of the canonical profile set, kept current as a batch
/// resolves so later records in the batch see earlier merges and creations.
pub struct ResolverIndex {
    profiles: HashMap<i64, Profile>,
    by_email: HashMap<String, i64>,
    by_name_company: HashMap<(String, String), Vec<i64>>,
    by_name: HashMap<String, Vec<i64>>,
    fuzzy_names: Vec<(i64, String)>,
}

impl ResolverIndex {
    pub fn build(profiles: Vec<Profile>) -> Self {
        let mut index = ResolverIndex {
            profiles: HashMap::new(),
            by_email: HashMap::new(),
            by_name_company: HashMap::new(),
            by_name: HashMap::new(),
            fuzzy_names: Vec::new(),
        };
        for profile in profiles {
            index.insert(profile);
        }
        index
    }

    fn insert(&mut self, profile: Profile) {
        let id = profile.id;
        if let Some(email) = profile.email.as_deref() {
            self.by_email.insert(normalize_email(email), id);
        }
        let name = normalize_text(&profile.display_name);
        if let Some(company) = profile.company.as_deref() {
            self.by_name_company
                .entry((name.clone(), normalize_text(company)))
                .or_default()
                .push(id);
        }
        self.by_name.entry(name).or_default().push(id);
        self.fuzzy_names.push((id, fold_for_fuzzy(&profile.display_name)));
        self.profiles.insert(id, profile);
    }

    /// Re-index a profile after a merge filled previously-null fields.
    fn reindex(&mut self, profile: Profile) {
        let id = profile.id;
        if let Some(email) = profile.email.as_deref() {
            self.by_email.entry(normalize_email(email)).or_insert(id);
        }
        if let Some(company) = profile.company.as_deref() {
            let key = (
                normalize_text(&profile.display_name),
                normalize_text(company),
            );
            let ids = self.by_name_company.entry(key).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        self.profiles.insert(id, profile);
    }

    pub fn get(&self, id: i64) -> Option<&Profile> {
        self.profiles.get(&id)
    }

    /// Walk the cascade for one record.
    pub fn match_record(&self, rec: &RawRecord) -> TierMatch {
        // Tier 1: email
        if let Some(email) = rec.email.as_deref() {
            let email = normalize_email(email);
            if !email.is_empty()
                && let Some(&id) = self.by_email.get(&email)
            {
                return TierMatch::Email(id);
            }
        }

        let name = normalize_text(&rec.name);

        // Tier 2: name + company
        if let Some(company) = rec.company.as_deref() {
            let key = (name.clone(), normalize_text(company));
            if let Some(ids) = self.by_name_company.get(&key) {
                match ids.as_slice() {
                    [id] => return TierMatch::NameCompany(*id),
                    many => return TierMatch::Ambiguous(many.len()),
                }
            }
        }

        // Tier 3: name alone, company absent on either side
        if let Some(ids) = self.by_name.get(&name) {
            let eligible: Vec<i64> = ids
                .iter()
                .copied()
                .filter(|id| {
                    rec.company.is_none()
                        || self
                            .profiles
                            .get(id)
                            .is_some_and(|p| p.company.is_none())
                })
                .collect();
            match eligible.as_slice() {
                [] => {}
                [id] => return TierMatch::NameOnly(*id),
                // Several same-name profiles: safest is a human decision on
                // the oldest candidate rather than a blind merge.
                many => {
                    let oldest = many.iter().copied().min().unwrap_or(many[0]);
                    return TierMatch::Fuzzy(oldest, 0.70);
                }
            }
        }

        // Tier 4: fuzzy
        let folded = fold_for_fuzzy(&rec.name);
        let mut best: Option<(i64, f64)> = None;
        for (id, candidate) in &self.fuzzy_names {
            let ratio = subsequence_ratio(&folded, candidate);
            match best {
                Some((_, b)) if ratio <= b => {}
                _ if ratio >= FUZZY_REVIEW_THRESHOLD => best = Some((*id, ratio)),
                _ => {}
            }
        }
        if let Some((id, ratio)) = best {
            return TierMatch::Fuzzy(id, ratio);
        }

        TierMatch::None
    }
}

/// Merge a record into an existing profile.
///
/// Newer non-null fields fill older nulls. When both sides carry different
/// non-null values the older value wins and the newer one is returned as a
/// `(field, rejected_value)` history entry. Transcript suggestions are
/// appended, deduplicated.
pub fn merge_into(profile: &mut Profile, rec: &RawRecord, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
    let mut history = Vec::new();

    fn fill(
        slot: &mut Option<String>,
        incoming: Option<&str>,
        field: &'static str,
        history: &mut Vec<(&'static str, String)>,
    ) {
        let Some(value) = incoming.map(str::trim).filter(|v| !v.is_empty()) else {
            return;
        };
        match slot {
            None => *slot = Some(value.to_string()),
            Some(existing) if normalize_text(existing) != normalize_text(value) => {
                history.push((field, value.to_string()));
            }
            Some(_) => {}
        }
    }

    fill(&mut profile.email, rec.email.as_deref(), "email", &mut history);
    fill(&mut profile.company, rec.company.as_deref(), "company", &mut history);
    fill(&mut profile.website, rec.website.as_deref(), "website", &mut history);
    fill(&mut profile.niche, rec.niche.as_deref(), "niche", &mut history);
    fill(&mut profile.audience, rec.audience.as_deref(), "audience", &mut history);
    fill(&mut profile.offering, rec.offering.as_deref(), "offering", &mut history);
    fill(&mut profile.seeking, rec.seeking.as_deref(), "seeking", &mut history);
    fill(
        &mut profile.what_you_do,
        rec.what_you_do.as_deref(),
        "what_you_do",
        &mut history,
    );

    // Zero means unset for reach counters
    if let Some(v) = rec.list_size.filter(|&v| v > 0) {
        if profile.list_size == 0 {
            profile.list_size = v;
        } else if profile.list_size != v {
            history.push(("list_size", v.to_string()));
        }
    }
    if let Some(v) = rec.social_reach.filter(|&v| v > 0) {
        if profile.social_reach == 0 {
            profile.social_reach = v;
        } else if profile.social_reach != v {
            history.push(("social_reach", v.to_string()));
        }
    }

    for offer in &rec.suggested_offers {
        if !profile.suggested_offers.contains(offer) {
            profile.suggested_offers.push(offer.clone());
        }
    }
    for need in &rec.suggested_needs {
        if !profile.suggested_needs.contains(need) {
            profile.suggested_needs.push(need.clone());
        }
    }

    profile.updated_at = now;
    history
}

/// Resolve a batch of records against the current profile set.
///
/// All writes happen in one transaction; per-record failures are logged and
/// counted without aborting the batch.
pub async fn resolve_batch(
    db_pool: &PgPool,
    records: &[(RecordSource, RawRecord)],
    now: DateTime<Utc>,
) -> Result<ResolutionStats> {
    let profiles = crate::data::profiles::load_profiles(db_pool).await?;
    let mut index = ResolverIndex::build(profiles);
    let mut stats = ResolutionStats {
        total: records.len(),
        ..Default::default()
    };

    let mut tx = db_pool.begin().await?;

    for (source, rec) in records {
        if let Err(e) = rec.validate() {
            warn!(name = %rec.name, error = %e, "skipping bad record");
            stats.errors += 1;
            continue;
        }

        match index.match_record(rec) {
            TierMatch::Email(id) | TierMatch::NameCompany(id) | TierMatch::NameOnly(id) => {
                let mut profile = index.get(id).expect("indexed profile").clone();
                let history = merge_into(&mut profile, rec, now);
                write_merge(&mut tx, &profile, &history, now).await?;
                debug!(profile_id = id, name = %rec.name, "merged record into profile");
                index.reindex(profile);
                stats.merged += 1;
            }
            TierMatch::Ambiguous(count) => {
                let e = CycleError::AmbiguousResolution {
                    name: rec.name.clone(),
                    candidates: count,
                };
                warn!(error = %e, "ambiguous resolution, record skipped");
                stats.errors += 1;
            }
            TierMatch::Fuzzy(id, similarity) => {
                write_review_entry(&mut tx, rec, id, similarity).await?;
                debug!(
                    profile_id = id,
                    similarity, name = %rec.name, "staged fuzzy match for review"
                );
                stats.review += 1;
            }
            TierMatch::None => {
                let profile = insert_profile(&mut tx, *source, rec, now).await?;
                debug!(profile_id = profile.id, name = %rec.name, "created new profile");
                index.insert(profile);
                stats.created += 1;
            }
        }
    }

    tx.commit().await?;

    info!(
        total = stats.total,
        merged = stats.merged,
        created = stats.created,
        review = stats.review,
        errors = stats.errors,
        "resolution batch complete"
    );

    Ok(stats)
}

/// Drain and resolve everything in the staging table.
pub async fn resolve_staged(db_pool: &PgPool, now: DateTime<Utc>) -> Result<ResolutionStats> {
    let staged = crate::data::staging::fetch_unresolved(db_pool).await?;
    if staged.is_empty() {
        return Ok(ResolutionStats::default());
    }

    let mut records = Vec::with_capacity(staged.len());
    let mut ids = Vec::with_capacity(staged.len());
    let mut parse_errors = 0usize;
    for row in &staged {
        ids.push(row.id);
        match serde_json::from_value::<RawRecord>(row.payload.clone()) {
            Ok(rec) => records.push((row.source, rec)),
            Err(e) => {
                warn!(staged_id = row.id, error = %e, "unparseable staged payload");
                parse_errors += 1;
            }
        }
    }

    let mut stats = resolve_batch(db_pool, &records, now).await?;
    stats.total += parse_errors;
    stats.errors += parse_errors;

    crate::data::staging::mark_resolved(db_pool, &ids, now).await?;

    Ok(stats)
}

async fn write_merge(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    profile: &Profile,
    history: &[(&'static str, String)],
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE profiles SET
            email = $2, company = $3, website = $4, niche = $5, audience = $6,
            list_size = $7, social_reach = $8,
            offering = $9, seeking = $10, what_you_do = $11,
            suggested_offers = $12, suggested_needs = $13,
            updated_at = $14
        WHERE id = $1
        "#,
    )
    .bind(profile.id)
    .bind(&profile.email)
    .bind(&profile.company)
    .bind(&profile.website)
    .bind(&profile.niche)
    .bind(&profile.audience)
    .bind(profile.list_size)
    .bind(profile.social_reach)
    .bind(&profile.offering)
    .bind(&profile.seeking)
    .bind(&profile.what_you_do)
    .bind(&profile.suggested_offers)
    .bind(&profile.suggested_needs)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    if !history.is_empty() {
        let fields: Vec<&str> = history.iter().map(|(f, _)| *f).collect();
        let values: Vec<&str> = history.iter().map(|(_, v)| v.as_str()).collect();
        sqlx::query(
            r#"
            INSERT INTO profile_field_history (profile_id, field, rejected_value, observed_at)
            SELECT $1, v.field, v.value, $4
            FROM UNNEST($2::text[], $3::text[]) AS v(field, value)
            "#,
        )
        .bind(profile.id)
        .bind(&fields)
        .bind(&values)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

async fn write_review_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    rec: &RawRecord,
    matched_profile_id: i64,
    similarity: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO resolution_review_queue
            (staged_name, staged_email, staged_company, matched_profile_id, similarity, payload)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&rec.name)
    .bind(&rec.email)
    .bind(&rec.company)
    .bind(matched_profile_id)
    .bind(similarity as f32)
    .bind(serde_json::json!({
        "name": rec.name,
        "email": rec.email,
        "company": rec.company,
        "website": rec.website,
        "niche": rec.niche,
        "offering": rec.offering,
        "seeking": rec.seeking,
    }))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_profile(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    source: RecordSource,
    rec: &RawRecord,
    now: DateTime<Utc>,
) -> Result<Profile> {
    let profile = sqlx::query_as::<_, Profile>(
        r#"
        INSERT INTO profiles (
            display_name, email, company, website, niche, audience,
            list_size, social_reach, offering, seeking, what_you_do,
            suggested_offers, suggested_needs, source, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
        RETURNING *
        "#,
    )
    .bind(rec.name.trim())
    .bind(rec.email.as_deref().map(normalize_email))
    .bind(&rec.company)
    .bind(&rec.website)
    .bind(&rec.niche)
    .bind(&rec.audience)
    .bind(rec.list_size.unwrap_or(0))
    .bind(rec.social_reach.unwrap_or(0))
    .bind(&rec.offering)
    .bind(&rec.seeking)
    .bind(&rec.what_you_do)
    .bind(&rec.suggested_offers)
    .bind(&rec.suggested_needs)
    .bind(source)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    Ok(profile)
}
