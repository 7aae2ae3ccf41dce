//! Database operations for per-event intake submissions.

use crate::data::models::IntakeSubmission;
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use std::collections::HashMap;

/// Fields accepted when recording an intake submission.
///
/// Offers and needs are capped at two entries each; the intake form enforces
/// the same limit, so longer lists indicate a misbehaving collaborator.
#[derive(Debug, Clone, Default)]
pub struct NewIntake {
    pub event_name: String,
    pub event_date: Option<NaiveDate>,
    pub verified_offers: Vec<String>,
    pub verified_needs: Vec<String>,
    pub match_preferences: Vec<String>,
    pub anti_personas: Vec<String>,
    pub suggested_offers: Vec<String>,
    pub suggested_needs: Vec<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Insert or update the intake for `(profile_id, event_id)`.
///
/// Confirmed intakes are immutable: once `confirmed_at` is set the row is
/// never overwritten, it is superseded by later confirmed intakes instead
/// (latest confirmed wins at read time).
pub async fn record_intake(
    db_pool: &PgPool,
    profile_id: i64,
    event_id: &str,
    intake: &NewIntake,
) -> Result<Option<i64>> {
    if intake.verified_offers.len() > 2 || intake.verified_needs.len() > 2 {
        anyhow::bail!(
            "intake for profile {profile_id} at event '{event_id}' exceeds two offers/needs"
        );
    }

    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO intake_submissions (
            profile_id, event_id, event_name, event_date,
            verified_offers, verified_needs, match_preferences, anti_personas,
            suggested_offers, suggested_needs, confirmed_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (profile_id, event_id) DO UPDATE SET
            event_name = EXCLUDED.event_name,
            event_date = EXCLUDED.event_date,
            verified_offers = EXCLUDED.verified_offers,
            verified_needs = EXCLUDED.verified_needs,
            match_preferences = EXCLUDED.match_preferences,
            anti_personas = EXCLUDED.anti_personas,
            suggested_offers = EXCLUDED.suggested_offers,
            suggested_needs = EXCLUDED.suggested_needs,
            confirmed_at = EXCLUDED.confirmed_at
        WHERE intake_submissions.confirmed_at IS NULL
        RETURNING id
        "#,
    )
    .bind(profile_id)
    .bind(event_id)
    .bind(&intake.event_name)
    .bind(intake.event_date)
    .bind(&intake.verified_offers)
    .bind(&intake.verified_needs)
    .bind(&intake.match_preferences)
    .bind(&intake.anti_personas)
    .bind(&intake.suggested_offers)
    .bind(&intake.suggested_needs)
    .bind(intake.confirmed_at)
    .fetch_optional(db_pool)
    .await?;

    // None means the existing row is already confirmed and was left intact.
    Ok(row.map(|(id,)| id))
}

/// Latest confirmed intake per profile, keyed by profile id.
pub async fn load_latest_confirmed(db_pool: &PgPool) -> Result<HashMap<i64, IntakeSubmission>> {
    let rows = sqlx::query_as::<_, IntakeSubmission>(
        r#"
        SELECT DISTINCT ON (profile_id) *
        FROM intake_submissions
        WHERE confirmed_at IS NOT NULL
        ORDER BY profile_id, confirmed_at DESC
        "#,
    )
    .fetch_all(db_pool)
    .await?;

    Ok(rows.into_iter().map(|i| (i.profile_id, i)).collect())
}
