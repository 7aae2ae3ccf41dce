//! Database operations for canonical profiles.

use crate::data::models::Profile;
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Load every profile, ordered by id for deterministic downstream iteration.
pub async fn load_profiles(db_pool: &PgPool) -> Result<Vec<Profile>> {
    let profiles = sqlx::query_as::<_, Profile>("SELECT * FROM profiles ORDER BY id")
        .fetch_all(db_pool)
        .await?;
    Ok(profiles)
}

/// Load one profile by id.
pub async fn load_profile(db_pool: &PgPool, profile_id: i64) -> Result<Option<Profile>> {
    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
        .bind(profile_id)
        .fetch_optional(db_pool)
        .await?;
    Ok(profile)
}

/// Event attendance pairs `(profile_id, event_id)` across all intake history,
/// confirmed or not. Attendance is a fact of submission, not of confirmation.
pub async fn load_event_attendance(db_pool: &PgPool) -> Result<Vec<(i64, String)>> {
    let rows: Vec<(i64, String)> =
        sqlx::query_as("SELECT DISTINCT profile_id, event_id FROM intake_submissions")
            .fetch_all(db_pool)
            .await?;
    Ok(rows)
}

/// Record external activity for a profile (webinar attended, email opened,
/// directory login). Drives the momentum component.
pub async fn bump_last_active(
    db_pool: &PgPool,
    profile_id: i64,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE profiles
         SET last_active_at = GREATEST(COALESCE(last_active_at, $2), $2), updated_at = NOW()
         WHERE id = $1",
    )
    .bind(profile_id)
    .bind(at)
    .execute(db_pool)
    .await?;
    Ok(())
}
