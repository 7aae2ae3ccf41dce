//! Database operations for match suggestions and popularity accounting.

use crate::data::models::{MatchSuggestion, RankTier, SuggestionStatus, TrustLevel};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;

/// A suggestion produced by a cycle run, ready for persistence.
#[derive(Debug, Clone)]
pub struct NewSuggestion {
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
}

/// Persist a cycle's output in one transaction.
///
/// Prior *pending* suggestions for the scored targets are cleared first;
/// rows the user has already acted on (viewed or beyond) survive, and the
/// conflict clause keeps the new cycle from resurrecting those pairs.
/// Popularity rows are written in the same transaction so a failed write
/// leaves no partial fairness accounting behind.
pub async fn persist_cycle_output(
    db_pool: &PgPool,
    cycle_id: Option<i64>,
    scored_targets: &[i64],
    rows: &[NewSuggestion],
    popularity: &[(i64, i32)],
    config_snapshot: &Value,
    suggested_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    let mut tx = db_pool.begin().await?;

    let cleared = sqlx::query(
        "DELETE FROM match_suggestions WHERE target_profile_id = ANY($1) AND status = 'pending'",
    )
    .bind(scored_targets)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if !rows.is_empty() {
        let targets: Vec<i64> = rows.iter().map(|r| r.target_profile_id).collect();
        let candidates: Vec<i64> = rows.iter().map(|r| r.candidate_profile_id).collect();
        let scores_ab: Vec<f32> = rows.iter().map(|r| r.score_ab).collect();
        let scores_ba: Vec<f32> = rows.iter().map(|r| r.score_ba).collect();
        let harmonics: Vec<f32> = rows.iter().map(|r| r.harmonic_mean).collect();
        let symmetries: Vec<f32> = rows.iter().map(|r| r.scale_symmetry).collect();
        let trusts: Vec<TrustLevel> = rows.iter().map(|r| r.trust_level).collect();
        let reasons: Vec<String> = rows.iter().map(|r| r.match_reason.clone()).collect();
        let ranks: Vec<i32> = rows.iter().map(|r| r.rank).collect();
        let tiers: Vec<RankTier> = rows.iter().map(|r| r.rank_tier).collect();

        sqlx::query(
            r#"
            INSERT INTO match_suggestions (
                cycle_id, target_profile_id, candidate_profile_id,
                score_ab, score_ba, harmonic_mean, scale_symmetry,
                trust_level, match_reason, rank, rank_tier,
                config_snapshot, suggested_at, expires_at
            )
            SELECT $1, v.target_id, v.candidate_id,
                   v.score_ab, v.score_ba, v.harmonic_mean, v.scale_symmetry,
                   v.trust, v.reason, v.rank, v.tier,
                   $12, $13, $14
            FROM UNNEST(
                $2::int8[], $3::int8[], $4::real[], $5::real[], $6::real[], $7::real[],
                $8::trust_level[], $9::text[], $10::int4[], $11::rank_tier[]
            ) AS v(target_id, candidate_id, score_ab, score_ba, harmonic_mean,
                   scale_symmetry, trust, reason, rank, tier)
            ON CONFLICT (target_profile_id, candidate_profile_id) DO NOTHING
            "#,
        )
        .bind(cycle_id)
        .bind(&targets)
        .bind(&candidates)
        .bind(&scores_ab)
        .bind(&scores_ba)
        .bind(&harmonics)
        .bind(&symmetries)
        .bind(&trusts)
        .bind(&reasons)
        .bind(&ranks)
        .bind(&tiers)
        .bind(config_snapshot)
        .bind(suggested_at)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
    }

    if !popularity.is_empty() {
        let Some(cycle_id) = cycle_id else {
            anyhow::bail!("popularity rows require a cycle id");
        };
        let profile_ids: Vec<i64> = popularity.iter().map(|(id, _)| *id).collect();
        let counts: Vec<i32> = popularity.iter().map(|(_, n)| *n).collect();

        sqlx::query(
            r#"
            INSERT INTO popularity (profile_id, cycle_id, top3_appearances)
            SELECT v.profile_id, $1, v.count
            FROM UNNEST($2::int8[], $3::int4[]) AS v(profile_id, count)
            "#,
        )
        .bind(cycle_id)
        .bind(&profile_ids)
        .bind(&counts)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        cycle_id,
        cleared,
        inserted = rows.len(),
        popularity_rows = popularity.len(),
        "cycle output persisted"
    );

    Ok(())
}

/// Suggestions for one target, best first.
pub async fn list_for_target(db_pool: &PgPool, profile_id: i64) -> Result<Vec<MatchSuggestion>> {
    let rows = sqlx::query_as::<_, MatchSuggestion>(
        "SELECT * FROM match_suggestions WHERE target_profile_id = $1 ORDER BY rank",
    )
    .bind(profile_id)
    .fetch_all(db_pool)
    .await?;
    Ok(rows)
}

/// Advance a suggestion's status, enforcing the monotone lifecycle.
pub async fn update_status(
    db_pool: &PgPool,
    suggestion_id: i64,
    next: SuggestionStatus,
) -> Result<()> {
    let mut tx = db_pool.begin().await?;

    let (current,): (SuggestionStatus,) =
        sqlx::query_as("SELECT status FROM match_suggestions WHERE id = $1 FOR UPDATE")
            .bind(suggestion_id)
            .fetch_one(&mut *tx)
            .await?;

    if !current.can_transition_to(next) {
        anyhow::bail!(
            "illegal status transition {current:?} -> {next:?} for suggestion {suggestion_id}"
        );
    }

    sqlx::query("UPDATE match_suggestions SET status = $2 WHERE id = $1")
        .bind(suggestion_id)
        .bind(next)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Drop pending suggestions whose expiry has passed.
pub async fn delete_expired(db_pool: &PgPool, now: DateTime<Utc>) -> Result<u64> {
    let deleted = sqlx::query(
        "DELETE FROM match_suggestions WHERE status = 'pending' AND expires_at < $1",
    )
    .bind(now)
    .execute(db_pool)
    .await?
    .rows_affected();
    Ok(deleted)
}

/// Top-3 appearance counts for a cycle, keyed by candidate profile.
pub async fn load_popularity(db_pool: &PgPool, cycle_id: i64) -> Result<Vec<(i64, i32)>> {
    let rows: Vec<(i64, i32)> = sqlx::query_as(
        "SELECT profile_id, top3_appearances FROM popularity WHERE cycle_id = $1 ORDER BY profile_id",
    )
    .bind(cycle_id)
    .fetch_all(db_pool)
    .await?;
    Ok(rows)
}
