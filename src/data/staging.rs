//! Database operations for the inbound record staging table.
//!
//! External collaborators (directory export glue, transcript extraction)
//! write raw records here; the resolver drains them at the start of each
//! cycle.

use crate::data::models::{RecordSource, StagedRecord};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

/// Stage a batch of raw record payloads for later resolution.
pub async fn stage_records(
    db_pool: &PgPool,
    source: RecordSource,
    payloads: &[Value],
) -> Result<u64> {
    if payloads.is_empty() {
        return Ok(0);
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO staged_records (source, payload)
        SELECT $1, v.payload FROM UNNEST($2::jsonb[]) AS v(payload)
        "#,
    )
    .bind(source)
    .bind(payloads)
    .execute(db_pool)
    .await?
    .rows_affected();

    Ok(inserted)
}

/// All records not yet resolved, oldest first.
pub async fn fetch_unresolved(db_pool: &PgPool) -> Result<Vec<StagedRecord>> {
    let rows = sqlx::query_as::<_, StagedRecord>(
        "SELECT * FROM staged_records WHERE resolved_at IS NULL ORDER BY staged_at, id",
    )
    .fetch_all(db_pool)
    .await?;
    Ok(rows)
}

/// Mark a set of staged records as resolved.
pub async fn mark_resolved(
    db_pool: &PgPool,
    ids: &[i64],
    resolved_at: DateTime<Utc>,
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query("UPDATE staged_records SET resolved_at = $2 WHERE id = ANY($1)")
        .bind(ids)
        .bind(resolved_at)
        .execute(db_pool)
        .await?;
    Ok(())
}
