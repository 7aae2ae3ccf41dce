mod helpers;

use helpers::{ProfileSeed, frozen_now, insert_profile, stage_record};
use matchbook::resolver::resolve_staged;
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test]
async fn staged_email_match_merges_and_fills_nulls(pool: PgPool) {
    let id = insert_profile(
        &pool,
        ProfileSeed {
            name: "Sarah Chen",
            email: Some("sarah@chenmedia.com"),
            ..Default::default()
        },
    )
    .await;
    stage_record(
        &pool,
        "directory",
        json!({
            "name": "Sarah C.",
            "email": "SARAH@chenmedia.com",
            "company": "Chen Media",
            "niche": "health & wellness",
            "list_size": 12000
        }),
    )
    .await;

    let stats = resolve_staged(&pool, frozen_now()).await.unwrap();
    assert_eq!(stats.merged, 1);
    assert_eq!(stats.created, 0);

    let (company, niche, list_size): (Option<String>, Option<String>, i32) = sqlx::query_as(
        "SELECT company, niche, list_size FROM profiles WHERE id = $1",
    )
    .bind(id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(company.as_deref(), Some("Chen Media"));
    assert_eq!(niche.as_deref(), Some("health & wellness"));
    assert_eq!(list_size, 12000);

    // Staged row consumed
    let unresolved: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM staged_records WHERE resolved_at IS NULL")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(unresolved, 0);
}

#[sqlx::test]
async fn conflicting_value_lands_in_field_history(pool: PgPool) {
    let id = insert_profile(
        &pool,
        ProfileSeed {
            name: "Sarah Chen",
            email: Some("sarah@chenmedia.com"),
            company: Some("Chen Media"),
            ..Default::default()
        },
    )
    .await;
    stage_record(
        &pool,
        "directory",
        json!({
            "name": "Sarah Chen",
            "email": "sarah@chenmedia.com",
            "company": "Chen Media Group"
        }),
    )
    .await;

    resolve_staged(&pool, frozen_now()).await.unwrap();

    // Older value kept
    let (company,): (Option<String>,) =
        sqlx::query_as("SELECT company FROM profiles WHERE id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(company.as_deref(), Some("Chen Media"));

    // Newer value preserved in history
    let (field, rejected): (String, String) = sqlx::query_as(
        "SELECT field, rejected_value FROM profile_field_history WHERE profile_id = $1",
    )
    .bind(id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(field, "company");
    assert_eq!(rejected, "Chen Media Group");
}

#[sqlx::test]
async fn unmatched_record_creates_transcript_profile(pool: PgPool) {
    stage_record(
        &pool,
        "transcript",
        json!({
            "name": "Devon Okafor",
            "suggested_offers": ["podcast production"],
            "suggested_needs": ["sponsorships"]
        }),
    )
    .await;

    let stats = resolve_staged(&pool, frozen_now()).await.unwrap();
    assert_eq!(stats.created, 1);

    let (name, source, offers): (String, String, Vec<String>) = sqlx::query_as(
        "SELECT display_name, source::TEXT, suggested_offers FROM profiles",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(name, "Devon Okafor");
    assert_eq!(source, "transcript");
    assert_eq!(offers, vec!["podcast production"]);
}

#[sqlx::test]
async fn fuzzy_match_goes_to_review_not_merge(pool: PgPool) {
    let id = insert_profile(
        &pool,
        ProfileSeed {
            name: "Katherine Reyes",
            ..Default::default()
        },
    )
    .await;
    stage_record(&pool, "directory", json!({ "name": "Kathrine Reyes" })).await;

    let stats = resolve_staged(&pool, frozen_now()).await.unwrap();
    assert_eq!(stats.review, 1);
    assert_eq!(stats.merged, 0);
    assert_eq!(stats.created, 0);

    let (matched_id, similarity, resolved): (i64, f32, bool) = sqlx::query_as(
        "SELECT matched_profile_id, similarity, resolved FROM resolution_review_queue",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(matched_id, id);
    assert!(similarity >= 0.80);
    assert!(!resolved);

    // Still exactly one profile
    assert_eq!(helpers::count_rows(&pool, "profiles").await, 1);
}

#[sqlx::test]
async fn bad_records_are_counted_not_fatal(pool: PgPool) {
    stage_record(&pool, "directory", json!({ "name": "   " })).await;
    stage_record(
        &pool,
        "directory",
        json!({ "name": "Jordan Blake", "list_size": -10 }),
    )
    .await;
    stage_record(&pool, "directory", json!({ "name": "Priya Nair" })).await;

    let stats = resolve_staged(&pool, frozen_now()).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.created, 1);
}

#[sqlx::test]
async fn ambiguous_exact_match_skips_the_record(pool: PgPool) {
    insert_profile(
        &pool,
        ProfileSeed {
            name: "Sarah Chen",
            email: Some("sarah1@example.com"),
            company: Some("Chen Media"),
            ..Default::default()
        },
    )
    .await;
    insert_profile(
        &pool,
        ProfileSeed {
            name: "Sarah Chen",
            email: Some("sarah2@example.com"),
            company: Some("Chen Media"),
            ..Default::default()
        },
    )
    .await;
    stage_record(
        &pool,
        "directory",
        json!({ "name": "Sarah Chen", "company": "Chen Media" }),
    )
    .await;

    let stats = resolve_staged(&pool, frozen_now()).await.unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.merged, 0);
    assert_eq!(helpers::count_rows(&pool, "profiles").await, 2);
}
