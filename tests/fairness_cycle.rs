mod helpers;

use helpers::{ProfileSeed, frozen_now, insert_profile};
use matchbook::config::MatchingConfig;
use matchbook::data::suggestions::load_popularity;
use matchbook::matching::run_cycle;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Seed a population where one profile is everyone's best match: the star
/// offers exactly what every other profile seeks, while the rest offer
/// something nobody wants.
async fn seed_star_population(pool: &PgPool, others: usize) -> i64 {
    let star = insert_profile(
        pool,
        ProfileSeed {
            name: "Star Partner",
            niche: Some("health & wellness"),
            offering: Some("video editing"),
            seeking: Some("course launch swaps"),
            list_size: 5000,
            active_days_ago: Some(0),
            ..Default::default()
        },
    )
    .await;

    for i in 0..others {
        sqlx::query(
            "INSERT INTO profiles (display_name, niche, offering, seeking, list_size, last_active_at)
             VALUES ($1, 'health & wellness', 'course launch swaps', 'video editing', 5000, $2)",
        )
        .bind(format!("Member {i}"))
        .bind(frozen_now())
        .execute(pool)
        .await
        .unwrap();
    }

    star
}

#[sqlx::test]
async fn popularity_cap_bounds_top3_appearances_across_a_cycle(pool: PgPool) {
    let star = seed_star_population(&pool, 10).await;

    let config = MatchingConfig::default();
    let report = run_cycle(
        &pool,
        None,
        &config,
        "cap-test",
        frozen_now(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    // The star would naturally sit in ten Top-3 lists; the cap keeps five
    let star_top3: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM match_suggestions WHERE candidate_profile_id = $1 AND rank <= 3",
    )
    .bind(star)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(star_top3, config.popularity_cap as i64);
    assert!(report.pairs_dropped_by_fairness >= 5);

    let popularity = load_popularity(&pool, report.cycle_id).await.unwrap();
    let star_count = popularity
        .iter()
        .find(|(id, _)| *id == star)
        .map(|(_, n)| *n)
        .unwrap();
    assert_eq!(star_count, config.popularity_cap as i32);

    // Nobody exceeds the cap
    for (_, count) in popularity {
        assert!(count <= config.popularity_cap as i32);
    }

    // Demoted pairs survive below the Top-3 rather than disappearing
    let star_total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM match_suggestions WHERE candidate_profile_id = $1",
    )
    .bind(star)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(star_total, 10);
}

#[sqlx::test]
async fn rank_tiers_follow_rank_bands(pool: PgPool) {
    seed_star_population(&pool, 11).await;

    run_cycle(
        &pool,
        None,
        &MatchingConfig::default(),
        "tier-test",
        frozen_now(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let rows: Vec<(i32, String)> = sqlx::query_as(
        "SELECT DISTINCT rank, rank_tier::TEXT FROM match_suggestions ORDER BY rank",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    for (rank, tier) in rows {
        let expected = match rank {
            1..=3 => "gold",
            4..=8 => "silver",
            _ => "bronze",
        };
        assert_eq!(tier, expected, "rank {rank}");
    }
}
