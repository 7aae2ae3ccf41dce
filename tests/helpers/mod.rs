use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

/// Frozen clock for deterministic pipeline runs.
pub fn frozen_now() -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.with_ymd_and_hms(2025, 7, 15, 12, 0, 0).unwrap()
}

/// Seed values for a test profile; only the interesting fields need setting.
#[derive(Debug, Clone, Default)]
pub struct ProfileSeed {
    pub name: &'static str,
    pub email: Option<&'static str>,
    pub company: Option<&'static str>,
    pub niche: Option<&'static str>,
    pub offering: Option<&'static str>,
    pub seeking: Option<&'static str>,
    pub list_size: i32,
    pub social_reach: i32,
    /// Days before the frozen clock; `None` leaves the profile inactive.
    pub active_days_ago: Option<i64>,
}

/// Insert a profile row directly via SQL, returning the generated ID.
pub async fn insert_profile(pool: &PgPool, seed: ProfileSeed) -> i64 {
    let last_active = seed.active_days_ago.map(|d| frozen_now() - Duration::days(d));
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO profiles (display_name, email, company, niche, offering, seeking,
                              list_size, social_reach, last_active_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(seed.name)
    .bind(seed.email)
    .bind(seed.company)
    .bind(seed.niche)
    .bind(seed.offering)
    .bind(seed.seeking)
    .bind(seed.list_size)
    .bind(seed.social_reach)
    .bind(last_active)
    .fetch_one(pool)
    .await
    .expect("insert_profile failed");

    id
}

/// Insert a confirmed intake for a profile at an event.
pub async fn insert_confirmed_intake(
    pool: &PgPool,
    profile_id: i64,
    event_id: &str,
    offers: &[&str],
    needs: &[&str],
    preferences: &[&str],
    anti_personas: &[&str],
    confirmed_days_ago: i64,
) -> i64 {
    let offers: Vec<String> = offers.iter().map(|s| s.to_string()).collect();
    let needs: Vec<String> = needs.iter().map(|s| s.to_string()).collect();
    let preferences: Vec<String> = preferences.iter().map(|s| s.to_string()).collect();
    let anti_personas: Vec<String> = anti_personas.iter().map(|s| s.to_string()).collect();

    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO intake_submissions
            (profile_id, event_id, event_name, verified_offers, verified_needs,
             match_preferences, anti_personas, confirmed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(profile_id)
    .bind(event_id)
    .bind(format!("Event {event_id}"))
    .bind(&offers)
    .bind(&needs)
    .bind(&preferences)
    .bind(&anti_personas)
    .bind(frozen_now() - Duration::days(confirmed_days_ago))
    .fetch_one(pool)
    .await
    .expect("insert_confirmed_intake failed");

    id
}

/// Stage a raw record payload for the resolver.
pub async fn stage_record(pool: &PgPool, source: &str, payload: serde_json::Value) -> i64 {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO staged_records (source, payload) VALUES ($1::record_source, $2) RETURNING id",
    )
    .bind(source)
    .bind(payload)
    .fetch_one(pool)
    .await
    .expect("stage_record failed");
    id
}

/// Count rows in a table; convenient for small assertions.
pub async fn count_rows(pool: &PgPool, table: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count failed");
    n
}
