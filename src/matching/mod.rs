//! The matching pipeline: feature assembly, reciprocal scoring, fairness
//! filtering, and the cycle driver that runs the stages in order.
//!
//! Stages run sequentially (each depends on the full output of the one
//! before); pair scoring inside the scorer stage is sharded across tokio
//! tasks over an immutable feature table. The database is touched only at
//! stage ingress and egress, and the final write is a single transaction.

pub mod fairness;
pub mod features;
pub mod freshness;
pub mod scorer;
pub mod semantic;

use crate::config::MatchingConfig;
use crate::data::models::{CycleStatus, MatchSuggestion};
use crate::data::suggestions::NewSuggestion;
use crate::error::{CycleError, InvariantKind, Result};
use crate::matching::features::FeatureTable;
use crate::matching::scorer::ScoredPair;
use crate::matching::semantic::{SemanticOracle, SimilarityCache};
use crate::resolver::ResolutionStats;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Counters summarizing one cycle run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: i64,
    pub profiles_loaded: usize,
    pub profiles_scored: usize,
    pub resolution: ResolutionStats,
    /// Records discarded during assembly (invalid enums and the like).
    pub data_errors: usize,
    pub pairs_considered: u64,
    pub pairs_emitted: usize,
    pub pairs_dropped_by_fairness: usize,
    /// Profiles that ended the cycle with zero emitted matches.
    pub orphans: usize,
    /// High-reach profiles that have gone quiet, flagged for re-engagement.
    pub sleeping_giants: usize,
    pub oracle_fallbacks: u64,
    pub oracle_failures: u64,
}

/// The opaque blob persisted on every suggestion row: tunables plus the
/// component weights baked into the scorer.
pub fn config_snapshot(config: &MatchingConfig) -> Value {
    json!({
        "weights": {
            "intent": scorer::WEIGHT_INTENT,
            "synergy": scorer::WEIGHT_SYNERGY,
            "momentum": scorer::WEIGHT_MOMENTUM,
            "context": scorer::WEIGHT_CONTEXT,
        },
        "config": config,
    })
}

fn ensure_live(cancel: &CancellationToken, stage: &'static str) -> Result<(), CycleError> {
    if cancel.is_cancelled() {
        Err(CycleError::Cancelled { stage })
    } else {
        Ok(())
    }
}

/// Run a full match cycle: resolve staged records, assemble features, score
/// all pairs, apply the popularity cap, persist.
///
/// The cycle row is created up front and marked complete/failed/cancelled on
/// the way out. Cancellation is honored at stage boundaries; a cancelled
/// cycle persists nothing.
pub async fn run_cycle(
    db_pool: &PgPool,
    oracle: Option<Arc<dyn SemanticOracle>>,
    config: &MatchingConfig,
    cycle_name: &str,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<CycleReport> {
    let cycle_id = create_cycle(db_pool, cycle_name, now).await?;
    info!(cycle_id, cycle_name, "match cycle started");

    match run_stages(db_pool, oracle, config, cycle_id, now, cancel).await {
        Ok(report) => {
            finish_cycle(
                db_pool,
                cycle_id,
                CycleStatus::Complete,
                Some(serde_json::to_value(&report)?),
            )
            .await?;
            info!(
                cycle_id,
                profiles_scored = report.profiles_scored,
                pairs_emitted = report.pairs_emitted,
                pairs_dropped = report.pairs_dropped_by_fairness,
                orphans = report.orphans,
                "match cycle complete"
            );
            Ok(report)
        }
        Err(e) => {
            let status = match e.downcast_ref::<CycleError>() {
                Some(CycleError::Cancelled { stage }) => {
                    warn!(cycle_id, stage, "match cycle cancelled");
                    CycleStatus::Cancelled
                }
                _ => {
                    warn!(cycle_id, error = ?e, "match cycle failed");
                    CycleStatus::Failed
                }
            };
            finish_cycle(db_pool, cycle_id, status, None).await?;
            Err(e)
        }
    }
}

async fn run_stages(
    db_pool: &PgPool,
    oracle: Option<Arc<dyn SemanticOracle>>,
    config: &MatchingConfig,
    cycle_id: i64,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<CycleReport> {
    // Stage 1: resolver
    ensure_live(cancel, "resolver")?;
    let resolution = crate::resolver::resolve_staged(db_pool, now).await?;

    // Stage 2: feature assembly
    ensure_live(cancel, "assembler")?;
    let profiles = crate::data::profiles::load_profiles(db_pool).await?;
    let intakes = crate::data::intakes::load_latest_confirmed(db_pool).await?;
    let attendance = crate::data::profiles::load_event_attendance(db_pool).await?;
    let profiles_loaded = profiles.len();
    let assembly = features::assemble(&profiles, &intakes, &attendance, now);
    let table = Arc::new(assembly.table);

    // Oracle pre-pass: batch and memoize the only blocking I/O in scoring
    let sim = Arc::new(SimilarityCache::new(oracle));
    sim.prime(
        similarity_pairs(&table),
        config.oracle_batch_size,
        config.oracle_timeout,
    )
    .await;

    // Stage 3: sharded scoring
    ensure_live(cancel, "scorer")?;
    let (per_target, pairs_considered) =
        score_all(table.clone(), sim.clone(), config.clone(), now).await?;
    verify_scores(&per_target)?;

    // Stage 4: fairness
    ensure_live(cancel, "fairness")?;
    let outcome = fairness::apply(&per_target, config.popularity_cap);
    verify_popularity(&outcome.popularity, config.popularity_cap)?;

    ensure_live(cancel, "persist")?;
    let rows = build_rows(&outcome.ranked);
    let scored_targets: Vec<i64> = table.keys().copied().collect();
    crate::data::suggestions::persist_cycle_output(
        db_pool,
        Some(cycle_id),
        &scored_targets,
        &rows,
        &outcome.popularity,
        &config_snapshot(config),
        now,
        now + Duration::days(config.expiry_days),
    )
    .await?;

    let orphans = table
        .keys()
        .filter(|id| outcome.ranked.get(*id).is_none_or(|l| l.is_empty()))
        .count();
    let sleeping_giants = table.values().filter(|b| b.sleeping_giant).count();
    if sleeping_giants > 0 {
        info!(cycle_id, sleeping_giants, "high-reach inactive profiles flagged");
    }

    Ok(CycleReport {
        cycle_id,
        profiles_loaded,
        profiles_scored: table.len(),
        resolution,
        data_errors: assembly.data_errors,
        pairs_considered,
        pairs_emitted: rows.len(),
        pairs_dropped_by_fairness: outcome.dropped_from_top3,
        orphans,
        sleeping_giants,
        oracle_fallbacks: sim.fallback_count(),
        oracle_failures: sim.failure_count(),
    })
}

/// On-demand refresh for a single profile.
///
/// Scores the profile against every candidate and replaces its pending
/// suggestions. The popularity cap is a cycle-scoped budget and is not
/// consumed here.
pub async fn run_for_profile(
    db_pool: &PgPool,
    oracle: Option<Arc<dyn SemanticOracle>>,
    config: &MatchingConfig,
    profile_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<MatchSuggestion>> {
    let profiles = crate::data::profiles::load_profiles(db_pool).await?;
    let intakes = crate::data::intakes::load_latest_confirmed(db_pool).await?;
    let attendance = crate::data::profiles::load_event_attendance(db_pool).await?;
    let assembly = features::assemble(&profiles, &intakes, &attendance, now);

    let Some(target) = assembly.table.get(&profile_id) else {
        anyhow::bail!("profile {profile_id} not found");
    };

    let sim = SimilarityCache::new(oracle);
    sim.prime(
        similarity_pairs(&assembly.table),
        config.oracle_batch_size,
        config.oracle_timeout,
    )
    .await;

    let mut list: Vec<ScoredPair> = assembly
        .table
        .values()
        .filter_map(|candidate| scorer::score_pair(target, candidate, &sim, config, now))
        .collect();
    list.sort_by(scorer::rank_cmp);
    list.truncate(config.top_k);

    let ranked: IndexMap<i64, Vec<fairness::RankedPair>> = IndexMap::from([(
        profile_id,
        list.into_iter()
            .enumerate()
            .map(|(i, pair)| {
                let rank = (i + 1) as i32;
                fairness::RankedPair {
                    pair,
                    rank,
                    tier: crate::data::models::RankTier::from_rank(rank),
                    demoted: false,
                }
            })
            .collect(),
    )]);

    let rows = build_rows(&ranked);
    crate::data::suggestions::persist_cycle_output(
        db_pool,
        None,
        &[profile_id],
        &rows,
        &[],
        &config_snapshot(config),
        now,
        now + Duration::days(config.expiry_days),
    )
    .await?;

    crate::data::suggestions::list_for_target(db_pool, profile_id).await
}

/// Every text pair the scorer may ask the oracle about: needs × offers for
/// intent, niches × niches for synergy. Deduplication happens in the cache.
fn similarity_pairs(table: &FeatureTable) -> Vec<(String, String)> {
    let mut needs: Vec<&String> = Vec::new();
    let mut offers: Vec<&String> = Vec::new();
    let mut niches: Vec<&String> = Vec::new();
    for bundle in table.values() {
        needs.extend(&bundle.needs);
        offers.extend(&bundle.offers);
        if let Some(n) = &bundle.niche {
            niches.push(n);
        }
    }

    let mut pairs = Vec::new();
    for need in &needs {
        for offer in &offers {
            pairs.push(((*need).clone(), (*offer).clone()));
        }
    }
    for a in &niches {
        for b in &niches {
            if a != b {
                pairs.push(((*a).clone(), (*b).clone()));
            }
        }
    }
    pairs
}

/// Score every eligible ordered pair, sharded by target across tokio tasks.
///
/// Each task reads the shared feature table and similarity memo read-only
/// and owns its output buffer; results are merged and re-sorted by target id
/// so the outcome is independent of task completion order.
async fn score_all(
    table: Arc<FeatureTable>,
    sim: Arc<SimilarityCache>,
    config: MatchingConfig,
    now: DateTime<Utc>,
) -> Result<(IndexMap<i64, Vec<ScoredPair>>, u64)> {
    let ids: Vec<i64> = table.keys().copied().collect();
    let shard_size = ids.len().div_ceil(config.scorer_shards.max(1)).max(1);

    let mut join_set: JoinSet<(Vec<(i64, Vec<ScoredPair>)>, u64)> = JoinSet::new();
    for shard in ids.chunks(shard_size) {
        let shard: Vec<i64> = shard.to_vec();
        let table = table.clone();
        let sim = sim.clone();
        let config = config.clone();
        join_set.spawn(async move {
            let mut out = Vec::with_capacity(shard.len());
            let mut considered = 0u64;
            for target_id in shard {
                let target = &table[&target_id];
                let mut list: Vec<ScoredPair> = Vec::new();
                for (candidate_id, candidate) in table.iter() {
                    if *candidate_id == target_id {
                        continue;
                    }
                    considered += 1;
                    if let Some(pair) =
                        scorer::score_pair(target, candidate, &sim, &config, now)
                    {
                        list.push(pair);
                    }
                }
                list.sort_by(scorer::rank_cmp);
                list.truncate(config.top_k);
                out.push((target_id, list));
            }
            (out, considered)
        });
    }

    let mut merged: Vec<(i64, Vec<ScoredPair>)> = Vec::with_capacity(ids.len());
    let mut considered = 0u64;
    while let Some(joined) = join_set.join_next().await {
        let (shard_out, shard_considered) = joined?;
        merged.extend(shard_out);
        considered += shard_considered;
    }
    merged.sort_by_key(|(target_id, _)| *target_id);

    Ok((merged.into_iter().collect(), considered))
}

/// Defensive traps: conditions a correct scorer can never produce.
fn verify_scores(per_target: &IndexMap<i64, Vec<ScoredPair>>) -> Result<(), CycleError> {
    for (target, pairs) in per_target {
        for pair in pairs {
            if pair.target_id == pair.candidate_id {
                return Err(CycleError::Invariant {
                    kind: InvariantKind::SelfPair,
                    detail: format!("target {target} paired with itself"),
                });
            }
            if !(0.0..=100.0).contains(&pair.harmonic_mean) {
                return Err(CycleError::Invariant {
                    kind: InvariantKind::HarmonicOutOfRange,
                    detail: format!(
                        "pair ({}, {}) harmonic mean {}",
                        pair.target_id, pair.candidate_id, pair.harmonic_mean
                    ),
                });
            }
        }
    }
    Ok(())
}

fn verify_popularity(popularity: &[(i64, i32)], cap: u32) -> Result<(), CycleError> {
    for (profile_id, count) in popularity {
        if *count > cap as i32 {
            return Err(CycleError::Invariant {
                kind: InvariantKind::PopularityCapBreached,
                detail: format!("candidate {profile_id} holds {count} Top-3 slots (cap {cap})"),
            });
        }
    }
    Ok(())
}

fn build_rows(ranked: &IndexMap<i64, Vec<fairness::RankedPair>>) -> Vec<NewSuggestion> {
    ranked
        .values()
        .flatten()
        .map(|r| NewSuggestion {
            target_profile_id: r.pair.target_id,
            candidate_profile_id: r.pair.candidate_id,
            score_ab: r.pair.score_ab as f32,
            score_ba: r.pair.score_ba as f32,
            harmonic_mean: r.pair.harmonic_mean as f32,
            scale_symmetry: r.pair.scale_symmetry as f32,
            trust_level: r.pair.trust,
            match_reason: r.pair.reason.clone(),
            rank: r.rank,
            rank_tier: r.tier,
        })
        .collect()
}

async fn create_cycle(db_pool: &PgPool, name: &str, now: DateTime<Utc>) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO match_cycles (name, started_at, status) VALUES ($1, $2, 'running') RETURNING id",
    )
    .bind(name)
    .bind(now)
    .fetch_one(db_pool)
    .await?;
    Ok(id)
}

async fn finish_cycle(
    db_pool: &PgPool,
    cycle_id: i64,
    status: CycleStatus,
    report: Option<Value>,
) -> Result<()> {
    sqlx::query(
        "UPDATE match_cycles SET status = $2, report = $3, finished_at = NOW() WHERE id = $1",
    )
    .bind(cycle_id)
    .bind(status)
    .bind(report)
    .execute(db_pool)
    .await?;
    Ok(())
}
