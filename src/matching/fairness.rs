//! Fairness filter: the popularity cap over Top-3 placements.
//!
//! Pairs are visited in a deterministic global order of decreasing final
//! score (candidate id breaking ties). A pair holding a preliminary Top-3
//! slot keeps it only while its candidate has cap budget left; once the
//! candidate is over the cap the pair is demoted below rank 3 but stays in
//! the target's list. The counter is owned by this single pass and becomes
//! the cycle's popularity rows.

use crate::data::models::RankTier;
use crate::matching::scorer::ScoredPair;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// A pair with its final rank and display tier.
#[derive(Debug, Clone)]
pub struct RankedPair {
    pub pair: ScoredPair,
    pub rank: i32,
    pub tier: RankTier,
    /// Held a preliminary Top-3 slot but lost it to the cap.
    pub demoted: bool,
}

#[derive(Debug, Default)]
pub struct FairnessOutcome {
    /// Final per-target lists, rank ascending.
    pub ranked: IndexMap<i64, Vec<RankedPair>>,
    /// Top-3 appearance counts per candidate, ascending by profile id.
    pub popularity: Vec<(i64, i32)>,
    pub dropped_from_top3: usize,
}

/// Apply the cap to per-target candidate lists.
///
/// Input lists must already be sorted by [`crate::matching::scorer::rank_cmp`]
/// and truncated to top_k; their order is preserved except for demotions.
pub fn apply(per_target: &IndexMap<i64, Vec<ScoredPair>>, cap: u32) -> FairnessOutcome {
    // Deterministic global ordering: (−final_score, candidate_id)
    let mut global: Vec<(i64, usize)> = Vec::new();
    for (target, pairs) in per_target {
        for idx in 0..pairs.len() {
            global.push((*target, idx));
        }
    }
    global.sort_by(|&(ta, ia), &(tb, ib)| {
        let a = &per_target[&ta][ia];
        let b = &per_target[&tb][ib];
        b.final_score
            .total_cmp(&a.final_score)
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
            .then_with(|| a.target_id.cmp(&b.target_id))
    });

    let mut top3_counts: HashMap<i64, i32> = HashMap::new();
    let mut demoted: HashSet<(i64, usize)> = HashSet::new();
    let mut dropped = 0usize;

    for &(target, idx) in &global {
        let preliminary_rank = idx + 1;
        if preliminary_rank > 3 {
            continue;
        }
        let candidate = per_target[&target][idx].candidate_id;
        let count = top3_counts.entry(candidate).or_insert(0);
        if *count >= cap as i32 {
            demoted.insert((target, idx));
            dropped += 1;
        } else {
            *count += 1;
        }
    }

    // Reassemble each target's list: surviving Top-3 first, then everything
    // else in score order. Demoted pairs never land above rank 4.
    let mut ranked: IndexMap<i64, Vec<RankedPair>> = IndexMap::new();
    for (target, pairs) in per_target {
        let mut retained: Vec<&ScoredPair> = Vec::new();
        let mut rest: Vec<(&ScoredPair, bool)> = Vec::new();
        for (idx, pair) in pairs.iter().enumerate() {
            let was_demoted = demoted.contains(&(*target, idx));
            if idx < 3 && !was_demoted {
                retained.push(pair);
            } else {
                rest.push((pair, was_demoted));
            }
        }

        let mut list = Vec::with_capacity(pairs.len());
        for (i, pair) in retained.iter().enumerate() {
            let rank = (i + 1) as i32;
            list.push(RankedPair {
                pair: (*pair).clone(),
                rank,
                tier: RankTier::from_rank(rank),
                demoted: false,
            });
        }
        let rest_start = (retained.len() as i32 + 1).max(4);
        for (j, (pair, was_demoted)) in rest.iter().enumerate() {
            let rank = rest_start + j as i32;
            list.push(RankedPair {
                pair: (*pair).clone(),
                rank,
                tier: RankTier::from_rank(rank),
                demoted: *was_demoted,
            });
        }
        ranked.insert(*target, list);
    }

    let mut popularity: Vec<(i64, i32)> = top3_counts
        .into_iter()
        .filter(|&(_, n)| n > 0)
        .collect();
    popularity.sort_unstable();

    FairnessOutcome {
        ranked,
        popularity,
        dropped_from_top3: dropped,
    }
}
