//! Semantic similarity: oracle boundary, memoization, and the Jaccard
//! fallback.
//!
//! The oracle is the only blocking I/O inside scoring, so all lookups are
//! primed in a batched pre-pass and memoized by normalized text pair. Once
//! primed, [`SimilarityCache::lookup`] is synchronous and pure, which keeps
//! the sharded scorer free of suspension points. Oracle failures are never
//! fatal; missing entries fall back to token-overlap Jaccard.

use crate::data::names::normalize_text;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// External semantic-similarity service.
///
/// Implementations must return one score in [0, 1] per input pair, in order.
#[async_trait]
pub trait SemanticOracle: Send + Sync {
    async fn similarity_batch(&self, pairs: &[(String, String)]) -> Result<Vec<f32>>;
}

/// Tokens too common to signal intent overlap.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "i",
    "in", "is", "it", "my", "of", "on", "or", "our", "so", "that", "the", "their", "they", "to",
    "we", "who", "will", "with", "you", "your",
];

/// Lowercased, stop-word-stripped token set.
pub fn tokenize(s: &str) -> HashSet<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Token-overlap Jaccard similarity in [0, 1].
pub fn jaccard(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    intersection as f64 / union as f64
}

/// Where a similarity value came from; the intent thresholds differ.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Similarity {
    Oracle(f64),
    Jaccard(f64),
}

impl Similarity {
    pub fn value(self) -> f64 {
        match self {
            Similarity::Oracle(v) | Similarity::Jaccard(v) => v,
        }
    }
}

/// Memoized similarity lookups shared read-only across scorer shards.
pub struct SimilarityCache {
    oracle: Option<Arc<dyn SemanticOracle>>,
    memo: DashMap<(String, String), f64>,
    fallbacks: AtomicU64,
    oracle_failures: AtomicU64,
}

impl SimilarityCache {
    pub fn new(oracle: Option<Arc<dyn SemanticOracle>>) -> Self {
        SimilarityCache {
            oracle,
            memo: DashMap::new(),
            fallbacks: AtomicU64::new(0),
            oracle_failures: AtomicU64::new(0),
        }
    }

    pub fn oracle_enabled(&self) -> bool {
        self.oracle.is_some()
    }

    /// Jaccard lookups served because the oracle had no answer.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Oracle batches that errored or timed out.
    pub fn failure_count(&self) -> u64 {
        self.oracle_failures.load(Ordering::Relaxed)
    }

    /// Batch-prime the memo for every pair the scorer will ask about.
    ///
    /// Pairs are deduplicated after normalization and sent in chunks of
    /// `batch_size` with a per-chunk timeout. A failed chunk is logged and
    /// counted; its pairs simply miss the memo and fall back to Jaccard.
    pub async fn prime<I>(&self, pairs: I, batch_size: usize, timeout: Duration)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let Some(oracle) = self.oracle.clone() else {
            return;
        };

        let mut pending: Vec<(String, String)> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for (a, b) in pairs {
            let key = (normalize_text(&a), normalize_text(&b));
            if key.0.is_empty() || key.1.is_empty() || self.memo.contains_key(&key) {
                continue;
            }
            if seen.insert(key.clone()) {
                pending.push(key);
            }
        }

        if pending.is_empty() {
            return;
        }
        debug!(pairs = pending.len(), batch_size, "priming similarity cache");

        for chunk in pending.chunks(batch_size.max(1)) {
            match tokio::time::timeout(timeout, oracle.similarity_batch(chunk)).await {
                Ok(Ok(scores)) if scores.len() == chunk.len() => {
                    for (key, score) in chunk.iter().zip(scores) {
                        self.memo
                            .insert(key.clone(), (score as f64).clamp(0.0, 1.0));
                    }
                }
                Ok(Ok(scores)) => {
                    warn!(
                        expected = chunk.len(),
                        got = scores.len(),
                        "oracle returned wrong batch size, chunk dropped"
                    );
                    self.oracle_failures.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "oracle batch failed, falling back to jaccard");
                    self.oracle_failures.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    warn!(timeout = ?timeout, "oracle batch timed out, falling back to jaccard");
                    self.oracle_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Similarity for one text pair. Synchronous: either a primed oracle
    /// value or the Jaccard fallback.
    pub fn lookup(&self, a: &str, b: &str) -> Similarity {
        let key = (normalize_text(a), normalize_text(b));
        if let Some(v) = self.memo.get(&key) {
            return Similarity::Oracle(*v);
        }
        if self.oracle.is_some() {
            // Oracle was supposed to know this pair but doesn't
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        Similarity::Jaccard(jaccard(a, b))
    }
}
