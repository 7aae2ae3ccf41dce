//! Text normalization and similarity utilities shared by the resolver and
//! the feature assembler.
//!
//! Canonical comparisons (email, name, company, niche) run on normalized
//! strings: Unicode case-fold, internal whitespace collapsed, trimmed.
//! Fuzzy name comparison additionally folds diacritics so "García" and
//! "Garcia" compare equal before the subsequence ratio is taken.

use unicode_normalization::UnicodeNormalization;

/// Normalize free text for equality comparison.
///
/// Pipeline: Unicode case-fold (lowercase) → collapse runs of whitespace
/// into single spaces → trim.
///
/// # Examples
///
/// ```
/// use matchbook::data::names::normalize_text;
///
/// assert_eq!(normalize_text("  Health &  Wellness "), "health & wellness");
/// assert_eq!(normalize_text("ACME Media"), "acme media");
/// ```
pub fn normalize_text(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize an email address for tier-1 matching: trim and lowercase.
pub fn normalize_email(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Fold a name for fuzzy comparison: [`normalize_text`] plus NFD
/// decomposition with combining marks stripped.
pub fn fold_for_fuzzy(s: &str) -> String {
    normalize_text(s)
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect()
}

/// Longest-matching-subsequence ratio in [0, 1].
///
/// `2·LCS(a, b) / (|a| + |b|)` over characters. 1.0 for identical strings,
/// 0.0 when nothing matches or either side is empty.
pub fn subsequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    // Two-row LCS table
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let lcs = prev[b.len()];
    (2.0 * lcs as f64) / ((a.len() + b.len()) as f64)
}

/// Fuzzy name similarity: fold both sides, then take the subsequence ratio.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    subsequence_ratio(&fold_for_fuzzy(a), &fold_for_fuzzy(b))
}
