//! Error types for the matching pipeline.
//!
//! Most plumbing uses `anyhow` through the [`Result`] alias. The pipeline
//! additionally carries [`CycleError`] for failures callers need to branch
//! on: per-record data problems are logged and counted without stopping a
//! cycle, while invariant violations always abort it.

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;

/// Machine-readable classification of a single bad input record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataErrorKind {
    MissingName,
    NegativeReach,
    InvalidEnum,
}

impl DataErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataErrorKind::MissingName => "missing_name",
            DataErrorKind::NegativeReach => "negative_reach",
            DataErrorKind::InvalidEnum => "invalid_enum",
        }
    }
}

impl std::fmt::Display for DataErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defensive traps for conditions a correct run can never produce.
///
/// Any of these aborts the cycle before a single suggestion row is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantKind {
    SelfPair,
    HarmonicOutOfRange,
    PopularityCapBreached,
}

impl InvariantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvariantKind::SelfPair => "self_pair",
            InvariantKind::HarmonicOutOfRange => "harmonic_out_of_range",
            InvariantKind::PopularityCapBreached => "popularity_cap_breached",
        }
    }
}

impl std::fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// A single record failed validation and was skipped.
    #[error("bad record ({kind}): {detail}")]
    Data { kind: DataErrorKind, detail: String },

    /// Multiple exact name+company candidates; the record cannot be resolved
    /// automatically and is skipped for this cycle.
    #[error("ambiguous resolution for '{name}': {candidates} exact candidates")]
    AmbiguousResolution { name: String, candidates: usize },

    /// A global invariant was violated. Fatal for the cycle.
    #[error("invariant violated: {kind} ({detail})")]
    Invariant {
        kind: InvariantKind,
        detail: String,
    },

    /// The cycle was cancelled at a stage boundary.
    #[error("cycle cancelled before stage '{stage}'")]
    Cancelled { stage: &'static str },

    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

impl CycleError {
    /// Whether this error aborts the whole cycle (as opposed to one record).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CycleError::Invariant { .. } | CycleError::Cancelled { .. } | CycleError::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(DataErrorKind::MissingName.as_str(), "missing_name");
        assert_eq!(DataErrorKind::NegativeReach.as_str(), "negative_reach");
        assert_eq!(DataErrorKind::InvalidEnum.as_str(), "invalid_enum");
        assert_eq!(InvariantKind::SelfPair.as_str(), "self_pair");
        assert_eq!(
            InvariantKind::PopularityCapBreached.as_str(),
            "popularity_cap_breached"
        );
    }

    #[test]
    fn per_record_errors_are_not_fatal() {
        let data = CycleError::Data {
            kind: DataErrorKind::MissingName,
            detail: "row 3".to_string(),
        };
        assert!(!data.is_fatal());

        let ambiguous = CycleError::AmbiguousResolution {
            name: "Sarah Chen".to_string(),
            candidates: 2,
        };
        assert!(!ambiguous.is_fatal());

        let invariant = CycleError::Invariant {
            kind: InvariantKind::HarmonicOutOfRange,
            detail: "101".to_string(),
        };
        assert!(invariant.is_fatal());
    }
}
