// Recoverable, per-record failures.
//
// None of these abort a run: the pipeline drops the offending field or
// record and counts it. Anything fatal (HTTP, file, SQL) travels as
// `anyhow::Error` instead.

use crate::model::Metric;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("unparseable date {0:?}")]
    InvalidDate(String),

    #[error("{metric} value {raw:?} is not an integer")]
    InvalidMetric { metric: Metric, raw: String },

    #[error("location {0:?} has no canonical region")]
    UnresolvedRegion(String),

    #[error("region {0} is excluded")]
    ExcludedRegion(String),

    #[error("record carries no usable metrics")]
    NoUsableMetrics,
}

/// Why a record did not reach the merger. Used as a counter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DropReason {
    InvalidDate,
    UnresolvedRegion,
    ExcludedRegion,
    NoUsableMetrics,
}

impl RecordError {
    /// Field-level errors (`InvalidMetric`) never drop a whole record.
    pub fn drop_reason(&self) -> Option<DropReason> {
        match self {
            RecordError::InvalidDate(_) => Some(DropReason::InvalidDate),
            RecordError::InvalidMetric { .. } => None,
            RecordError::UnresolvedRegion(_) => Some(DropReason::UnresolvedRegion),
            RecordError::ExcludedRegion(_) => Some(DropReason::ExcludedRegion),
            RecordError::NoUsableMetrics => Some(DropReason::NoUsableMetrics),
        }
    }
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::InvalidDate => "invalid_date",
            DropReason::UnresolvedRegion => "unresolved_region",
            DropReason::ExcludedRegion => "excluded_region",
            DropReason::NoUsableMetrics => "no_usable_metrics",
        }
    }
}
