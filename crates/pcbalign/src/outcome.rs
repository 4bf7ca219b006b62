//! Tagged best-effort results.
//!
//! Every detector hands back its value even when a viability threshold was
//! missed; the shortfall travels next to it instead of replacing it.

use serde::{Deserialize, Serialize};

use crate::affine::AffineError;

/// Why a stage result is only partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shortfall {
    /// Board silhouette was implausible; whole image used, no rotation.
    BoundsFallback { coverage_x: f64, coverage_y: f64 },
    /// Fewer contacts than the specification expects.
    TooFewContacts { found: usize, needed: usize },
    /// No usable contact row at all (fewer than two seeds on a grid).
    NoContactRow,
    /// Too few matched contact pairs to derive a coarse transform.
    TooFewContactPairs { found: usize, needed: usize },
    /// The two contact rows differ in length, so slots could not be paired
    /// one to one.
    ContactRowMismatch { front: usize, back: usize },
    /// Not enough vias on one or both sides.
    TooFewVias {
        front: usize,
        back: usize,
        needed: usize,
    },
    /// Correspondence search produced too few pairs.
    TooFewMatches { found: usize, needed: usize },
    /// Affine estimation failed.
    Estimation { message: String },
    /// Iterative refinement stopped without reaching the error threshold.
    NotConverged { passes: usize, mean_error_px: f64 },
}

impl std::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BoundsFallback {
                coverage_x,
                coverage_y,
            } => write!(
                f,
                "board bounds implausible (coverage {:.0}% x {:.0}%), using whole image",
                coverage_x * 100.0,
                coverage_y * 100.0
            ),
            Self::TooFewContacts { found, needed } => {
                write!(f, "found {} contacts, need {}", found, needed)
            }
            Self::NoContactRow => write!(f, "no contact row found"),
            Self::TooFewContactPairs { found, needed } => {
                write!(f, "matched {} contact pairs, need {}", found, needed)
            }
            Self::ContactRowMismatch { front, back } => write!(
                f,
                "contact rows differ: front={}, back={}; paired by position",
                front, back
            ),
            Self::TooFewVias {
                front,
                back,
                needed,
            } => write!(
                f,
                "not enough vias: front={}, back={} (need >= {})",
                front, back, needed
            ),
            Self::TooFewMatches { found, needed } => {
                write!(f, "matched {} via pairs, need {}", found, needed)
            }
            Self::Estimation { message } => write!(f, "estimation failed: {}", message),
            Self::NotConverged {
                passes,
                mean_error_px,
            } => write!(
                f,
                "refinement not converged after {} passes (mean error {:.2}px)",
                passes, mean_error_px
            ),
        }
    }
}

impl From<AffineError> for Shortfall {
    fn from(e: AffineError) -> Self {
        Self::Estimation {
            message: e.to_string(),
        }
    }
}

/// A stage result: either complete, or partial with the reason attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome<T> {
    Complete(T),
    Partial { value: T, reason: Shortfall },
}

impl<T> Outcome<T> {
    pub fn partial(value: T, reason: Shortfall) -> Self {
        Self::Partial { value, reason }
    }

    /// Complete unless `reason` is given.
    pub fn from_check(value: T, reason: Option<Shortfall>) -> Self {
        match reason {
            None => Self::Complete(value),
            Some(reason) => Self::Partial { value, reason },
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Complete(v) | Self::Partial { value: v, .. } => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Complete(v) | Self::Partial { value: v, .. } => v,
        }
    }

    pub fn reason(&self) -> Option<&Shortfall> {
        match self {
            Self::Complete(_) => None,
            Self::Partial { reason, .. } => Some(reason),
        }
    }

    /// Split into the value and the optional shortfall.
    pub fn into_parts(self) -> (T, Option<Shortfall>) {
        match self {
            Self::Complete(v) => (v, None),
            Self::Partial { value, reason } => (value, Some(reason)),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Complete(v) => Outcome::Complete(f(v)),
            Self::Partial { value, reason } => Outcome::Partial {
                value: f(value),
                reason,
            },
        }
    }

    /// Keep the value, but downgrade to partial when `reason` is given and
    /// the outcome is still complete. An existing shortfall is kept.
    pub fn downgrade(self, reason: Option<Shortfall>) -> Self {
        match (self, reason) {
            (Self::Complete(v), Some(reason)) => Self::Partial { value: v, reason },
            (other, _) => other,
        }
    }
}
