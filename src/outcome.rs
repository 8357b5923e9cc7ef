use std::fmt;

use serde_derive::Serialize;

/// Why an aggregation stage produced nothing.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shortfall {
    TooFewPositions { found: usize, required: usize },
    NoPositionsInPitch,
    ZeroDensity,
    NoDirection,
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shortfall::TooFewPositions { found, required } => {
                write!(f, "{} valid positions, at least {} required", found, required)
            }
            Shortfall::NoPositionsInPitch => write!(f, "no ball positions inside the pitch"),
            Shortfall::ZeroDensity => write!(f, "heatmap density is zero everywhere"),
            Shortfall::NoDirection => write!(f, "every position coincides with the origin"),
        }
    }
}

/// Result of a stage that may legitimately have nothing to report.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome<T> {
    Ready(T),
    InsufficientData(Shortfall),
}

impl<T> Outcome<T> {
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    #[inline]
    pub fn ready(self) -> Option<T> {
        match self {
            Outcome::Ready(v) => Some(v),
            Outcome::InsufficientData(_) => None,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> Outcome<&T> {
        match self {
            Outcome::Ready(v) => Outcome::Ready(v),
            Outcome::InsufficientData(s) => Outcome::InsufficientData(*s),
        }
    }

    #[inline]
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Ready(v) => Outcome::Ready(f(v)),
            Outcome::InsufficientData(s) => Outcome::InsufficientData(s),
        }
    }

    #[inline]
    pub fn shortfall(&self) -> Option<Shortfall> {
        match self {
            Outcome::Ready(_) => None,
            Outcome::InsufficientData(s) => Some(*s),
        }
    }
}
