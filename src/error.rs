//! Error types for the evaluation engine.
//!
//! A single crate-wide enum covers every failure the engine can surface.
//! Note that "too big" rational results are *not* represented here: bounded
//! rational arithmetic signals unrepresentable results as `Option::None`,
//! which callers treat as "fall back to the lazy real-number path", never as
//! a failure.

use std::fmt;

/// Errors that can occur while building approximations or evaluating
/// expressions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CalcError {
    /// Malformed token sequence; raised while parsing.
    Syntax,
    /// An internally derived precision would overflow its representation.
    /// Almost always indicates a divergent computation, e.g. division by
    /// zero reached through the lazy path.
    PrecisionOverflow,
    /// Cooperative cancellation observed during a long-running
    /// approximation. Retryable after clearing the stop flag.
    Cancelled,
    /// Division by an exactly-zero value, detected on the rational fast path.
    DivisionByZero,
    /// Input is outside the domain of the named operation.
    Domain(&'static str),
}

impl fmt::Display for CalcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => write!(f, "cannot evaluate malformed expression"),
            Self::PrecisionOverflow => write!(f, "requested precision overflowed"),
            Self::Cancelled => write!(f, "evaluation cancelled"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::Domain(op) => write!(f, "argument outside domain: {op}"),
        }
    }
}

impl std::error::Error for CalcError {}
