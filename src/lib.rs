#![warn(
    clippy::shadow_reuse,
    clippy::shadow_same,
    clippy::shadow_unrelated,
    clippy::dbg_macro,
    clippy::expect_used,
    clippy::panic,
    clippy::print_stderr,
    clippy::print_stdout,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used
)]

//! Arbitrary-precision calculator engine built on lazy constructive reals.
//!
//! The engine combines three numeric layers:
//!
//! - [`BoundedRational`], an exact fraction with a hard bit-size cap whose
//!   arithmetic degrades to an absent value instead of growing unboundedly;
//! - [`CReal`], a lazy constructive real: an expression tree whose nodes
//!   answer "give me this value to precision `p`" with a provably accurate
//!   integer approximation, caching the best answer so far;
//! - [`UnifiedValue`], the pair of both, staying exact as long as the
//!   mathematics allows and falling into the lazy domain afterwards.
//!
//! On top sits [`CalculatorExpr`], a token-list expression with a
//! recursive-descent evaluator, resolving references to previously
//! evaluated expressions through an [`ExprResolver`].
//!
//! Long-running approximations poll a process-wide cooperative stop flag;
//! see [`request_stop`] and [`clear_stop`].

mod concurrency;
mod error;
mod expr;
mod functions;
mod rational;
mod real;
#[cfg(test)]
mod test_utils;
mod value;

pub use concurrency::{clear_stop, request_stop, stop_requested, StopFlag};
pub use error::CalcError;
pub use expr::{CalculatorExpr, ExprResolver, Literal, OpKind, Token};
pub use functions::UnaryFunction;
pub use rational::{BoundedRational, MAX_SIZE_BITS};
pub use real::{CReal, ScientificNotation};
pub use value::UnifiedValue;
