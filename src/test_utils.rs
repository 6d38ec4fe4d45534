//! Shared test utilities.
//!
//! Small constructor helpers used across test modules to keep the
//! arithmetic-heavy assertions readable.

use num_bigint::BigInt;

use crate::real::CReal;

/// Creates the constructive real `num / den` from small integers.
///
/// # Examples
/// ```ignore
/// let third = cr_ratio(1, 3);
/// let neg_half = cr_ratio(-1, 2);
/// ```
pub fn cr_ratio(num: i64, den: i64) -> CReal {
    CReal::from(BigInt::from(num)) * CReal::from(BigInt::from(den)).inverse()
}
