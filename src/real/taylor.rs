//! Taylor-series approximations for the prescaled transcendental variants.
//!
//! Each series assumes its argument has already been range-reduced by the
//! public API layer, which keeps the term ratio small enough that a simple
//! iteration-count bound can be derived from the target precision. The
//! working precision `calc_prec` adds guard bits for both the truncation
//! error and the per-term rounding drift, so the final rescaled sum is
//! accurate to < 1 ulp at the requested precision. Every loop checks the
//! stop flag once per term.

use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};

use crate::concurrency::check_stop;
use crate::error::CalcError;
use crate::real::{bound_log2, scale, to_prec, CReal};

/// `exp(x)` for `|x|` well below 1/2: sum of `x^n / n!`.
pub(crate) fn approx_exp(op: &CReal, p: i32) -> Result<BigInt, CalcError> {
    if p >= 1 {
        return Ok(BigInt::zero());
    }
    // Terms shrink by at least a factor of 2 each, so -p/2 + 2 of them
    // suffice; the guard bits absorb the per-term rounding.
    let iterations_needed = -p / 2 + 2;
    let calc_prec = to_prec(p as i64 - bound_log2(2 * iterations_needed) as i64 - 4)?;
    let op_prec = to_prec(p as i64 - 3)?;
    let op_appr = op.approx_get(op_prec)?;
    let scaled_one = BigInt::one() << (-calc_prec) as usize;
    let max_trunc_error = BigInt::one() << (p - 4 - calc_prec) as usize;
    let mut current_term = scaled_one.clone();
    let mut current_sum = scaled_one;
    let mut n = BigInt::zero();
    while current_term.abs() >= max_trunc_error {
        check_stop()?;
        n += 1;
        current_term = scale(&current_term * &op_appr, op_prec) / &n;
        current_sum += &current_term;
    }
    Ok(scale(current_sum, calc_prec - p))
}

/// `cos(x)` for `|x| < 1/2`: sum of `(-1)^k x^(2k) / (2k)!`.
pub(crate) fn approx_cos(op: &CReal, p: i32) -> Result<BigInt, CalcError> {
    if p >= 1 {
        return Ok(BigInt::zero());
    }
    let iterations_needed = -p / 2 + 4;
    let calc_prec = to_prec(p as i64 - bound_log2(2 * iterations_needed) as i64 - 4)?;
    let op_prec = to_prec(p as i64 - 2)?;
    let op_appr = op.approx_get(op_prec)?;
    let max_trunc_error = BigInt::one() << (p - 4 - calc_prec) as usize;
    let mut current_term = BigInt::one() << (-calc_prec) as usize;
    let mut current_sum = current_term.clone();
    let mut n: i64 = 0;
    while current_term.abs() >= max_trunc_error {
        check_stop()?;
        n += 2;
        current_term = scale(&current_term * &op_appr, op_prec);
        current_term = scale(&current_term * &op_appr, op_prec);
        let divisor = BigInt::from(-n) * BigInt::from(n - 1);
        current_term /= divisor;
        current_sum += &current_term;
    }
    Ok(scale(current_sum, calc_prec - p))
}

/// `ln(1 + x)` for `|x| < 1/2`: sum of `(-1)^(n+1) x^n / n`.
pub(crate) fn approx_ln1p(op: &CReal, p: i32) -> Result<BigInt, CalcError> {
    if p >= 0 {
        return Ok(BigInt::zero());
    }
    // Terms shrink by at least one bit each.
    let iterations_needed = -p;
    let calc_prec = to_prec(p as i64 - bound_log2(2 * iterations_needed) as i64 - 4)?;
    let op_prec = to_prec(p as i64 - 3)?;
    let op_appr = op.approx_get(op_prec)?;
    let max_trunc_error = BigInt::one() << (p - 4 - calc_prec) as usize;
    let mut x_nth = scale(op_appr.clone(), op_prec - calc_prec);
    let mut current_term = x_nth.clone();
    let mut current_sum = current_term.clone();
    let mut n: i64 = 1;
    let mut current_sign: i64 = 1;
    while current_term.abs() >= max_trunc_error {
        check_stop()?;
        n += 1;
        current_sign = -current_sign;
        x_nth = scale(&x_nth * &op_appr, op_prec);
        current_term = &x_nth / BigInt::from(n * current_sign);
        current_sum += &current_term;
    }
    Ok(scale(current_sum, calc_prec - p))
}

/// `asin(x)` for `|x| < sqrt(2)/2`: sum of
/// `x^(2n+1) (2n)! / (4^n (n!)^2 (2n+1))`.
///
/// The binomial factor `(2n)! / (4^n (n!)^2)` is below one, so every term is
/// bounded by `x^(2n+1)`; with `|x| < sqrt(2)/2` that loses at least 2 bits
/// per 3 terms, giving the iteration bound below.
pub(crate) fn approx_asin(op: &CReal, p: i32) -> Result<BigInt, CalcError> {
    if p >= 2 {
        // Never bigger in magnitude than pi/2.
        return Ok(BigInt::zero());
    }
    let iterations_needed = -3 * p / 2 + 4;
    let calc_prec = to_prec(p as i64 - bound_log2(2 * iterations_needed) as i64 - 4)?;
    let op_prec = to_prec(p as i64 - 3)?;
    let op_appr = op.approx_get(op_prec)?;
    let max_trunc_error = BigInt::one() << (p - 4 - calc_prec) as usize;
    // x^2 at op_prec, used to step from one odd power to the next.
    let op_appr_sq = scale(&op_appr * &op_appr, op_prec);
    let mut exponent: i64 = 1; // 2n+1 in the series above
    let mut current_factor = scale(op_appr, op_prec - calc_prec); // x^(2n+1) (2n)!/(4^n (n!)^2)
    let mut current_term = current_factor.clone();
    let mut current_sum = current_term.clone();
    while current_term.abs() >= max_trunc_error {
        check_stop()?;
        exponent += 2;
        // factor *= x^2 * (exponent - 2) / (exponent - 1)
        current_factor *= BigInt::from(exponent - 2);
        current_factor = scale(&current_factor * &op_appr_sq, op_prec);
        current_factor /= BigInt::from(exponent - 1);
        current_term = &current_factor / BigInt::from(exponent);
        current_sum += &current_term;
    }
    Ok(scale(current_sum, calc_prec - p))
}

/// `arctan(1/n)` for an integer `|n| >= 2`: sum of
/// `(-1)^k / ((2k+1) n^(2k+1))`. Powers of `1/n` are exact integer
/// divisions of the running power, so only the final rescale rounds.
pub(crate) fn approx_atan_reciprocal(n: &BigInt, p: i32) -> Result<BigInt, CalcError> {
    if p >= 1 {
        return Ok(BigInt::zero());
    }
    let iterations_needed = -p / 2 + 2;
    let calc_prec = to_prec(p as i64 - bound_log2(2 * iterations_needed) as i64 - 2)?;
    let max_trunc_error = BigInt::one() << (p - 2 - calc_prec) as usize;
    let n_squared = n * n;
    let mut current_power = (BigInt::one() << (-calc_prec) as usize) / n;
    let mut current_term = current_power.clone();
    let mut current_sum = current_power.clone();
    let mut current_sign: i64 = 1;
    let mut k: i64 = 1;
    while current_term.abs() >= max_trunc_error {
        check_stop()?;
        k += 2;
        current_sign = -current_sign;
        current_power = &current_power / &n_squared;
        current_term = &current_power / (BigInt::from(current_sign * k));
        current_sum += &current_term;
    }
    Ok(scale(current_sum, calc_prec - p))
}
