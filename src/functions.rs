//! Unary real functions as first-class values.
//!
//! Beyond the closed set of primitives, two generic combinators build new
//! functions from old ones with function-level algorithms instead of closed
//! forms: inversion of a function known to be monotone on an interval, and
//! numeric differentiation. Both produce lazy [`CReal`] nodes whose
//! `approximate` runs the search at the requested precision.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};

use crate::concurrency::check_stop;
use crate::error::CalcError;
use crate::real::{scale, to_prec, CReal, CrKind};

#[derive(Clone)]
pub enum UnaryFunction {
    Identity,
    Negate,
    Inverse,
    Abs,
    Exp,
    Ln,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    /// `outer(inner(x))`.
    Compose(Arc<UnaryFunction>, Arc<UnaryFunction>),
    /// Inverse of a function monotone on a fixed interval.
    InverseMonotone(Arc<InverseMonotoneFn>),
    /// Numeric derivative of a function monotone on a fixed interval.
    MonotoneDerivative(Arc<MonotoneDerivativeFn>),
}

impl UnaryFunction {
    pub fn apply(&self, x: &CReal) -> Result<CReal, CalcError> {
        match self {
            Self::Identity => Ok(x.clone()),
            Self::Negate => Ok(-x.clone()),
            Self::Inverse => Ok(x.inverse()),
            Self::Abs => Ok(x.abs()),
            Self::Exp => x.exp(),
            Self::Ln => x.ln(),
            Self::Sqrt => Ok(x.sqrt()),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
            Self::Asin => x.asin(),
            Self::Acos => x.acos(),
            Self::Atan => x.atan(),
            Self::Compose(outer, inner) => outer.apply(&inner.apply(x)?),
            Self::InverseMonotone(data) => {
                let arg = if data.f_negated { -x.clone() } else { x.clone() };
                Ok(CReal::new(
                    CrKind::InverseMonotone(Arc::new(InverseMonotoneCr {
                        data: data.clone(),
                        arg,
                    })),
                    false,
                ))
            }
            Self::MonotoneDerivative(data) => {
                let f_arg = data.f.apply(x)?;
                Ok(CReal::new(
                    CrKind::MonotoneDerivative(Arc::new(MonotoneDerivativeCr {
                        data: data.clone(),
                        arg: x.clone(),
                        f_arg,
                    })),
                    false,
                ))
            }
        }
    }

    pub fn compose(outer: Self, inner: Self) -> Self {
        Self::Compose(Arc::new(outer), Arc::new(inner))
    }

    /// The inverse of `func`, which must be monotone on `[low, high]` with
    /// `low < high`. Construction evaluates the endpoints, which may itself
    /// fail or be cancelled.
    pub fn inverse_monotone(func: Self, low: &CReal, high: &CReal) -> Result<Self, CalcError> {
        let raw_f_low = func.apply(low)?;
        let raw_f_high = func.apply(high)?;
        // A decreasing function is handled by inverting its negation; the
        // argument is negated to match in `apply`. Monotonicity makes this
        // comparison terminate.
        let decreasing = raw_f_low.compare(&raw_f_high)? > 0;
        let (f, f_low, f_high) = if decreasing {
            (
                Self::compose(Self::Negate, func),
                -raw_f_low,
                -raw_f_high,
            )
        } else {
            (func, raw_f_low, raw_f_high)
        };
        let max_msd = low.abs().max(&high.abs()).msd_unbounded()?;
        let width = high.clone() - low.clone();
        let max_arg_prec = width.msd_unbounded()? - 4;
        let deriv_msd = ((f_high.clone() - f_low.clone()) / width).msd_unbounded()?;
        Ok(Self::InverseMonotone(Arc::new(InverseMonotoneFn {
            f: Arc::new(f),
            f_negated: decreasing,
            low: low.clone(),
            high: high.clone(),
            f_low,
            f_high,
            max_msd,
            max_arg_prec,
            deriv_msd,
        })))
    }

    /// The numeric derivative of `func`, which must be monotone on
    /// `[low, high]`.
    pub fn monotone_derivative(func: Self, low: &CReal, high: &CReal) -> Result<Self, CalcError> {
        let mid = (low.clone() + high.clone()).shift_right(1);
        let f_low = func.apply(low)?;
        let f_mid = func.apply(&mid)?;
        let f_high = func.apply(high)?;
        let width = high.clone() - low.clone();
        let width_msd = width.msd_unbounded()?;
        // Keep the difference interval well inside [low, high].
        let max_delta_msd = width_msd - 4;
        // f(h) + f(l) - 2 f(m) ~ f''((h-l)/2)^2; solve for the msd of f''.
        // A linear function makes the second difference vanish, so the
        // search is bounded and falls back to a conservative guess; the
        // estimate is refined during approximation anyway.
        let second_diff = f_high + f_low - f_mid.shift_left(1);
        let deriv2_msd = match second_diff.iter_msd(DERIV2_MSD_FLOOR)? {
            Some(m) => m - 2 * (width_msd - 1),
            None => DERIV2_MSD_FLOOR,
        };
        Ok(Self::MonotoneDerivative(Arc::new(MonotoneDerivativeFn {
            f: Arc::new(func),
            max_delta_msd,
            deriv2_msd: AtomicI32::new(deriv2_msd),
        })))
    }
}

/// Give up estimating the second derivative below this magnitude.
const DERIV2_MSD_FLOOR: i32 = -1000;

/// Shared data for an inverted monotone function: the (increasing) function,
/// the interval, endpoint images, and precision planning constants derived
/// once at construction.
pub struct InverseMonotoneFn {
    f: Arc<UnaryFunction>,
    f_negated: bool,
    low: CReal,
    high: CReal,
    f_low: CReal,
    f_high: CReal,
    /// Bound on the msd of any value in the interval.
    max_msd: i32,
    /// Finest useful argument precision, from the interval width.
    max_arg_prec: i32,
    /// Rough msd of the first derivative, for picking evaluation precision.
    deriv_msd: i32,
}

/// One application of an inverted monotone function to an argument.
pub(crate) struct InverseMonotoneCr {
    data: Arc<InverseMonotoneFn>,
    arg: CReal,
}

impl InverseMonotoneCr {
    /// Hybrid secant/bisection search for `y` with `f(y) = arg`.
    ///
    /// The bracket `[l, h]` is maintained as integers at a working argument
    /// precision a few bits finer than the target. Secant interpolation
    /// converges fast when `f` is well behaved, but cannot bound the error
    /// in a fixed number of steps, so a bisection step is forced every
    /// fourth iteration and whenever interpolation lands too close to an
    /// endpoint to make progress.
    pub(crate) fn approximate(&self, p: i32) -> Result<BigInt, CalcError> {
        const EXTRA_ARG_PREC: i32 = 4;
        let data = &self.data;
        if i64::from(data.max_msd) - i64::from(p) < 0 {
            // Everything in the interval is below one ulp at p.
            return Ok(BigInt::zero());
        }
        let working_arg_prec = to_prec(
            (i64::from(p) - i64::from(EXTRA_ARG_PREC)).min(i64::from(data.max_arg_prec)),
        )?;
        // Function values change by ~2^deriv_msd per unit argument change;
        // 20 extra bits keep the secant interpolation meaningful.
        let working_eval_prec =
            to_prec(i64::from(working_arg_prec) + i64::from(data.deriv_msd) - 20)?;
        let mut l = data.low.approx_get(working_arg_prec)?;
        let mut h = data.high.approx_get(working_arg_prec)?;
        let mut f_l = data.f_low.approx_get(working_eval_prec)?;
        let mut f_h = data.f_high.approx_get(working_eval_prec)?;
        let arg_appr = self.arg.approx_get(working_eval_prec)?;
        if arg_appr <= f_l {
            return Ok(scale(l, working_arg_prec - p));
        }
        if arg_appr >= f_h {
            return Ok(scale(h, working_arg_prec - p));
        }
        let mut step: u32 = 0;
        let mut forced_bisections: i32 = 0;
        while &h - &l > BigInt::one() {
            check_stop()?;
            step += 1;
            let width = &h - &l;
            let bisect = forced_bisections > 0 || step % 4 == 0 || f_h == f_l;
            let guess = if bisect {
                if forced_bisections > 0 {
                    forced_bisections -= 1;
                }
                (&l + &h) >> 1
            } else {
                let interpolated = &l + (&arg_appr - &f_l) * &width / (&f_h - &f_l);
                // Strictly interior, so the bracket always shrinks.
                if interpolated <= l {
                    &l + BigInt::one()
                } else if interpolated >= h {
                    &h - BigInt::one()
                } else {
                    interpolated
                }
            };
            if !bisect {
                // A guess within 1/16 of an endpoint counts as ineffective;
                // pay it back with a forced bisection.
                let margin = std::cmp::max(&width >> 4, BigInt::one());
                if &guess - &l < margin || &h - &guess < margin {
                    forced_bisections += 1;
                }
            }
            let guess_cr = CReal::from(guess.clone()).shift_left(working_arg_prec);
            let f_guess = data.f.apply(&guess_cr)?.approx_get(working_eval_prec)?;
            if f_guess > arg_appr {
                h = guess;
                f_h = f_guess;
            } else {
                l = guess;
                f_l = f_guess;
            }
        }
        Ok(scale(h, working_arg_prec - p))
    }
}

/// Shared data for a numeric derivative.
pub struct MonotoneDerivativeFn {
    f: Arc<UnaryFunction>,
    /// Keeps the difference step well inside the interval.
    max_delta_msd: i32,
    /// Rough msd of the second derivative; refined whenever the one-sided
    /// quotients disagree.
    deriv2_msd: AtomicI32,
}

/// One application of a numeric derivative to an argument.
pub(crate) struct MonotoneDerivativeCr {
    data: Arc<MonotoneDerivativeFn>,
    arg: CReal,
    f_arg: CReal,
}

impl MonotoneDerivativeCr {
    /// Central finite difference: the step size is chosen so the
    /// second-derivative term stays below the target ulp, then validated by
    /// comparing the left and right one-sided quotients. Disagreement means
    /// the second-derivative estimate was too low; it is raised from the
    /// observed disagreement and the difference retried.
    pub(crate) fn approximate(&self, p: i32) -> Result<BigInt, CalcError> {
        const EXTRA_PREC: i32 = 4;
        let data = &self.data;
        let mut attempts: u32 = 0;
        loop {
            check_stop()?;
            let deriv2_msd = data.deriv2_msd.load(Ordering::Relaxed);
            let log_delta = to_prec(
                (i64::from(p) - i64::from(deriv2_msd)).min(i64::from(data.max_delta_msd))
                    - i64::from(EXTRA_PREC),
            )?;
            let delta = CReal::from(1).shift_left(log_delta);
            let f_left = data.f.apply(&(self.arg.clone() - delta.clone()))?;
            let f_right = data.f.apply(&(self.arg.clone() + delta))?;
            // Dividing by delta is a shift since delta is a power of two.
            let left_deriv = (self.f_arg.clone() - f_left).shift_right(log_delta);
            let right_deriv = (f_right - self.f_arg.clone()).shift_right(log_delta);
            let eval_prec = to_prec(i64::from(p) - i64::from(EXTRA_PREC))?;
            let appr_left = left_deriv.approx_get(eval_prec)?;
            let appr_right = right_deriv.approx_get(eval_prec)?;
            let disagreement = (&appr_right - &appr_left).abs();
            if disagreement < BigInt::from(8) || attempts >= 1 {
                // Average of the two one-sided quotients, rescaled to p.
                return Ok(scale(appr_left + appr_right, eval_prec - p - 1));
            }
            // disagreement ~ f'' * delta at eval_prec; solve for msd(f'').
            let observed =
                eval_prec + disagreement.bits() as i32 - 1 - log_delta + EXTRA_PREC;
            data.deriv2_msd.store(observed, Ordering::Relaxed);
            attempts += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::test_utils::cr_ratio;

    #[test]
    fn inverting_sin_recovers_asin() {
        let asin_like =
            UnaryFunction::inverse_monotone(UnaryFunction::Sin, &CReal::from(0), &CReal::half_pi())
                .expect("construction");
        let result = asin_like.apply(&cr_ratio(1, 2)).expect("apply");
        let expected = CReal::pi() / CReal::from(6);
        assert_eq!(result.compare_abs(&expected, -40).expect("compare"), 0);
    }

    #[test]
    fn inverting_a_decreasing_function() {
        let acos_like =
            UnaryFunction::inverse_monotone(UnaryFunction::Cos, &CReal::from(0), &CReal::half_pi())
                .expect("construction");
        let result = acos_like.apply(&cr_ratio(1, 2)).expect("apply");
        let expected = CReal::pi() / CReal::from(3);
        assert_eq!(result.compare_abs(&expected, -40).expect("compare"), 0);
    }

    #[test]
    fn inverse_endpoints_clamp() {
        let inv = UnaryFunction::inverse_monotone(
            UnaryFunction::Identity,
            &CReal::from(0),
            &CReal::from(1),
        )
        .expect("construction");
        let below = inv.apply(&CReal::from(-5)).expect("apply");
        assert_eq!(below.compare_abs(&CReal::from(0), -20).expect("compare"), 0);
    }

    #[test]
    fn derivative_of_exp_is_exp() {
        let d = UnaryFunction::monotone_derivative(
            UnaryFunction::Exp,
            &CReal::from(0),
            &CReal::from(2),
        )
        .expect("construction");
        let at_one = d.apply(&CReal::from(1)).expect("apply");
        let e = CReal::from(1).exp().expect("exp");
        assert_eq!(at_one.compare_abs(&e, -30).expect("compare"), 0);
    }

    #[test]
    fn derivative_of_sin_is_cos() {
        let d = UnaryFunction::monotone_derivative(
            UnaryFunction::Sin,
            &CReal::from(0),
            &CReal::from(1),
        )
        .expect("construction");
        let x = cr_ratio(3, 10);
        let result = d.apply(&x).expect("apply");
        let expected = x.cos().expect("cos");
        assert_eq!(result.compare_abs(&expected, -30).expect("compare"), 0);
    }

    #[test]
    fn composition_applies_outer_after_inner() {
        let exp_ln = UnaryFunction::compose(UnaryFunction::Exp, UnaryFunction::Ln);
        let result = exp_ln.apply(&CReal::from(3)).expect("apply");
        assert_eq!(result.compare_abs(&CReal::from(3), -40).expect("compare"), 0);
    }
}
