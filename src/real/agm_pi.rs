//! The constant pi by the Gauss-Legendre arithmetic-geometric-mean
//! iteration.
//!
//! The iteration maintains three sequences at a fixed working precision:
//! the arithmetic mean `a`, the geometric mean `b`, and the correction term
//! `t`; when `a` and `b` meet, `pi ~ (a + b)^2 / (4 t)`. Each step needs a
//! square root for the geometric mean. Those roots are the expensive part,
//! so the whole geometric-mean sequence is memoized across calls: when a
//! later request arrives at higher precision, each step's square root is
//! seeded with the value computed last time, turning the inner Newton
//! iterations into refinements instead of fresh searches.

use std::sync::OnceLock;

use num_bigint::BigInt;
use num_traits::One;
use parking_lot::Mutex;

use crate::concurrency::check_stop;
use crate::error::CalcError;
use crate::real::{scale, to_prec, Approximation, CReal, CrKind};

/// Memoized geometric-mean sequence: `(precision, approximation)` per
/// iteration step. Entry 0 is an unused placeholder so indices line up with
/// iteration counts.
pub(crate) struct PiMemo {
    b_prec: Vec<i32>,
    b_val: Vec<BigInt>,
}

impl PiMemo {
    pub(crate) fn new() -> Self {
        Self {
            b_prec: vec![0],
            b_val: vec![BigInt::one()],
        }
    }
}

/// sqrt(1/2), the iteration's initial geometric mean; shared so its cache
/// survives across calls.
fn sqrt_half() -> CReal {
    static SQRT_HALF: OnceLock<CReal> = OnceLock::new();
    SQRT_HALF
        .get_or_init(|| CReal::from(1).shift_right(1).sqrt())
        .clone()
}

pub(crate) fn approx_pi(memo: &Mutex<PiMemo>, p: i32) -> Result<BigInt, CalcError> {
    let mut state = memo.lock();
    if p >= 0 {
        return Ok(scale(BigInt::from(3), -p));
    }
    // The error of the iteration roughly halves its exponent each step, but
    // fixed-point roundoff accumulates; log2(-p) + 10 guard bits cover it.
    let extra_eval_prec = (-(p as f64)).log2().ceil() as i32 + 10;
    let eval_prec = to_prec(p as i64 - extra_eval_prec as i64)?;
    let mut a = BigInt::one() << (-eval_prec) as usize;
    let mut b = sqrt_half().approx_get(eval_prec)?;
    let mut t = BigInt::one() << (-eval_prec - 2) as usize;
    let mut n = 0usize;
    let tolerance = BigInt::from(4);
    while &a - &b > tolerance {
        check_stop()?;
        let next_a = (&a + &b) >> 1;
        let a_diff = &a - &next_a;
        // b^2 ~ a*b at eval_prec; its square root is the next geometric
        // mean, computed as a constructive real so the seeded Newton path
        // applies.
        let b_prod = (&a * &b) >> (-eval_prec) as usize;
        let b_prod_as_cr = CReal::from(b_prod).shift_left(eval_prec);
        let next_b;
        if state.b_prec.len() == n + 1 {
            // First time this step is reached: compute the root from
            // scratch and append it. A cancelled approximation returns
            // before anything is recorded.
            let next_b_as_cr = b_prod_as_cr.sqrt();
            next_b = next_b_as_cr.approx_get(eval_prec)?;
            let scaled = scale(next_b.clone(), -extra_eval_prec);
            state.b_prec.push(p);
            state.b_val.push(scaled);
        } else {
            // Reuse the root computed at the previous (coarser) precision
            // as the Newton starting point.
            let seed = Approximation {
                precision: state.b_prec[n + 1],
                value: state.b_val[n + 1].clone(),
            };
            let next_b_as_cr = CReal::new_seeded(CrKind::Sqrt(b_prod_as_cr), false, seed);
            next_b = next_b_as_cr.approx_get(eval_prec)?;
            state.b_prec[n + 1] = p;
            state.b_val[n + 1] = scale(next_b.clone(), -extra_eval_prec);
        }
        // t' = t - 2^n (a - a')^2, all at eval_prec.
        let diff_squared = &a_diff * &a_diff;
        let t_correction = crate::real::shift(&diff_squared, to_prec(n as i64 + eval_prec as i64)?);
        t -= t_correction;
        a = next_a;
        b = next_b;
        n += 1;
    }
    let sum = &a + &b;
    let result = (&sum * &sum / &t) >> 2;
    Ok(scale(result, -extra_eval_prec))
}
