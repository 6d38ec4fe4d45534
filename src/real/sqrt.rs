//! Square-root approximation.
//!
//! Two regimes, split on how many result digits are needed:
//! - when a double-precision square root carries enough bits, take the
//!   operand at a matching precision, square-root it in floating point, and
//!   rescale;
//! - otherwise run one Newton step per level of a halving recursion, seeding
//!   each step from this node's own cached approximation. The node may even
//!   be constructed with an explicit starting cache (the pi iteration does
//!   this to reuse square roots across precisions).

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::error::CalcError;
use crate::real::{scale, shift, to_prec, CReal};

/// Bits a double-precision estimate can be trusted for.
const FP_PREC: i32 = 50;
/// Operand bits fed to the floating-point estimate.
const FP_OP_PREC: i32 = 60;

pub(crate) fn approx_sqrt(node: &CReal, op: &CReal, p: i32) -> Result<BigInt, CalcError> {
    let max_op_prec_needed = to_prec(2 * p as i64 - 1)?;
    let msd = match op.iter_msd(max_op_prec_needed)? {
        Some(m) if m > max_op_prec_needed => m,
        // Operand indistinguishable from zero at the precision that
        // matters: so is the root.
        _ => return Ok(BigInt::zero()),
    };
    let result_msd = msd / 2;
    let result_digits = result_msd - p;
    if result_digits > FP_PREC {
        // Newton step: compute a roughly half-precision approximation of
        // the root (recursively, through our own cache) and refine it with
        // x' = (x^2 + op) / (2x) evaluated in fixed point.
        let appr_digits = result_digits / 2 + 6;
        let appr_prec = to_prec(result_msd as i64 - appr_digits as i64)?;
        let prod_prec = to_prec(2 * appr_prec as i64)?;
        let op_appr = op.approx_get(prod_prec)?;
        let last_appr = node.approx_get(appr_prec)?;
        // (last_appr^2 + op) at prod_prec, then divide by last_appr and
        // halve, rescaling to p.
        let prod_prec_scaled_numerator = &last_appr * &last_appr + op_appr;
        let scaled_numerator = scale(prod_prec_scaled_numerator, appr_prec - p);
        let shifted_result = scaled_numerator / last_appr;
        Ok((shifted_result + BigInt::from(1)) >> 1)
    } else {
        // Floating-point seed carries all the digits we need.
        let op_prec = (msd - FP_OP_PREC) & !1; // even, so halving is exact
        let working_prec = op_prec - FP_OP_PREC;
        let scaled_bi_appr = op.approx_get(to_prec(op_prec as i64)?)? << FP_OP_PREC as usize;
        if scaled_bi_appr.is_negative() {
            return Err(CalcError::Domain("square root of a negative value"));
        }
        let scaled_appr = scaled_bi_appr.to_f64().unwrap_or(f64::INFINITY);
        let scaled_fp_sqrt = scaled_appr.sqrt();
        let scaled_sqrt = BigInt::from(scaled_fp_sqrt as i64);
        let shift_count = working_prec / 2 - p;
        Ok(shift(&scaled_sqrt, shift_count))
    }
}
