//! Lazy constructive real numbers.
//!
//! A [`CReal`] is a real number represented by a procedure: ask it for an
//! approximation at binary precision `p` and it returns an integer `a` with
//! `|a * 2^p - value| < 2^p`, i.e. accurate to less than one unit in the
//! last place at that scale. Values form an immutable expression tree of
//! [`CrKind`] variants; nothing is computed until a precision is demanded.
//!
//! Each node carries a single-slot cache of the most precise approximation
//! computed so far, guarded by a re-entrant lock so that concurrent requests
//! on the same node serialize while a node's own `approximate` may still
//! consult its own cache (the square-root Newton iteration seeds itself from
//! its previous approximation).
//!
//! Every variant's `approximate` carries its own error-budget argument:
//! operands are requested a few bits finer than the target so that series
//! truncation and rounding stay under one ulp at the requested precision.
//! The only runtime check is the precision-overflow guard, which is also how
//! divergent computations (division by zero, comparing equal values at ever
//! finer precision) fail instead of looping forever.

use std::cell::RefCell;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use parking_lot::ReentrantMutex;

use crate::concurrency::check_stop;
use crate::error::CalcError;
use crate::rational::BoundedRational;

mod agm_pi;
mod display;
mod sqrt;
mod taylor;

pub use display::ScientificNotation;

/// Most recently cached `(precision, value)` pair; the most precise
/// approximation computed so far for a node.
#[derive(Clone, Debug)]
pub(crate) struct Approximation {
    pub precision: i32,
    pub value: BigInt,
}

/// Selector sign not yet sampled (see [`CrKind::Select`]).
const SIGN_UNSAMPLED: i32 = i32::MIN;

/// Closed set of node variants. Each holds exactly the operands it needs;
/// `approximate` dispatches over the tag.
pub(crate) enum CrKind {
    /// Exact integer literal.
    Int(BigInt),
    /// Sum of two values.
    Add(CReal, CReal),
    /// Negation.
    Neg(CReal),
    /// Product of two values.
    Mul(CReal, CReal),
    /// Multiplicative inverse.
    Inv(CReal),
    /// Value multiplied by `2^count`.
    Shifted(CReal, i32),
    /// `if_neg` when the selector is negative, `if_pos` otherwise. The
    /// selector's sign is sampled coarsely first and pinned down exactly
    /// only when the two branches actually diverge, so `max`/`min`/`abs`
    /// never hang on an indeterminate comparison.
    Select {
        selector: CReal,
        selector_sign: AtomicI32,
        if_neg: CReal,
        if_pos: CReal,
    },
    /// Assumes the value is an integer: evaluation right of the binary
    /// point is suppressed.
    AssumeInt(CReal),
    /// `exp(x)` for `|x|` well below 1/2 (range reduction done by [`CReal::exp`]).
    PrescaledExp(CReal),
    /// `cos(x)` for `|x| < 1/2` (range reduction done by [`CReal::cos`]).
    PrescaledCos(CReal),
    /// `ln(1 + x)` for `|x| < 1/2` (range reduction done by [`CReal::ln`]).
    PrescaledLn(CReal),
    /// `asin(x)` for `|x| < sqrt(2)/2` (range reduction done by [`CReal::asin`]).
    PrescaledAsin(CReal),
    /// `arctan(1/n)` for an integer `n`, `|n| >= 2`.
    AtanReciprocal(BigInt),
    /// Square root, computed by a floating-point seed plus Newton steps.
    Sqrt(CReal),
    /// The constant pi by the Gauss-Legendre AGM iteration, memoizing the
    /// geometric-mean sequence across re-approximation.
    GlPi(parking_lot::Mutex<agm_pi::PiMemo>),
    /// Inverse of a monotone function over an interval (hybrid
    /// bisection/secant search; see `functions`).
    InverseMonotone(Arc<crate::functions::InverseMonotoneCr>),
    /// Numeric derivative of a monotone function (central difference; see
    /// `functions`).
    MonotoneDerivative(Arc<crate::functions::MonotoneDerivativeCr>),
}

pub(crate) struct CrNode {
    kind: CrKind,
    /// Re-entrant so a variant's `approximate` may call `approx_get` on its
    /// own node (square root, pi). The `RefCell` borrows are scoped to the
    /// cache check and the final store, never held across recursion.
    cache: ReentrantMutex<RefCell<Option<Approximation>>>,
    /// Coarse-grid caching for nodes that are expensive to recompute: the
    /// requested precision is rounded down to a multiple of 32 before
    /// computing, trading extra up-front precision for fewer cache misses.
    coarse: bool,
}

/// A lazy constructive real number. Cloning is cheap (shared node).
#[derive(Clone)]
pub struct CReal(pub(crate) Arc<CrNode>);

// ---------------------------------------------------------------------------
// Precision bookkeeping helpers, shared with the submodules.
// ---------------------------------------------------------------------------

/// Guards precision values: they must stay within a factor-of-8 margin of
/// the i32 range so derived child precisions cannot overflow.
pub(crate) fn check_prec(p: i32) -> Result<(), CalcError> {
    let high = p >> 28;
    let high_shifted = p >> 29;
    if high ^ high_shifted != 0 {
        Err(CalcError::PrecisionOverflow)
    } else {
        Ok(())
    }
}

/// Lossless i64 -> precision conversion; out-of-range means the computation
/// has diverged.
pub(crate) fn to_prec(value: i64) -> Result<i32, CalcError> {
    i32::try_from(value).map_err(|_| CalcError::PrecisionOverflow)
}

/// Multiplies by `2^n` without rounding.
pub(crate) fn shift(k: &BigInt, n: i32) -> BigInt {
    if n == 0 {
        k.clone()
    } else if n > 0 {
        k << n as usize
    } else {
        // num-bigint's shift-right floors, matching arithmetic shift.
        k >> (-n) as usize
    }
}

/// Multiplies by `2^n`, rounding to nearest when shifting right.
pub(crate) fn scale(k: BigInt, n: i32) -> BigInt {
    if n >= 0 {
        k << n as usize
    } else {
        let adjusted = shift(&k, n + 1) + BigInt::one();
        adjusted >> 1
    }
}

/// Ceiling of log2(|n|) for small positive n.
pub(crate) fn bound_log2(n: i32) -> i32 {
    let abs = n.unsigned_abs().max(1) as f64;
    abs.log2().ceil() as i32
}

pub(crate) fn sign_of(value: &BigInt) -> i32 {
    match value.sign() {
        Sign::Minus => -1,
        Sign::NoSign => 0,
        Sign::Plus => 1,
    }
}

impl CReal {
    pub(crate) fn new(kind: CrKind, coarse: bool) -> Self {
        Self(Arc::new(CrNode {
            kind,
            cache: ReentrantMutex::new(RefCell::new(None)),
            coarse,
        }))
    }

    /// Node with a pre-seeded approximation cache. Used by the pi iteration
    /// to hand a square root its previous, coarser approximation as the
    /// Newton starting point.
    pub(crate) fn new_seeded(kind: CrKind, coarse: bool, seed: Approximation) -> Self {
        Self(Arc::new(CrNode {
            kind,
            cache: ReentrantMutex::new(RefCell::new(Some(seed))),
            coarse,
        }))
    }

    pub fn from_rational(r: &BoundedRational) -> Self {
        let num = Self::from(r.numerator().clone());
        if r.denominator().is_one() {
            return num;
        }
        num * Self::from(r.denominator().clone()).inverse()
    }

    // -----------------------------------------------------------------------
    // The public approximation contract.
    // -----------------------------------------------------------------------

    /// Returns an integer `a` with `|a * 2^p - value| < 2^p`.
    ///
    /// Answers from the cache by rescaling when the cached precision covers
    /// the request; otherwise computes, replaces the cache with the new
    /// `(precision, value)` pair, and rescales. The cache is written only
    /// after `approximate` succeeds, so a cancelled evaluation leaves it in
    /// its previous state.
    pub fn approx_get(&self, p: i32) -> Result<BigInt, CalcError> {
        check_prec(p)?;
        let guard = self.0.cache.lock();
        {
            let cached = guard.borrow();
            if let Some(appr) = cached.as_ref() {
                if appr.precision <= p {
                    return Ok(scale(appr.value.clone(), appr.precision - p));
                }
            }
        }
        // Coarse nodes round the target down (toward finer precision) to a
        // 32-entry grid so repeated slightly-deeper requests hit the cache.
        let computed_prec = if self.0.coarse { p & !31 } else { p };
        check_prec(computed_prec)?;
        let value = self.approximate(computed_prec)?;
        *guard.borrow_mut() = Some(Approximation {
            precision: computed_prec,
            value: value.clone(),
        });
        Ok(scale(value, computed_prec - p))
    }

    /// Non-blocking peek at the cache, as `(precision, msd)` evidence: the
    /// position of the leading nonzero bit when the cached approximation is
    /// large enough to pin it down.
    fn cached_msd(&self) -> Option<i32> {
        let guard = self.0.cache.try_lock()?;
        let cached = guard.borrow();
        let appr = cached.as_ref()?;
        if appr.value.magnitude().bits() <= 1 {
            // +/-1 or 0: the leading-bit position is not yet known.
            return None;
        }
        Some(appr.precision + appr.value.bits() as i32 - 1)
    }

    /// Position of the most significant digit: the largest `m` with
    /// `2^m <= |value|`, determined from an approximation at precision `p`.
    /// `None` means `|value| < 2^(p+1)`, i.e. the value could not be
    /// distinguished from zero at this precision.
    pub(crate) fn msd(&self, p: i32) -> Result<Option<i32>, CalcError> {
        if let Some(m) = self.cached_msd() {
            return Ok(Some(m));
        }
        let appr = self.approx_get(to_prec(p as i64 - 1)?)?;
        if appr.magnitude().bits() <= 1 {
            return Ok(None);
        }
        Ok(Some(p - 1 + appr.bits() as i32 - 1))
    }

    /// Searches for the msd at geometrically deepening precisions, giving up
    /// at `p`.
    pub(crate) fn iter_msd(&self, p: i32) -> Result<Option<i32>, CalcError> {
        let mut prec: i64 = 0;
        while prec > p as i64 + 30 {
            if let Some(m) = self.msd(to_prec(prec)?)? {
                return Ok(Some(m));
            }
            check_stop()?;
            prec = prec * 3 / 2 - 16;
        }
        self.msd(p)
    }

    /// Unbounded msd search. Diverges to a precision-overflow error for a
    /// value that is exactly zero; this is how division by zero surfaces
    /// from the lazy path.
    pub(crate) fn msd_unbounded(&self) -> Result<i32, CalcError> {
        let mut prec: i64 = 0;
        loop {
            let prec32 = to_prec(prec)?;
            check_prec(prec32)?;
            if let Some(m) = self.msd(prec32)? {
                return Ok(m);
            }
            check_stop()?;
            prec = prec * 3 / 2 - 16;
        }
    }

    // -----------------------------------------------------------------------
    // Variant dispatch.
    // -----------------------------------------------------------------------

    /// Computes a fresh approximation at precision `p`, accurate to < 1 ulp
    /// given children accurate to the precisions requested of them.
    fn approximate(&self, p: i32) -> Result<BigInt, CalcError> {
        match &self.0.kind {
            CrKind::Int(value) => Ok(scale(value.clone(), -p)),
            CrKind::Add(a, b) => {
                // Both terms 2 bits finer; their combined error plus the
                // final rounding stays under 1 ulp at p.
                let child_prec = to_prec(p as i64 - 2)?;
                Ok(scale(
                    a.approx_get(child_prec)? + b.approx_get(child_prec)?,
                    -2,
                ))
            }
            CrKind::Neg(a) => Ok(-a.approx_get(p)?),
            CrKind::Mul(a, b) => approx_mul(a, b, p),
            CrKind::Inv(a) => approx_inv(a, p),
            CrKind::Shifted(a, count) => a.approx_get(to_prec(p as i64 - *count as i64)?),
            CrKind::Select {
                selector,
                selector_sign,
                if_neg,
                if_pos,
            } => approx_select(selector, selector_sign, if_neg, if_pos, p),
            CrKind::AssumeInt(a) => {
                if p >= 0 {
                    a.approx_get(p)
                } else {
                    Ok(scale(a.approx_get(0)?, -p))
                }
            }
            CrKind::PrescaledExp(a) => taylor::approx_exp(a, p),
            CrKind::PrescaledCos(a) => taylor::approx_cos(a, p),
            CrKind::PrescaledLn(a) => taylor::approx_ln1p(a, p),
            CrKind::PrescaledAsin(a) => taylor::approx_asin(a, p),
            CrKind::AtanReciprocal(n) => taylor::approx_atan_reciprocal(n, p),
            CrKind::Sqrt(a) => sqrt::approx_sqrt(self, a, p),
            CrKind::GlPi(memo) => agm_pi::approx_pi(memo, p),
            CrKind::InverseMonotone(data) => data.approximate(p),
            CrKind::MonotoneDerivative(data) => data.approximate(p),
        }
    }

    // -----------------------------------------------------------------------
    // Operations that build new nodes.
    // -----------------------------------------------------------------------

    pub fn inverse(&self) -> Self {
        Self::new(CrKind::Inv(self.clone()), false)
    }

    /// Multiplies by `2^n`. An out-of-range shift surfaces as a
    /// precision-overflow error when an approximation is requested.
    pub fn shift_left(&self, n: i32) -> Self {
        Self::new(CrKind::Shifted(self.clone(), n), false)
    }

    pub fn shift_right(&self, n: i32) -> Self {
        self.shift_left(n.saturating_neg())
    }

    /// Declares the value to be an integer, suppressing evaluation right of
    /// the binary point.
    pub fn assume_int(&self) -> Self {
        Self::new(CrKind::AssumeInt(self.clone()), false)
    }

    /// `if_neg` when `selector < 0`, `if_pos` when `selector > 0`; either
    /// when the two agree closely enough to not matter.
    pub fn select(selector: &Self, if_neg: &Self, if_pos: &Self) -> Self {
        Self::new(
            CrKind::Select {
                selector: selector.clone(),
                selector_sign: AtomicI32::new(SIGN_UNSAMPLED),
                if_neg: if_neg.clone(),
                if_pos: if_pos.clone(),
            },
            false,
        )
    }

    pub fn max(&self, other: &Self) -> Self {
        Self::select(&(self.clone() - other.clone()), other, self)
    }

    pub fn min(&self, other: &Self) -> Self {
        Self::select(&(self.clone() - other.clone()), self, other)
    }

    pub fn abs(&self) -> Self {
        Self::select(self, &-self.clone(), self)
    }

    pub fn sqrt(&self) -> Self {
        Self::new(CrKind::Sqrt(self.clone()), false)
    }

    /// Coarse-caching proxy for expensive nodes (anything built on top of a
    /// square root): approximation requests are rounded down to a 32-entry
    /// precision grid so a caller that keeps asking for slightly more
    /// precision hits the cache instead of recomputing.
    pub fn coarse_cached(&self) -> Self {
        Self::new(CrKind::Shifted(self.clone(), 0), true)
    }

    /// The constant pi. The underlying AGM node is shared process-wide so
    /// its memoized square-root sequence benefits every user.
    pub fn pi() -> Self {
        static PI: OnceLock<CReal> = OnceLock::new();
        PI.get_or_init(|| CReal::new(CrKind::GlPi(parking_lot::Mutex::new(agm_pi::PiMemo::new())), true))
            .clone()
    }

    pub fn half_pi() -> Self {
        Self::pi().shift_right(1)
    }

    /// `arctan(1/n)` for an integer `n` with `|n| >= 2`.
    pub fn atan_reciprocal(n: BigInt) -> Self {
        Self::new(CrKind::AtanReciprocal(n), false)
    }

    fn prescaled_exp(&self) -> Self {
        Self::new(CrKind::PrescaledExp(self.clone()), false)
    }

    fn prescaled_cos(&self) -> Self {
        Self::new(CrKind::PrescaledCos(self.clone()), false)
    }

    /// `ln(1 + self)`; valid only after range reduction.
    fn prescaled_ln1p(&self) -> Self {
        Self::new(CrKind::PrescaledLn(self.clone()), false)
    }

    fn prescaled_asin(&self) -> Self {
        Self::new(CrKind::PrescaledAsin(self.clone()), false)
    }

    /// `ln(self)` without range reduction, for arguments already near 1.
    fn simple_ln(&self) -> Self {
        (self.clone() - Self::from(1)).prescaled_ln1p()
    }

    /// ln 2 from 7 ln(10/9) - 2 ln(25/24) + 3 ln(81/80); each factor is
    /// close enough to 1 for the direct series.
    fn ln2() -> Self {
        static LN2: OnceLock<CReal> = OnceLock::new();
        LN2.get_or_init(|| {
            let term = |k: i64, num: i64, den: i64| {
                CReal::from(k) * (CReal::from(num) * CReal::from(den).inverse()).simple_ln()
            };
            term(7, 10, 9) - term(2, 25, 24) + term(3, 81, 80)
        })
        .clone()
    }

    /// The exponential function. A rough approximation decides whether the
    /// argument is small enough for the direct series; otherwise the
    /// argument is halved recursively and the result squared.
    pub fn exp(&self) -> Result<Self, CalcError> {
        const LOW_PREC: i32 = -10;
        let rough = self.approx_get(LOW_PREC)?;
        if rough.magnitude().bits() > 1 {
            let sqrt_of_result = self.shift_right(1).exp()?;
            Ok(sqrt_of_result.clone() * sqrt_of_result)
        } else {
            Ok(self.prescaled_exp())
        }
    }

    /// Natural logarithm. Arguments are pushed toward 1 by inversion,
    /// repeated square roots, or a power-of-two rescale plus a multiple of
    /// ln 2, then handed to the series for ln(1 + x).
    pub fn ln(&self) -> Result<Self, CalcError> {
        const LOW_PREC: i32 = -4;
        // Sixteenths of the argument value.
        let rough = self.approx_get(LOW_PREC)?;
        let low_limit = BigInt::from(8); // 1/2
        let high_limit = BigInt::from(24); // 3/2
        let scaled_4 = BigInt::from(64); // 4
        if rough.is_negative() {
            return Err(CalcError::Domain("logarithm of a negative value"));
        }
        if rough <= low_limit {
            // Arguments at or below 1/2 (including an exact zero, which
            // diverges lazily as a precision overflow).
            return Ok(-self.inverse().ln()?);
        }
        if rough >= high_limit {
            if rough <= scaled_4 {
                let quarter = self.sqrt().sqrt().ln()?;
                return Ok(quarter.shift_left(2));
            }
            let extra_bits = rough.bits() as i32 - 3;
            let scaled_result = self.shift_right(extra_bits).ln()?;
            return Ok(scaled_result + Self::from(extra_bits as i64) * Self::ln2());
        }
        Ok(self.simple_ln())
    }

    /// Cosine. Large arguments are reduced modulo pi; mid-range arguments
    /// go through the double-angle formula; small ones use the series.
    pub fn cos(&self) -> Result<Self, CalcError> {
        let halfpi_multiples = (self.clone() / Self::pi()).approx_get(-1)?;
        if halfpi_multiples.magnitude() >= &BigUint::from(2u32) {
            // At least pi away from zero: subtract a multiple of pi and
            // flip the sign for odd multiples.
            let pi_multiples = scale(halfpi_multiples, -1);
            let adjustment = Self::pi() * Self::from(pi_multiples.clone());
            let reduced = (self.clone() - adjustment).cos()?;
            if pi_multiples.is_odd() {
                Ok(-reduced)
            } else {
                Ok(reduced)
            }
        } else if self.approx_get(-1)?.magnitude() >= &BigUint::from(2u32) {
            // |x| >= ~1: cos(x) = 2 cos^2(x/2) - 1.
            let cos_half = self.shift_right(1).cos()?;
            Ok((cos_half.clone() * cos_half).shift_left(1) - Self::from(1))
        } else {
            Ok(self.prescaled_cos())
        }
    }

    pub fn sin(&self) -> Result<Self, CalcError> {
        (Self::half_pi() - self.clone()).cos()
    }

    pub fn tan(&self) -> Result<Self, CalcError> {
        Ok(self.sin()? / self.cos()?)
    }

    /// Arcsine. Arguments above sqrt(2)/2 in magnitude are rerouted through
    /// the cosine identity so the series argument stays small.
    pub fn asin(&self) -> Result<Self, CalcError> {
        const LOW_PREC: i32 = -10;
        let rough = self.approx_get(LOW_PREC)?;
        let threshold = BigInt::from(750); // ~ sqrt(2)/2 at scale 2^-10
        if rough > threshold {
            let new_arg = (Self::from(1) - self.clone() * self.clone()).sqrt();
            new_arg.acos()
        } else if rough < -threshold {
            Ok(-(-self.clone()).asin()?)
        } else {
            Ok(self.prescaled_asin())
        }
    }

    pub fn acos(&self) -> Result<Self, CalcError> {
        Ok(Self::half_pi() - self.asin()?)
    }

    /// Arctangent via asin(x / sqrt(1 + x^2)).
    pub fn atan(&self) -> Result<Self, CalcError> {
        let denominator = (Self::from(1) + self.clone() * self.clone()).sqrt();
        (self.clone() * denominator.inverse()).asin()
    }

    // -----------------------------------------------------------------------
    // Comparisons.
    // -----------------------------------------------------------------------

    /// Compares with both a relative tolerance `rel_tol` (in bits, applied
    /// at the operands' common magnitude) and an absolute tolerance
    /// `abs_tol`. Returns 0 only when the values are within tolerance;
    /// nonzero answers are exact.
    pub fn compare_tol(&self, other: &Self, rel_tol: i32, abs_tol: i32) -> Result<i32, CalcError> {
        let this_msd = self.iter_msd(abs_tol)?;
        let other_bound = this_msd.map_or(abs_tol, |m| m.max(abs_tol));
        let other_msd = other.iter_msd(other_bound)?;
        let max_msd = match (this_msd, other_msd) {
            (None, None) => return Ok(0),
            (a, b) => a.max(b).unwrap_or(abs_tol),
        };
        check_prec(rel_tol)?;
        let rel = to_prec(max_msd as i64 + rel_tol as i64)?;
        let abs_prec = rel.max(abs_tol);
        self.compare_abs(other, abs_prec)
    }

    /// Compares within the absolute tolerance `2^abs_tol`: returns 0 when
    /// the difference is provably below the tolerance, otherwise the exact
    /// sign of the difference.
    pub fn compare_abs(&self, other: &Self, abs_tol: i32) -> Result<i32, CalcError> {
        let needed_prec = to_prec(abs_tol as i64 - 1)?;
        let this_appr = self.approx_get(needed_prec)?;
        let other_appr = other.approx_get(needed_prec)?;
        if this_appr > &other_appr + BigInt::one() {
            Ok(1)
        } else if this_appr < other_appr - BigInt::one() {
            Ok(-1)
        } else {
            Ok(0)
        }
    }

    /// Exact comparison with no tolerance. By design this never returns
    /// when the two values are equal: equality of constructive reals is
    /// undecidable, so the search for a separating precision runs until it
    /// is cancelled or the precision guard fires.
    pub fn compare(&self, other: &Self) -> Result<i32, CalcError> {
        let mut tol: i64 = -20;
        loop {
            let tol32 = to_prec(tol)?;
            check_prec(tol32)?;
            let result = self.compare_abs(other, tol32)?;
            if result != 0 {
                return Ok(result);
            }
            check_stop()?;
            tol *= 2;
        }
    }

    /// Sign, treating `|value| < 2^abs_tol` as zero.
    pub fn signum_abs(&self, abs_tol: i32) -> Result<i32, CalcError> {
        let appr = self.approx_get(to_prec(abs_tol as i64 - 1)?)?;
        Ok(sign_of(&appr))
    }

    /// Exact sign. Like [`CReal::compare`], never returns for an exact zero.
    pub fn signum(&self) -> Result<i32, CalcError> {
        let mut tol: i64 = -20;
        loop {
            let tol32 = to_prec(tol)?;
            check_prec(tol32)?;
            let result = self.signum_abs(tol32)?;
            if result != 0 {
                return Ok(result);
            }
            check_stop()?;
            tol *= 2;
        }
    }
}

// ---------------------------------------------------------------------------
// Variant approximations kept alongside the dispatch.
// ---------------------------------------------------------------------------

/// Product: find the leading-bit position of the larger operand first
/// (swapping if needed), then request the other operand at a precision
/// derived from it so the relative error budget is respected.
fn approx_mul(a: &CReal, b: &CReal, p: i32) -> Result<BigInt, CalcError> {
    let half_prec = (p >> 1) - 1;
    let (first, second, first_msd) = match a.msd(half_prec)? {
        Some(m) => (a, b, m),
        None => match b.msd(half_prec)? {
            Some(m) => (b, a, m),
            // Both operands provably below 2^half_prec: the product is zero
            // to within 1 ulp at p.
            None => return Ok(BigInt::zero()),
        },
    };
    let second_prec = to_prec(p as i64 - first_msd as i64 - 3)?;
    let second_appr = second.approx_get(second_prec)?;
    if second_appr.is_zero() {
        return Ok(BigInt::zero());
    }
    let second_msd = second_prec + second_appr.bits() as i32 - 1;
    let first_prec = to_prec(p as i64 - second_msd as i64 - 3)?;
    let first_appr = first.approx_get(first_prec)?;
    let scale_digits = to_prec(first_prec as i64 + second_prec as i64 - p as i64)?;
    Ok(scale(first_appr * second_appr, scale_digits))
}

/// Inverse: the divisor's leading-bit position fixes how many digits of it
/// we need; adding half the divisor before the integer division turns
/// truncation into correct rounding.
fn approx_inv(a: &CReal, p: i32) -> Result<BigInt, CalcError> {
    let msd = a.msd_unbounded()?;
    let inv_msd = 1 - msd;
    let digits_needed = to_prec(inv_msd as i64 - p as i64 + 3)?;
    let prec_needed = to_prec(msd as i64 - digits_needed as i64)?;
    let log_scale_factor = -(p as i64) - prec_needed as i64;
    if log_scale_factor < 0 {
        return Ok(BigInt::zero());
    }
    let dividend = BigInt::one() << log_scale_factor as usize;
    let scaled_divisor = a.approx_get(prec_needed)?;
    let abs_divisor = scaled_divisor.abs();
    let adjusted_dividend = dividend + (&abs_divisor >> 1u32);
    let result = adjusted_dividend / &abs_divisor;
    if scaled_divisor.is_negative() {
        Ok(-result)
    } else {
        Ok(result)
    }
}

fn approx_select(
    selector: &CReal,
    selector_sign: &AtomicI32,
    if_neg: &CReal,
    if_pos: &CReal,
    p: i32,
) -> Result<BigInt, CalcError> {
    let mut sign = selector_sign.load(Ordering::Relaxed);
    if sign == SIGN_UNSAMPLED {
        sign = sign_of(&selector.approx_get(-20)?);
        if sign != 0 {
            selector_sign.store(sign, Ordering::Relaxed);
        }
    }
    if sign < 0 {
        return if_neg.approx_get(p);
    }
    if sign > 0 {
        return if_pos.approx_get(p);
    }
    // Undecided: if the branches agree to within an ulp the answer is fine
    // either way; otherwise the selector's sign must be pinned down exactly.
    let child_prec = to_prec(p as i64 - 1)?;
    let neg_appr = if_neg.approx_get(child_prec)?;
    let pos_appr = if_pos.approx_get(child_prec)?;
    if (&neg_appr - &pos_appr).abs() <= BigInt::one() {
        return Ok(scale(neg_appr, -1));
    }
    if selector.signum()? < 0 {
        selector_sign.store(-1, Ordering::Relaxed);
        Ok(scale(neg_appr, -1))
    } else {
        selector_sign.store(1, Ordering::Relaxed);
        Ok(scale(pos_appr, -1))
    }
}

// ---------------------------------------------------------------------------
// Conversions and operators.
// ---------------------------------------------------------------------------

impl From<BigInt> for CReal {
    fn from(value: BigInt) -> Self {
        Self::new(CrKind::Int(value), false)
    }
}

impl From<i64> for CReal {
    fn from(value: i64) -> Self {
        Self::from(BigInt::from(value))
    }
}

impl CReal {
    /// Converts a finite `f64` exactly from its binary mantissa and
    /// exponent. `None` for NaN and infinities.
    pub fn from_f64(value: f64) -> Option<Self> {
        let r = BoundedRational::from_f64(value)?;
        Some(Self::from_rational(&r))
    }
}

impl std::ops::Neg for CReal {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(CrKind::Neg(self), false)
    }
}

impl std::ops::Add for CReal {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(CrKind::Add(self, rhs), false)
    }
}

impl std::ops::Sub for CReal {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        self + (-rhs)
    }
}

impl std::ops::Mul for CReal {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self::new(CrKind::Mul(self, rhs), false)
    }
}

#[allow(clippy::suspicious_arithmetic_impl)]
impl std::ops::Div for CReal {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        self * rhs.inverse()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::test_utils::cr_ratio;

    /// Asserts that `approx_get(p)` returns exactly `expected_times_2p`.
    fn expect_appr(x: &CReal, p: i32, expected_times_2p: i64) {
        let appr = x.approx_get(p).expect("approximation should succeed");
        assert_eq!(appr, BigInt::from(expected_times_2p), "at precision {p}");
    }

    #[test]
    fn integer_literal_scales_to_requested_precision() {
        let three = CReal::from(3);
        expect_appr(&three, 0, 3);
        expect_appr(&three, -2, 12);
        expect_appr(&three, 2, 1); // 3/4 rounds to 1
    }

    #[test]
    fn field_ops_are_exact_on_rationals() {
        // (1/2 + 1/4) * 4 - 3 == 0, checked to many precisions.
        let x = (cr_ratio(1, 2) + cr_ratio(1, 4)) * CReal::from(4) - CReal::from(3);
        for p in -64..=0 {
            let appr = x.approx_get(p).expect("approximation should succeed");
            assert!(
                appr.magnitude().bits() <= 1,
                "expected ~0 at precision {p}, got {appr}"
            );
        }
    }

    #[test]
    fn rational_tree_is_within_one_ulp_everywhere() {
        // x = 7/3: |appr * 2^p - 7/3| < 2^p for p in -64..=64, checked by
        // cross-multiplication so everything stays an integer:
        // |appr * 3 - 7 * 2^(-p)| < 3 at negative p, and
        // |appr * 3 * 2^p - 7| < 3 * 2^p at nonnegative p.
        let x = cr_ratio(7, 3);
        for p in -64..=64i32 {
            let appr = x.approx_get(p).expect("approximation should succeed");
            let (difference, limit): (BigInt, BigInt) = if p >= 0 {
                (
                    (&appr * 3 << p as u32) - BigInt::from(7),
                    BigInt::from(3) << p as u32,
                )
            } else {
                (
                    &appr * 3 - (BigInt::from(7) << (-p) as u32),
                    BigInt::from(3),
                )
            };
            assert!(difference.magnitude() < limit.magnitude(), "precision {p}");
        }
    }

    #[test]
    fn repeated_requests_are_bit_identical() {
        let x = cr_ratio(1, 3);
        let first = x.approx_get(-50).expect("approximation should succeed");
        let second = x.approx_get(-50).expect("approximation should succeed");
        assert_eq!(first, second);
        // A coarser request after a finer one must be the rescaled cache.
        let coarse = x.approx_get(-10).expect("approximation should succeed");
        assert_eq!(coarse, scale(first, -40));
    }

    #[test]
    fn precision_guard_fires_near_the_boundary() {
        let x = CReal::from(1);
        assert_eq!(x.approx_get(i32::MAX - 2), Err(CalcError::PrecisionOverflow));
        assert_eq!(x.approx_get(i32::MIN + 2), Err(CalcError::PrecisionOverflow));
        // Well within the factor-of-8 margin is fine.
        assert!(x.approx_get(1 << 27).is_ok());
    }

    #[test]
    fn division_by_zero_surfaces_as_precision_overflow() {
        let zero = CReal::from(0);
        let inv = zero.inverse();
        assert_eq!(inv.approx_get(-10), Err(CalcError::PrecisionOverflow));
    }

    #[test]
    fn select_picks_the_right_branch() {
        let a = CReal::from(2);
        let b = CReal::from(5);
        assert_eq!(
            a.max(&b).approx_get(0).expect("max should approximate"),
            BigInt::from(5)
        );
        assert_eq!(
            a.min(&b).approx_get(0).expect("min should approximate"),
            BigInt::from(2)
        );
        let neg = CReal::from(-7);
        assert_eq!(
            neg.abs().approx_get(0).expect("abs should approximate"),
            BigInt::from(7)
        );
    }

    #[test]
    fn sqrt_two_matches_known_expansion() {
        let sqrt2 = CReal::from(2).sqrt();
        // sqrt(2) * 2^40 = 1554944255987.73...
        let appr = sqrt2.approx_get(-40).expect("sqrt should approximate");
        let expected = BigInt::from(1_554_944_255_988i64);
        let diff = (&appr - &expected).magnitude().clone();
        assert!(diff <= 1u32.into(), "got {appr}");
    }

    #[test]
    fn exp_and_ln_round_trip() {
        let x = cr_ratio(5, 4);
        let round_trip = x.ln().expect("ln").exp().expect("exp");
        let diff = round_trip - x;
        let appr = diff.approx_get(-40).expect("difference should approximate");
        assert!(appr.magnitude().bits() <= 2, "residual {appr}");
    }

    #[test]
    fn cos_of_zero_is_one() {
        let one = CReal::from(0).cos().expect("cos");
        assert_eq!(one.approx_get(-20).expect("approx"), BigInt::one() << 20u32);
    }

    #[test]
    fn pi_matches_machin() {
        // AGM pi against 4 * (4 atan(1/5) - atan(1/239)).
        let machin = (CReal::atan_reciprocal(BigInt::from(5)).shift_left(2)
            - CReal::atan_reciprocal(BigInt::from(239)))
        .shift_left(2);
        let diff = CReal::pi() - machin;
        assert_eq!(
            diff.signum_abs(-100).expect("signum within tolerance"),
            0
        );
    }

    #[test]
    fn compare_with_tolerance_on_close_values() {
        let a = cr_ratio(1, 3);
        let b = cr_ratio(1, 3) + cr_ratio(1, 1 << 30);
        assert_eq!(a.compare_abs(&b, -10).expect("compare"), 0);
        assert_eq!(a.compare_abs(&b, -60).expect("compare"), -1);
        assert_eq!(a.compare(&b).expect("distinct values terminate"), -1);
    }

    #[test]
    fn sin_of_half_pi_is_one_within_tolerance() {
        let sin = CReal::half_pi().sin().expect("sin");
        assert_eq!(
            sin.compare_abs(&CReal::from(1), -60).expect("compare"),
            0
        );
    }
}
