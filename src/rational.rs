//! Exact rational arithmetic with a hard size cap.
//!
//! [`BoundedRational`] is the fast path of the engine: numeric literals and
//! every arithmetic step that stays exactly representable are kept as a
//! numerator/denominator pair of `BigInt`s. Rather than growing without
//! bound, any operation whose result would exceed [`MAX_SIZE_BITS`] combined
//! bits returns `None` ("too big"), which callers treat as the signal to
//! fall back to the lazy constructive-real representation.
//!
//! Reduction to lowest terms is amortized: it always happens before
//! user-facing conversion and whenever a result is near the size cap, but
//! after ordinary arithmetic only about one time in sixteen. Computing a
//! gcd after every operation would dominate the cost of typical calculator
//! expressions.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::concurrency::check_stop;
use crate::error::CalcError;

/// Combined numerator + denominator bit-size cap.
pub const MAX_SIZE_BITS: u64 = 10_000;

/// Exponents above this bit length make `pow` refuse rather than risk
/// unbounded growth.
const MAX_POW_EXP_BITS: u64 = 1_000;

/// An immutable exact rational with bounded size.
///
/// The denominator is never zero; its sign may carry the overall sign until
/// [`BoundedRational::reduce`] normalizes it. Unrepresentable ("too big")
/// results are conveyed as `Option::None` by the arithmetic operations, and
/// absence propagates: any operation with a `None` operand yields `None`.
#[derive(Clone, Debug)]
pub struct BoundedRational {
    num: BigInt,
    den: BigInt,
}

static REDUCE_TICK: AtomicUsize = AtomicUsize::new(0);

/// Amortized reduction decision: true roughly once per sixteen calls.
fn reduce_due() -> bool {
    REDUCE_TICK.fetch_add(1, AtomicOrdering::Relaxed) & 0xf == 0
}

impl BoundedRational {
    /// Creates `num / den`. Returns `None` for a zero denominator.
    pub fn new(num: BigInt, den: BigInt) -> Option<Self> {
        if den.is_zero() {
            return None;
        }
        Some(Self { num, den })
    }

    pub fn from_big_int(value: BigInt) -> Self {
        Self {
            num: value,
            den: BigInt::one(),
        }
    }

    pub fn from_i64(value: i64) -> Self {
        Self::from_big_int(BigInt::from(value))
    }

    /// Creates `num / den` from machine integers. `None` for a zero
    /// denominator.
    pub fn from_ratio(num: i64, den: i64) -> Option<Self> {
        Self::new(BigInt::from(num), BigInt::from(den))
    }

    /// Converts a finite `f64` exactly, reading off its binary mantissa and
    /// exponent. Returns `None` for NaN and infinities.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let bits = value.to_bits();
        let raw_exp = ((bits >> 52) & 0x7ff) as i64;
        let frac = bits & ((1u64 << 52) - 1);
        let (mantissa, exp) = if raw_exp == 0 {
            (frac, -1074i64)
        } else {
            (frac | (1u64 << 52), raw_exp - 1075)
        };
        let mut num = BigInt::from(mantissa);
        if value.is_sign_negative() {
            num = -num;
        }
        if exp >= 0 {
            Some(Self {
                num: num << exp as u64,
                den: BigInt::one(),
            })
        } else {
            Some(Self {
                num,
                den: BigInt::one() << (-exp) as u64,
            })
        }
    }

    pub fn zero() -> Self {
        Self::from_i64(0)
    }

    pub fn one() -> Self {
        Self::from_i64(1)
    }

    pub fn numerator(&self) -> &BigInt {
        &self.num
    }

    pub fn denominator(&self) -> &BigInt {
        &self.den
    }

    /// Equivalent fraction with a positive denominator.
    fn positive_den(&self) -> Self {
        if self.den.is_negative() {
            Self {
                num: -&self.num,
                den: -&self.den,
            }
        } else {
            self.clone()
        }
    }

    /// Lowest-terms equivalent with a positive denominator.
    pub fn reduce(&self) -> Self {
        let r = self.positive_den();
        let divisor = r.num.gcd(&r.den);
        if divisor.is_one() {
            r
        } else {
            Self {
                num: &r.num / &divisor,
                den: &r.den / &divisor,
            }
        }
    }

    fn too_big(&self) -> bool {
        if self.den.is_one() {
            return false;
        }
        self.num.magnitude().bits() + self.den.magnitude().bits() > MAX_SIZE_BITS
    }

    /// Applies the amortized reduction policy and the size cap: reduces when
    /// due or when oversized, and converts a still-oversized result to
    /// `None`.
    fn bounded(self) -> Option<Self> {
        if !self.too_big() && !reduce_due() {
            return Some(self);
        }
        let reduced = self.reduce();
        if reduced.too_big() {
            None
        } else {
            Some(reduced)
        }
    }

    pub fn sign(&self) -> i32 {
        (self.num.signum() * self.den.signum())
            .to_i32()
            .unwrap_or(0)
    }

    pub fn negate(&self) -> Self {
        Self {
            num: -&self.num,
            den: self.den.clone(),
        }
    }

    pub fn add(&self, other: &Self) -> Option<Self> {
        let den = &self.den * &other.den;
        let num = &self.num * &other.den + &other.num * &self.den;
        Self { num, den }.bounded()
    }

    pub fn subtract(&self, other: &Self) -> Option<Self> {
        self.add(&other.negate())
    }

    pub fn multiply(&self, other: &Self) -> Option<Self> {
        Self {
            num: &self.num * &other.num,
            den: &self.den * &other.den,
        }
        .bounded()
    }

    /// Multiplicative inverse. Division by an exactly-zero value is a hard
    /// error, not a "too big" fallback.
    pub fn inverse(&self) -> Result<Self, CalcError> {
        if self.num.is_zero() {
            return Err(CalcError::DivisionByZero);
        }
        Ok(Self {
            num: self.den.clone(),
            den: self.num.clone(),
        })
    }

    pub fn divide(&self, other: &Self) -> Result<Option<Self>, CalcError> {
        Ok(self.multiply(&other.inverse()?))
    }

    /// Raises to an integer power by iterative binary exponentiation,
    /// checking for cancellation once per squaring step. Exponents longer
    /// than [`MAX_POW_EXP_BITS`] bits yield `None` rather than attempting an
    /// astronomically large result.
    pub fn pow_int(&self, exp: &BigInt) -> Result<Option<Self>, CalcError> {
        if exp.is_negative() {
            let inverted = self.inverse()?;
            return inverted.pow_int(&-exp);
        }
        if exp.magnitude().bits() > MAX_POW_EXP_BITS {
            return Ok(None);
        }
        if self.num.is_zero() && exp.is_zero() {
            // 0^0 = 1 by the convention the evaluator expects.
            return Ok(Some(Self::one()));
        }
        let mut result = Self::one();
        let mut base = self.clone();
        let bits = exp.magnitude().bits();
        for i in 0..bits {
            check_stop()?;
            if exp.magnitude().bit(i) {
                result = match result.multiply(&base) {
                    Some(r) => r,
                    None => return Ok(None),
                };
            }
            if i + 1 < bits {
                base = match base.multiply(&base) {
                    Some(b) => b,
                    None => return Ok(None),
                };
            }
        }
        Ok(Some(result))
    }

    /// Rational-exponent power; succeeds only when the exponent reduces to
    /// an integer.
    pub fn pow(&self, exp: &Self) -> Result<Option<Self>, CalcError> {
        if exp.num.is_zero() {
            return Ok(Some(Self::one()));
        }
        let exp = exp.reduce();
        if !exp.den.is_one() {
            return Ok(None);
        }
        self.pow_int(&exp.num)
    }

    /// Exact square root, available only when both the reduced numerator and
    /// denominator are perfect squares.
    pub fn sqrt(&self) -> Result<Option<Self>, CalcError> {
        let r = self.reduce();
        if r.num.is_negative() {
            return Err(CalcError::Domain("square root of a negative value"));
        }
        let num_root = r.num.sqrt();
        if &num_root * &num_root != r.num {
            return Ok(None);
        }
        let den_root = r.den.sqrt();
        if &den_root * &den_root != r.den {
            return Ok(None);
        }
        Ok(Some(Self {
            num: num_root,
            den: den_root,
        }))
    }

    /// Exact integer value, or `None` when non-integral.
    pub fn to_big_int(&self) -> Option<BigInt> {
        let r = self.reduce();
        if r.den.is_one() {
            Some(r.num)
        } else {
            None
        }
    }

    /// Nearest-effort `f64` conversion. The operands are prescaled so the
    /// quotient carries more bits than a double's mantissa before rounding.
    pub fn to_f64(&self) -> f64 {
        let r = self.positive_den();
        let sign = r.sign();
        if sign == 0 {
            return 0.0;
        }
        if sign < 0 {
            return -r.negate().to_f64();
        }
        let appr_exp = r.num.bits() as i64 - r.den.bits() as i64;
        if appr_exp < -1100 {
            // Unrepresentably small even as a subnormal.
            return 0.0;
        }
        let needed_prec = appr_exp - 80;
        let dividend = if needed_prec < 0 {
            &r.num << (-needed_prec) as u64
        } else {
            r.num.clone()
        };
        let divisor = if needed_prec > 0 {
            &r.den << needed_prec as u64
        } else {
            r.den.clone()
        };
        let quotient = dividend / divisor;
        let q = quotient.to_f64().unwrap_or(f64::INFINITY);
        let scale = needed_prec.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        q * 2.0f64.powi(scale)
    }

    /// Number of decimal digits needed for an exact expansion, or `None`
    /// when the expansion never terminates (a reduced-denominator prime
    /// factor other than 2 or 5 remains).
    pub fn digits_required(&self) -> Option<u64> {
        if self.den.is_one() || self.den == -BigInt::one() {
            return Some(0);
        }
        let r = self.reduce();
        let mut den = r.den;
        let mut powers_of_two: u64 = 0;
        let mut powers_of_five: u64 = 0;
        while den.is_even() {
            powers_of_two += 1;
            den >>= 1;
        }
        let five = BigInt::from(5);
        while (&den % &five).is_zero() {
            powers_of_five += 1;
            den /= &five;
        }
        if den.is_one() {
            Some(powers_of_two.max(powers_of_five))
        } else {
            None
        }
    }
}

impl PartialEq for BoundedRational {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BoundedRational {}

impl PartialOrd for BoundedRational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BoundedRational {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.positive_den();
        let b = other.positive_den();
        (&a.num * &b.den).cmp(&(&b.num * &a.den))
    }
}

impl fmt::Display for BoundedRational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.reduce();
        if r.den.is_one() {
            write!(f, "{}", r.num)
        } else {
            write!(f, "{}/{}", r.num, r.den)
        }
    }
}

/// Absence-propagating combinators over optional operands.
///
/// `None` means "unrepresentable"; it may stand for an arbitrarily large or
/// otherwise unknown value, so none of these short-circuit. In particular
/// `0 * None` is `None`, not zero: the absent operand could represent an
/// unrepresentable infinity.
pub mod opt {
    use super::BoundedRational;
    use crate::error::CalcError;

    pub fn add(a: Option<BoundedRational>, b: Option<BoundedRational>) -> Option<BoundedRational> {
        a?.add(&b?)
    }

    pub fn subtract(
        a: Option<BoundedRational>,
        b: Option<BoundedRational>,
    ) -> Option<BoundedRational> {
        a?.subtract(&b?)
    }

    pub fn multiply(
        a: Option<BoundedRational>,
        b: Option<BoundedRational>,
    ) -> Option<BoundedRational> {
        a?.multiply(&b?)
    }

    pub fn negate(a: Option<BoundedRational>) -> Option<BoundedRational> {
        Some(a?.negate())
    }

    pub fn divide(
        a: Option<BoundedRational>,
        b: Option<BoundedRational>,
    ) -> Result<Option<BoundedRational>, CalcError> {
        match (a, b) {
            (Some(num), Some(den)) => num.divide(&den),
            _ => Ok(None),
        }
    }

    pub fn pow(
        base: Option<BoundedRational>,
        exp: Option<BoundedRational>,
    ) -> Result<Option<BoundedRational>, CalcError> {
        match (base, exp) {
            (Some(b), Some(e)) => b.pow(&e),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::panic)]

    use super::*;
    use num_rational::BigRational;

    fn rat(num: i64, den: i64) -> BoundedRational {
        BoundedRational::from_ratio(num, den).expect("nonzero denominator")
    }

    fn reference(r: &BoundedRational) -> BigRational {
        BigRational::new(r.numerator().clone(), r.denominator().clone())
    }

    #[test]
    fn arithmetic_matches_reference_rationals() {
        let pairs = [
            (rat(1, 3), rat(1, 6)),
            (rat(-7, 4), rat(22, 7)),
            (rat(0, 5), rat(-3, 11)),
            (rat(123456789, 987654321), rat(-1, 999983)),
        ];
        for (a, b) in &pairs {
            let sum = a.add(b).expect("within cap");
            assert_eq!(reference(&sum), reference(a) + reference(b));

            let diff = a.subtract(b).expect("within cap");
            assert_eq!(reference(&diff), reference(a) - reference(b));

            let product = a.multiply(b).expect("within cap");
            assert_eq!(reference(&product), reference(a) * reference(b));

            if b.sign() != 0 {
                let quotient = a.divide(b).expect("nonzero divisor").expect("within cap");
                assert_eq!(reference(&quotient), reference(a) / reference(b));
            }
        }
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(
            rat(1, 2).divide(&BoundedRational::zero()),
            Err(CalcError::DivisionByZero)
        );
        assert_eq!(
            BoundedRational::zero().inverse(),
            Err(CalcError::DivisionByZero)
        );
    }

    #[test]
    fn absence_propagates_without_zero_short_circuit() {
        assert_eq!(opt::multiply(Some(BoundedRational::zero()), None), None);
        assert_eq!(opt::add(None, Some(rat(1, 2))), None);
        assert_eq!(opt::negate(None), None);
    }

    #[test]
    fn oversized_results_become_absent() {
        // 3^k / 2^k pairs stay coprime, so repeated squaring must blow past
        // the size cap and turn into None rather than growing further.
        let mut value = Some(rat(3, 2));
        for _ in 0..16 {
            value = opt::multiply(value.clone(), value);
        }
        assert_eq!(value, None);
    }

    #[test]
    fn pow_int_matches_reference() {
        let base = rat(3, 7);
        let result = base
            .pow_int(&BigInt::from(11))
            .expect("no cancellation")
            .expect("within cap");
        let expected = reference(&base).pow(11);
        assert_eq!(reference(&result), expected);

        let negative = base
            .pow_int(&BigInt::from(-3))
            .expect("no cancellation")
            .expect("within cap");
        assert_eq!(reference(&negative), reference(&base).pow(-3));
    }

    #[test]
    fn pow_refuses_huge_exponents() {
        let exp = BigInt::one() << 1001u32;
        assert_eq!(rat(3, 2).pow_int(&exp), Ok(None));
    }

    #[test]
    fn rational_exponent_requires_unit_denominator() {
        assert_eq!(
            rat(2, 1).pow(&rat(4, 2)).expect("no cancellation"),
            Some(rat(4, 1))
        );
        assert_eq!(rat(2, 1).pow(&rat(1, 2)).expect("no cancellation"), None);
    }

    #[test]
    fn sqrt_of_perfect_squares() {
        assert_eq!(rat(9, 4).sqrt(), Ok(Some(rat(3, 2))));
        assert_eq!(rat(2, 1).sqrt(), Ok(None));
        assert_eq!(
            rat(-1, 1).sqrt(),
            Err(CalcError::Domain("square root of a negative value"))
        );
    }

    #[test]
    fn digits_required_factors_den() {
        assert_eq!(rat(5, 1).digits_required(), Some(0));
        assert_eq!(rat(1, 8).digits_required(), Some(3));
        assert_eq!(rat(1, 200).digits_required(), Some(3));
        assert_eq!(rat(7, 50).digits_required(), Some(2));
        assert_eq!(rat(1, 3).digits_required(), None);
    }

    #[test]
    fn ordering_uses_cross_multiplication() {
        assert!(rat(1, 3) < rat(1, 2));
        assert!(rat(-1, 2) < rat(-1, 3));
        assert_eq!(rat(2, 4), rat(1, 2));
        // Sign carried by the denominator.
        assert_eq!(
            BoundedRational::new(BigInt::from(1), BigInt::from(-2)).expect("nonzero"),
            rat(-1, 2)
        );
    }

    #[test]
    fn integer_and_float_round_trips() {
        assert_eq!(rat(6, 3).to_big_int(), Some(BigInt::from(2)));
        assert_eq!(rat(1, 3).to_big_int(), None);
        assert!((rat(1, 3).to_f64() - 1.0 / 3.0).abs() < 1e-15);
        let from_double = BoundedRational::from_f64(0.375).expect("finite");
        assert_eq!(from_double, rat(3, 8));
        assert_eq!(BoundedRational::from_f64(f64::INFINITY), None);
    }

    #[test]
    fn display_reduces_first() {
        assert_eq!(rat(4, 8).to_string(), "1/2");
        assert_eq!(rat(-6, 3).to_string(), "-2");
        assert_eq!(
            BoundedRational::new(BigInt::from(3), BigInt::from(-9))
                .expect("nonzero")
                .to_string(),
            "-1/3"
        );
    }
}
