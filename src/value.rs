//! The evaluator's number type: an exact rational paired with a lazy real.
//!
//! Arithmetic stays in the exact domain as long as every operand is exactly
//! representable; a "too big" rational outcome or an irrational operation
//! drops the value into the lazy constructive-real domain. The lazy side is
//! always populated, so rendering and comparison never need to care which
//! domain a value came from.

use std::fmt;

use num_bigint::BigInt;
use num_traits::{One, Signed};

use crate::concurrency::check_stop;
use crate::error::CalcError;
use crate::rational::{self, BoundedRational};
use crate::real::{CReal, ScientificNotation};

#[derive(Clone)]
pub struct UnifiedValue {
    cr: CReal,
    /// Present exactly when the value is exactly representable within the
    /// rational size cap.
    exact: Option<BoundedRational>,
}

impl UnifiedValue {
    pub fn from_rational(r: BoundedRational) -> Self {
        Self {
            cr: CReal::from_rational(&r),
            exact: Some(r),
        }
    }

    pub fn from_cr(cr: CReal) -> Self {
        Self { cr, exact: None }
    }

    pub fn from_big_int(value: BigInt) -> Self {
        Self::from_rational(BoundedRational::from_big_int(value))
    }

    pub fn from_i64(value: i64) -> Self {
        Self::from_rational(BoundedRational::from_i64(value))
    }

    pub fn zero() -> Self {
        Self::from_rational(BoundedRational::zero())
    }

    pub fn one() -> Self {
        Self::from_rational(BoundedRational::one())
    }

    pub fn pi() -> Self {
        Self::from_cr(CReal::pi())
    }

    /// Euler's number. Fallible because building `exp(1)` samples a rough
    /// approximation for range reduction, which observes cancellation.
    pub fn e() -> Result<Self, CalcError> {
        Ok(Self::from_cr(CReal::from(1).exp()?))
    }

    pub fn cr(&self) -> &CReal {
        &self.cr
    }

    pub fn exact(&self) -> Option<&BoundedRational> {
        self.exact.as_ref()
    }

    pub fn is_exact(&self) -> bool {
        self.exact.is_some()
    }

    /// Wraps a rational outcome, falling back to the lazy value when the
    /// rational side came out absent.
    fn with_fallback(exact: Option<BoundedRational>, lazy: impl FnOnce() -> CReal) -> Self {
        match exact {
            Some(r) => Self::from_rational(r),
            None => Self::from_cr(lazy()),
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        Self::with_fallback(
            rational::opt::add(self.exact.clone(), other.exact.clone()),
            || self.cr.clone() + other.cr.clone(),
        )
    }

    pub fn subtract(&self, other: &Self) -> Self {
        Self::with_fallback(
            rational::opt::subtract(self.exact.clone(), other.exact.clone()),
            || self.cr.clone() - other.cr.clone(),
        )
    }

    pub fn multiply(&self, other: &Self) -> Self {
        Self::with_fallback(
            rational::opt::multiply(self.exact.clone(), other.exact.clone()),
            || self.cr.clone() * other.cr.clone(),
        )
    }

    pub fn negate(&self) -> Self {
        Self::with_fallback(rational::opt::negate(self.exact.clone()), || {
            -self.cr.clone()
        })
    }

    /// Division by an exact zero fails eagerly; division by a lazy zero
    /// surfaces later as a precision overflow.
    pub fn divide(&self, other: &Self) -> Result<Self, CalcError> {
        if other.exact.as_ref().is_some_and(|r| r.sign() == 0) {
            return Err(CalcError::DivisionByZero);
        }
        Ok(Self::with_fallback(
            rational::opt::divide(self.exact.clone(), other.exact.clone())?,
            || self.cr.clone() / other.cr.clone(),
        ))
    }

    pub fn inverse(&self) -> Result<Self, CalcError> {
        Self::one().divide(self)
    }

    /// Exponentiation. Exact operands with an integral exponent stay
    /// rational; any integral exponent is handled by repeated squaring on
    /// the lazy side, so a negative base (lazy or exact) is fine. Only a
    /// genuinely non-integer exponent goes through `exp(y ln x)`, which
    /// rejects a provably negative base eagerly.
    pub fn pow(&self, exp: &Self) -> Result<Self, CalcError> {
        if let (Some(base), Some(e)) = (&self.exact, &exp.exact) {
            if base.sign() == 0 && e.sign() <= 0 {
                return Err(CalcError::Domain("zero raised to a non-positive power"));
            }
            if let Some(result) = base.pow(e)? {
                return Ok(Self::from_rational(result));
            }
        }
        if let Some(int_exp) = exp.exact.as_ref().and_then(BoundedRational::to_big_int) {
            return Ok(Self::from_cr(pow_cr_int(&self.cr, &int_exp)?));
        }
        if self.exact.as_ref().is_some_and(|r| r.sign() < 0) {
            return Err(CalcError::Domain("negative base with a non-integer power"));
        }
        let ln = self.cr.ln()?;
        Ok(Self::from_cr((ln * exp.cr.clone()).exp()?))
    }

    /// Square root: exact when numerator and denominator are perfect
    /// squares after reduction, lazy otherwise. The lazy node sits behind a
    /// coarse-caching proxy since everything built on top of it is
    /// expensive to recompute.
    pub fn sqrt(&self) -> Result<Self, CalcError> {
        if let Some(r) = &self.exact {
            if r.sign() < 0 {
                return Err(CalcError::Domain("square root of a negative value"));
            }
            if let Some(root) = r.sqrt()? {
                return Ok(Self::from_rational(root));
            }
        }
        Ok(Self::from_cr(self.cr.sqrt().coarse_cached()))
    }

    /// Factorial; defined only for exact non-negative integers.
    pub fn fact(&self) -> Result<Self, CalcError> {
        let arg = self
            .exact
            .as_ref()
            .and_then(BoundedRational::to_big_int)
            .ok_or(CalcError::Domain("factorial of a non-integer"))?;
        if arg.is_negative() {
            return Err(CalcError::Domain("factorial of a negative value"));
        }
        let mut result = BigInt::one();
        let mut i = BigInt::from(2);
        while i <= arg {
            check_stop()?;
            result *= &i;
            i += 1;
        }
        Ok(Self {
            cr: CReal::from(result.clone()),
            // May exceed the rational size cap, in which case only the lazy
            // side survives.
            exact: BoundedRational::new(result, BigInt::one()),
        })
    }

    /// `self / 100`, the plain reading of a percent suffix.
    pub fn percent(&self) -> Self {
        match BoundedRational::from_ratio(1, 100) {
            Some(hundredth) => self.multiply(&Self::from_rational(hundredth)),
            None => Self::from_cr(self.cr.clone() / CReal::from(100)),
        }
    }

    pub fn exp(&self) -> Result<Self, CalcError> {
        if self.exact.as_ref().is_some_and(|r| r.sign() == 0) {
            return Ok(Self::one());
        }
        Ok(Self::from_cr(self.cr.exp()?))
    }

    pub fn ln(&self) -> Result<Self, CalcError> {
        if let Some(r) = &self.exact {
            if r.sign() <= 0 {
                return Err(CalcError::Domain("logarithm of a non-positive value"));
            }
            if r == &BoundedRational::one() {
                return Ok(Self::zero());
            }
        }
        Ok(Self::from_cr(self.cr.ln()?))
    }

    pub fn sin(&self) -> Result<Self, CalcError> {
        if self.exact.as_ref().is_some_and(|r| r.sign() == 0) {
            return Ok(Self::zero());
        }
        Ok(Self::from_cr(self.cr.sin()?))
    }

    pub fn cos(&self) -> Result<Self, CalcError> {
        if self.exact.as_ref().is_some_and(|r| r.sign() == 0) {
            return Ok(Self::one());
        }
        Ok(Self::from_cr(self.cr.cos()?))
    }

    pub fn tan(&self) -> Result<Self, CalcError> {
        if self.exact.as_ref().is_some_and(|r| r.sign() == 0) {
            return Ok(Self::zero());
        }
        Ok(Self::from_cr(self.cr.tan()?))
    }

    pub fn asin(&self) -> Result<Self, CalcError> {
        if self.exact.as_ref().is_some_and(|r| r.sign() == 0) {
            return Ok(Self::zero());
        }
        Ok(Self::from_cr(self.cr.asin()?))
    }

    pub fn acos(&self) -> Result<Self, CalcError> {
        Ok(Self::from_cr(self.cr.acos()?))
    }

    pub fn atan(&self) -> Result<Self, CalcError> {
        if self.exact.as_ref().is_some_and(|r| r.sign() == 0) {
            return Ok(Self::zero());
        }
        Ok(Self::from_cr(self.cr.atan()?))
    }

    pub fn to_digits(&self, n: u32, radix: u32) -> Result<String, CalcError> {
        self.cr.to_digits(n, radix)
    }

    pub fn to_scientific(
        &self,
        digit_count: u32,
        radix: u32,
        msd_prec: i32,
    ) -> Result<ScientificNotation, CalcError> {
        self.cr.to_scientific(digit_count, radix, msd_prec)
    }

    /// Decimal digits needed for an exact expansion; `None` for inexact or
    /// non-terminating values.
    pub fn exact_decimal_digits(&self) -> Option<u64> {
        self.exact.as_ref()?.digits_required()
    }

    pub fn compare_tol(&self, other: &Self, rel_tol: i32, abs_tol: i32) -> Result<i32, CalcError> {
        if let (Some(a), Some(b)) = (&self.exact, &other.exact) {
            return Ok(match a.cmp(b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            });
        }
        self.cr.compare_tol(&other.cr, rel_tol, abs_tol)
    }
}

impl fmt::Display for UnifiedValue {
    /// Exact values render as reduced fractions, lazy ones as decimals.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exact {
            Some(r) => write!(f, "{r}"),
            None => write!(f, "{}", self.cr),
        }
    }
}

/// `base^exp` for an integer exponent on the lazy side, by squaring. Used
/// when the exact result exists but exceeds the rational size cap.
fn pow_cr_int(base: &CReal, exp: &BigInt) -> Result<CReal, CalcError> {
    if exp.is_negative() {
        return Ok(pow_cr_int(base, &-exp)?.inverse());
    }
    let mut result = CReal::from(1);
    let mut square = base.clone();
    let bits = exp.magnitude().bits();
    for bit in 0..bits {
        check_stop()?;
        if exp.magnitude().bit(bit) {
            result = result * square.clone();
        }
        if bit + 1 < bits {
            square = square.clone() * square;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::rational::BoundedRational;

    fn rat(num: i64, den: i64) -> UnifiedValue {
        UnifiedValue::from_rational(
            BoundedRational::from_ratio(num, den).expect("nonzero denominator"),
        )
    }

    #[test]
    fn arithmetic_stays_exact() {
        let v = rat(1, 3).add(&rat(1, 6)).multiply(&rat(2, 1));
        assert_eq!(
            v.exact().expect("exact"),
            &BoundedRational::from_ratio(1, 1).expect("rational")
        );
    }

    #[test]
    fn sqrt_of_a_perfect_square_is_exact() {
        let v = rat(9, 4).sqrt().expect("sqrt");
        assert_eq!(
            v.exact().expect("exact"),
            &BoundedRational::from_ratio(3, 2).expect("rational")
        );
    }

    #[test]
    fn sqrt_of_two_falls_to_the_lazy_side() {
        let v = rat(2, 1).sqrt().expect("sqrt");
        assert!(!v.is_exact());
        assert_eq!(
            v.to_digits(20, 10).expect("digits"),
            "1.41421356237309504880"
        );
    }

    #[test]
    fn division_by_exact_zero_fails_eagerly() {
        assert!(matches!(
            rat(1, 1).divide(&UnifiedValue::zero()),
            Err(CalcError::DivisionByZero)
        ));
        assert!(matches!(
            UnifiedValue::one().inverse().expect("inverse").exact(),
            Some(_)
        ));
    }

    #[test]
    fn pow_with_integer_exponent_is_exact() {
        let v = rat(2, 3).pow(&rat(3, 1)).expect("pow");
        assert_eq!(
            v.exact().expect("exact"),
            &BoundedRational::from_ratio(8, 27).expect("rational")
        );
    }

    #[test]
    fn pow_with_fractional_exponent_goes_lazy() {
        let v = rat(2, 1).pow(&rat(1, 2)).expect("pow");
        assert!(!v.is_exact());
        let sqrt2 = rat(2, 1).sqrt().expect("sqrt");
        assert_eq!(v.compare_tol(&sqrt2, -40, -40).expect("compare"), 0);
    }

    #[test]
    fn integer_pow_of_a_lazy_negative_base() {
        // sqrt(2) - 2 is negative and has no exact part; integer exponents
        // must still work through the squaring path.
        let base = rat(2, 1).sqrt().expect("sqrt").subtract(&rat(2, 1));
        assert!(!base.is_exact());
        // (sqrt(2) - 2)^2 = 6 - 4 sqrt(2)
        let squared = base.pow(&rat(2, 1)).expect("even power");
        let expected_sq = CReal::from(6) - CReal::from(2).sqrt().shift_left(2);
        assert_eq!(
            squared.cr().compare_abs(&expected_sq, -40).expect("compare"),
            0
        );
        // (sqrt(2) - 2)^3 = 14 sqrt(2) - 20, still negative.
        let cubed = base.pow(&rat(3, 1)).expect("odd power");
        let expected_cu = CReal::from(2).sqrt() * CReal::from(14) - CReal::from(20);
        assert_eq!(
            cubed.cr().compare_abs(&expected_cu, -40).expect("compare"),
            0
        );
        assert_eq!(cubed.cr().signum().expect("nonzero sign"), -1);
    }

    #[test]
    fn negative_base_with_fractional_exponent_is_rejected() {
        assert!(matches!(
            rat(-2, 1).pow(&rat(1, 2)),
            Err(CalcError::Domain(_))
        ));
    }

    #[test]
    fn factorial_of_small_integers() {
        let v = rat(6, 1).fact().expect("fact");
        assert_eq!(
            v.exact().expect("exact"),
            &BoundedRational::from_i64(720)
        );
        assert!(matches!(
            rat(5, 2).fact(),
            Err(CalcError::Domain(_))
        ));
    }

    #[test]
    fn percent_divides_by_one_hundred() {
        let v = rat(10, 1).percent();
        assert_eq!(
            v.exact().expect("exact"),
            &BoundedRational::from_ratio(1, 10).expect("rational")
        );
    }

    #[test]
    fn exact_special_cases_of_transcendentals() {
        assert!(UnifiedValue::zero().sin().expect("sin").is_exact());
        assert!(UnifiedValue::zero().cos().expect("cos").is_exact());
        assert!(UnifiedValue::zero().exp().expect("exp").is_exact());
        assert!(UnifiedValue::one().ln().expect("ln").is_exact());
        assert!(!UnifiedValue::one().sin().expect("sin").is_exact());
    }

    #[test]
    fn display_prefers_the_exact_form() {
        assert_eq!(format!("{}", rat(2, 4)), "1/2");
    }
}
