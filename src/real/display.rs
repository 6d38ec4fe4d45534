//! String rendering of constructive reals.
//!
//! Fixed-point rendering scales the value by `radix^n`, takes an
//! approximation at precision 0, and re-inserts the point; scientific
//! rendering first locates the leading digit so the mantissa carries a fixed
//! number of significant digits.

use std::fmt;

use num_bigint::BigInt;
use num_traits::{Pow, Signed, Zero};

use crate::error::CalcError;
use crate::real::{check_prec, to_prec, CReal};

/// Floating-point style rendering: the value is
/// `sign * 0.digits * radix^exponent`, with the point immediately before
/// `digits`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScientificNotation {
    pub sign: i32,
    pub digits: String,
    pub radix: u32,
    pub exponent: i32,
}

impl fmt::Display for ScientificNotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sign < 0 {
            f.write_str("-")?;
        }
        write!(f, "0.{}E{}", self.digits, self.exponent)?;
        if self.radix != 10 {
            write!(f, "(radix {})", self.radix)?;
        }
        Ok(())
    }
}

impl CReal {
    /// Renders the value with `n` digits after the point in the given radix
    /// (2 to 16). The result is accurate to strictly less than one unit in
    /// the last rendered digit.
    pub fn to_digits(&self, n: u32, radix: u32) -> Result<String, CalcError> {
        debug_assert!((2..=16).contains(&radix));
        let scaled = if radix == 16 {
            self.shift_left(to_prec(4 * n as i64)?)
        } else {
            let scale_factor = Pow::pow(&BigInt::from(radix), n);
            self.clone() * Self::from(scale_factor)
        };
        let scaled_int = scaled.approx_get(0)?;
        let mut digits = scaled_int.magnitude().to_str_radix(radix);
        let mut result = String::new();
        if scaled_int.is_negative() {
            result.push('-');
        }
        if n == 0 {
            result.push_str(&digits);
            return Ok(result);
        }
        if digits.len() <= n as usize {
            // Not enough digits to reach the point; pad with leading zeros
            // so there is at least one digit before it.
            let padding = "0".repeat(n as usize + 1 - digits.len());
            digits.insert_str(0, &padding);
        }
        let point = digits.len() - n as usize;
        result.push_str(&digits[..point]);
        result.push('.');
        result.push_str(&digits[point..]);
        Ok(result)
    }

    /// Scientific-notation rendering with `digit_count` significant digits
    /// in the given radix. `msd_prec` bounds the search for the leading
    /// digit, in digits of the same radix: a value whose magnitude is below
    /// `radix^msd_prec` renders as zero.
    pub fn to_scientific(
        &self,
        digit_count: u32,
        radix: u32,
        msd_prec: i32,
    ) -> Result<ScientificNotation, CalcError> {
        debug_assert!((2..=16).contains(&radix));
        debug_assert!(digit_count > 0);
        let log2_radix = f64::from(radix).log2();
        let msd_bit_prec = (log2_radix * f64::from(msd_prec)) as i64;
        let search_limit = to_prec(msd_bit_prec)?;
        check_prec(search_limit)?;
        let msd = match self.iter_msd(search_limit.saturating_sub(2))? {
            Some(m) => m,
            None => {
                return Ok(ScientificNotation {
                    sign: 0,
                    digits: "0".to_owned(),
                    radix,
                    exponent: 0,
                })
            }
        };
        let big_radix = BigInt::from(radix);
        let mut exponent = (f64::from(msd) / log2_radix).ceil() as i32;
        let scale_exp = exponent as i64 - digit_count as i64;
        let scale_pow = u32::try_from(scale_exp.abs()).map_err(|_| CalcError::PrecisionOverflow)?;
        let scaled = if scale_exp > 0 {
            self.clone() / Self::from(Pow::pow(&big_radix, scale_pow))
        } else {
            self.clone() * Self::from(Pow::pow(&big_radix, scale_pow))
        };
        let mut scaled_res = scaled;
        let mut scaled_int = scaled_res.approx_get(0)?;
        let mut digits = scaled_int.magnitude().to_str_radix(radix);
        while digits.len() < digit_count as usize {
            // The estimated exponent was too large; shift one digit at a
            // time until the mantissa is full.
            scaled_res = scaled_res * Self::from(big_radix.clone());
            exponent -= 1;
            scaled_int = scaled_res.approx_get(0)?;
            digits = scaled_int.magnitude().to_str_radix(radix);
        }
        if digits.len() > digit_count as usize {
            exponent += (digits.len() - digit_count as usize) as i32;
            digits.truncate(digit_count as usize);
        }
        let sign = if scaled_int.is_zero() {
            0
        } else if scaled_int.is_negative() {
            -1
        } else {
            1
        };
        Ok(ScientificNotation {
            sign,
            digits,
            radix,
            exponent,
        })
    }
}

impl fmt::Display for CReal {
    /// Ten decimal digits after the point. Rendering demands an
    /// approximation, which can be cancelled or overflow; those cases render
    /// as a placeholder since `Display` cannot carry an error.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_digits(10, 10) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<unevaluated>"),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::panic)]

    use crate::real::CReal;
    use crate::test_utils::cr_ratio;

    #[test]
    fn one_third_to_five_digits() {
        let rendered = cr_ratio(1, 3).to_digits(5, 10).expect("render");
        assert_eq!(rendered, "0.33333");
    }

    #[test]
    fn negative_values_carry_a_sign() {
        let rendered = cr_ratio(-1, 4).to_digits(3, 10).expect("render");
        assert_eq!(rendered, "-0.250");
    }

    #[test]
    fn sqrt_two_to_twenty_digits() {
        let rendered = CReal::from(2).sqrt().to_digits(20, 10).expect("render");
        assert_eq!(rendered, "1.41421356237309504880");
    }

    #[test]
    fn zero_fraction_digits_rounds_to_an_integer() {
        let rendered = cr_ratio(10, 3).to_digits(0, 10).expect("render");
        assert_eq!(rendered, "3");
    }

    #[test]
    fn hexadecimal_rendering_uses_the_shift_path() {
        let rendered = cr_ratio(1, 16).to_digits(2, 16).expect("render");
        assert_eq!(rendered, "0.10");
    }

    #[test]
    fn display_shows_ten_decimal_digits() {
        assert_eq!(format!("{}", cr_ratio(1, 3)), "0.3333333333");
    }

    #[test]
    fn scientific_notation_of_a_large_value() {
        let sci = CReal::from(12_345)
            .to_scientific(4, 10, -20)
            .expect("render");
        assert_eq!(sci.sign, 1);
        assert_eq!(sci.digits, "1234");
        assert_eq!(sci.exponent, 5);
    }

    #[test]
    fn scientific_notation_of_a_small_value() {
        let sci = cr_ratio(1, 1000).to_scientific(3, 10, -20).expect("render");
        assert_eq!(sci.sign, 1);
        assert_eq!(sci.digits, "100");
        assert_eq!(sci.exponent, -2);
    }

    #[test]
    fn values_below_the_msd_bound_render_as_zero() {
        let tiny = cr_ratio(1, i64::MAX);
        let sci = tiny.to_scientific(3, 10, -5).expect("render");
        assert_eq!(sci.sign, 0);
        assert_eq!(sci.digits, "0");
    }

    #[test]
    fn scientific_display_format() {
        let sci = CReal::from(-250).to_scientific(2, 10, -10).expect("render");
        assert_eq!(format!("{sci}"), "-0.25E3");
    }
}
