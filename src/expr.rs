//! Token-list expressions and their recursive-descent evaluator.
//!
//! An expression is a flat list of tokens built incrementally as a formula
//! is entered: numeric literals (mutable until committed), operator and
//! function symbols, and references to previously evaluated expressions
//! resolved through an external [`ExprResolver`]. Evaluation walks the
//! grammar
//!
//! ```text
//! expr         -> term (('+' | '-') term)*
//! term         -> signed_factor (('*' | '/') signed_factor)*
//! signed_factor-> '-'? factor
//! factor       -> suffix ('^' signed_factor)?
//! suffix       -> unary ('!' | '^2' | '%')*
//! unary        -> literal | constant | '(' expr ')' | fn '(' expr ')' | ref
//! ```
//!
//! bottom-up into a [`UnifiedValue`]. Token-index overruns are how syntax
//! errors surface; they are mapped to [`CalcError::Syntax`] at the top.

use std::collections::HashSet;
use std::fmt;

use num_bigint::BigInt;
use num_traits::Pow;

use crate::error::CalcError;
use crate::rational::BoundedRational;
use crate::value::UnifiedValue;

/// Operator and function symbols, plus the two constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    Plus,
    Minus,
    Mul,
    Div,
    Pow,
    Fact,
    Square,
    Percent,
    LParen,
    RParen,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Ln,
    Exp,
    Pi,
    E,
}

impl OpKind {
    fn is_binary(self) -> bool {
        matches!(
            self,
            Self::Plus | Self::Minus | Self::Mul | Self::Div | Self::Pow
        )
    }

    fn function_name(self) -> Option<&'static str> {
        match self {
            Self::Sqrt => Some("sqrt"),
            Self::Sin => Some("sin"),
            Self::Cos => Some("cos"),
            Self::Tan => Some("tan"),
            Self::Asin => Some("asin"),
            Self::Acos => Some("acos"),
            Self::Atan => Some("atan"),
            Self::Ln => Some("ln"),
            Self::Exp => Some("exp"),
            _ => None,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.function_name() {
            return f.write_str(name);
        }
        let symbol = match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
            Self::Fact => "!",
            Self::Square => "\u{b2}",
            Self::Percent => "%",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::Pi => "\u{3c0}",
            Self::E => "e",
            _ => "",
        };
        f.write_str(symbol)
    }
}

/// A numeric constant under construction: decimal digits before and after
/// the point plus an optional power-of-ten exponent, each entered (and
/// undone) one character at a time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Literal {
    whole: String,
    fraction: String,
    saw_point: bool,
    exponent: Option<i32>,
}

impl Literal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_digit(&mut self, digit: u32) {
        debug_assert!(digit < 10);
        let c = char::from_digit(digit, 10).unwrap_or('0');
        if self.saw_point {
            self.fraction.push(c);
        } else {
            self.whole.push(c);
        }
    }

    /// Adds the decimal point; refused if one is already present.
    pub fn push_point(&mut self) -> bool {
        if self.saw_point || self.exponent.is_some() {
            return false;
        }
        self.saw_point = true;
        true
    }

    pub fn set_exponent(&mut self, exponent: i32) {
        self.exponent = Some(exponent);
    }

    /// Undoes the most recently entered character. Returns false when the
    /// literal is already empty.
    pub fn pop(&mut self) -> bool {
        if self.exponent.take().is_some() {
            return true;
        }
        if self.fraction.pop().is_some() {
            return true;
        }
        if self.saw_point {
            self.saw_point = false;
            return true;
        }
        self.whole.pop().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.whole.is_empty() && self.fraction.is_empty() && !self.saw_point
    }

    /// The committed value. `None` only for a literal with no digits or one
    /// whose scale exceeds the rational size cap.
    pub fn to_rational(&self) -> Option<BoundedRational> {
        if self.whole.is_empty() && self.fraction.is_empty() {
            return None;
        }
        let mut digits = String::with_capacity(self.whole.len() + self.fraction.len());
        digits.push_str(&self.whole);
        digits.push_str(&self.fraction);
        let mut num = digits.parse::<BigInt>().ok()?;
        let mut den = Pow::pow(&BigInt::from(10), self.fraction.len());
        match self.exponent.unwrap_or(0) {
            e if e > 0 => num *= Pow::pow(&BigInt::from(10), e.unsigned_abs() as usize),
            e if e < 0 => den *= Pow::pow(&BigInt::from(10), e.unsigned_abs() as usize),
            _ => {}
        }
        BoundedRational::new(num, den)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.whole.is_empty() { "0" } else { &self.whole })?;
        if self.saw_point {
            write!(f, ".{}", self.fraction)?;
        }
        if let Some(e) = self.exponent {
            write!(f, "E{e}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Literal(Literal),
    Op(OpKind),
    /// Reference to a previously evaluated expression, resolved through the
    /// [`ExprResolver`]; carries a short display form of the referenced
    /// result.
    Ref { index: usize, short_repr: String },
}

impl Token {
    fn is_operand(&self) -> bool {
        matches!(self, Self::Literal(_) | Self::Ref { .. })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(literal) => write!(f, "{literal}"),
            Self::Op(op) => write!(f, "{op}"),
            Self::Ref { short_repr, .. } => f.write_str(short_repr),
        }
    }
}

/// Store of other expressions that the current one may reference.
pub trait ExprResolver {
    fn expression(&self, index: usize) -> CalculatorExpr;
    fn result(&self, index: usize) -> Option<UnifiedValue>;
    /// Stores `value` for `index` unless a result is already present;
    /// returns the stored value either way.
    fn put_result_if_absent(&self, index: usize, value: UnifiedValue) -> UnifiedValue;
    fn degree_mode(&self, index: usize) -> bool;
}

#[derive(Clone, Default)]
pub struct CalculatorExpr {
    tokens: Vec<Token>,
}

/// Per-evaluation context: angle mode plus the resolver for references.
struct EvalContext<'a> {
    degree_mode: bool,
    resolver: &'a dyn ExprResolver,
}

impl CalculatorExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Appends a token, inserting an explicit multiplication between
    /// adjacent operands so literals are never juxtaposed.
    pub fn push(&mut self, token: Token) {
        if token.is_operand() && self.tokens.last().is_some_and(Token::is_operand) {
            self.tokens.push(Token::Op(OpKind::Mul));
        }
        self.tokens.push(token);
    }

    pub fn pop(&mut self) -> Option<Token> {
        self.tokens.pop()
    }

    /// Number of leading tokens to evaluate: a trailing run of binary
    /// operators is an incomplete tail while the user is still typing, so
    /// the valid prefix is evaluated instead.
    fn eval_limit(&self) -> usize {
        let mut limit = self.tokens.len();
        while limit > 0 {
            match &self.tokens[limit - 1] {
                Token::Op(op) if op.is_binary() => limit -= 1,
                _ => break,
            }
        }
        limit
    }

    /// Evaluates the expression to a unified value. All transitively
    /// referenced expressions lacking a cached result are evaluated first,
    /// deepest-referenced last, so the main walk finds every reference
    /// already resolved.
    pub fn evaluate(
        &self,
        degree_mode: bool,
        resolver: &dyn ExprResolver,
    ) -> Result<UnifiedValue, CalcError> {
        self.pre_evaluate_refs(resolver)?;
        let ctx = EvalContext {
            degree_mode,
            resolver,
        };
        let limit = self.eval_limit();
        let (value, pos) = self.eval_expr(0, limit, &ctx)?;
        if pos != limit {
            return Err(CalcError::Syntax);
        }
        Ok(value)
    }

    /// Collects transitive references missing a cached result, breadth
    /// first, and evaluates them in reverse order (a cheap approximation of
    /// dependency order). The visited set keeps a cyclic reference graph
    /// from looping the collection; evaluation itself still assumes the
    /// graph is acyclic.
    fn pre_evaluate_refs(&self, resolver: &dyn ExprResolver) -> Result<(), CalcError> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut order: Vec<usize> = Vec::new();
        let mut frontier = self.referenced_indices();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for index in frontier {
                if !visited.insert(index) {
                    continue;
                }
                if resolver.result(index).is_some() {
                    continue;
                }
                order.push(index);
                next.extend(resolver.expression(index).referenced_indices());
            }
            frontier = next;
        }
        for index in order.into_iter().rev() {
            if resolver.result(index).is_some() {
                continue;
            }
            let expr = resolver.expression(index);
            let value = expr.evaluate(resolver.degree_mode(index), resolver)?;
            resolver.put_result_if_absent(index, value);
        }
        Ok(())
    }

    fn referenced_indices(&self) -> Vec<usize> {
        self.tokens
            .iter()
            .filter_map(|t| match t {
                Token::Ref { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    fn token(&self, pos: usize, limit: usize) -> Result<&Token, CalcError> {
        if pos >= limit {
            return Err(CalcError::Syntax);
        }
        Ok(&self.tokens[pos])
    }

    fn op_at(&self, pos: usize, limit: usize, op: OpKind) -> bool {
        pos < limit && self.tokens[pos] == Token::Op(op)
    }

    // -----------------------------------------------------------------------
    // Grammar productions. Each returns (value, next position).
    // -----------------------------------------------------------------------

    fn eval_expr(
        &self,
        pos: usize,
        limit: usize,
        ctx: &EvalContext<'_>,
    ) -> Result<(UnifiedValue, usize), CalcError> {
        let (mut total, mut pos) = self.eval_term(pos, limit, ctx)?;
        loop {
            let is_plus = if self.op_at(pos, limit, OpKind::Plus) {
                true
            } else if self.op_at(pos, limit, OpKind::Minus) {
                false
            } else {
                return Ok((total, pos));
            };
            if let Some(percent) = self.percent_of_total(pos + 1, limit, ctx)? {
                // N% right after +/- scales the running total by 1 +/- N/100.
                let hundredth = percent.percent();
                let factor = if is_plus {
                    UnifiedValue::one().add(&hundredth)
                } else {
                    UnifiedValue::one().subtract(&hundredth)
                };
                total = total.multiply(&factor);
                pos += 3;
            } else {
                let (term, next) = self.eval_term(pos + 1, limit, ctx)?;
                total = if is_plus {
                    total.add(&term)
                } else {
                    total.subtract(&term)
                };
                pos = next;
            }
        }
    }

    /// Recognizes the percent-of-running-total form: exactly one operand
    /// token, then `%`, then `+`, `-`, `)` or the end. Returns the operand's
    /// value when the shape matches.
    fn percent_of_total(
        &self,
        pos: usize,
        limit: usize,
        ctx: &EvalContext<'_>,
    ) -> Result<Option<UnifiedValue>, CalcError> {
        if pos + 1 >= limit || !self.op_at(pos + 1, limit, OpKind::Percent) {
            return Ok(None);
        }
        let followed_ok = pos + 2 == limit
            || matches!(
                self.tokens[pos + 2],
                Token::Op(OpKind::Plus) | Token::Op(OpKind::Minus) | Token::Op(OpKind::RParen)
            );
        if !followed_ok {
            return Ok(None);
        }
        match self.token(pos, limit)? {
            Token::Literal(literal) => {
                let r = literal.to_rational().ok_or(CalcError::Syntax)?;
                Ok(Some(UnifiedValue::from_rational(r)))
            }
            Token::Ref { index, .. } => Ok(Some(self.resolve_ref(*index, ctx)?)),
            Token::Op(_) => Ok(None),
        }
    }

    fn eval_term(
        &self,
        pos: usize,
        limit: usize,
        ctx: &EvalContext<'_>,
    ) -> Result<(UnifiedValue, usize), CalcError> {
        let (mut value, mut pos) = self.eval_signed_factor(pos, limit, ctx)?;
        loop {
            if self.op_at(pos, limit, OpKind::Mul) {
                let (rhs, next) = self.eval_signed_factor(pos + 1, limit, ctx)?;
                value = value.multiply(&rhs);
                pos = next;
            } else if self.op_at(pos, limit, OpKind::Div) {
                let (rhs, next) = self.eval_signed_factor(pos + 1, limit, ctx)?;
                value = value.divide(&rhs)?;
                pos = next;
            } else {
                return Ok((value, pos));
            }
        }
    }

    fn eval_signed_factor(
        &self,
        pos: usize,
        limit: usize,
        ctx: &EvalContext<'_>,
    ) -> Result<(UnifiedValue, usize), CalcError> {
        if self.op_at(pos, limit, OpKind::Minus) {
            let (value, next) = self.eval_factor(pos + 1, limit, ctx)?;
            Ok((value.negate(), next))
        } else {
            self.eval_factor(pos, limit, ctx)
        }
    }

    /// Exponentiation binds tighter than unary minus on its left and is
    /// right associative: `-2^2 = -4` and `2^3^2 = 2^9`.
    fn eval_factor(
        &self,
        pos: usize,
        limit: usize,
        ctx: &EvalContext<'_>,
    ) -> Result<(UnifiedValue, usize), CalcError> {
        let (base, pos) = self.eval_suffix(pos, limit, ctx)?;
        if self.op_at(pos, limit, OpKind::Pow) {
            let (exp, next) = self.eval_signed_factor(pos + 1, limit, ctx)?;
            Ok((base.pow(&exp)?, next))
        } else {
            Ok((base, pos))
        }
    }

    fn eval_suffix(
        &self,
        pos: usize,
        limit: usize,
        ctx: &EvalContext<'_>,
    ) -> Result<(UnifiedValue, usize), CalcError> {
        let (mut value, mut pos) = self.eval_unary(pos, limit, ctx)?;
        loop {
            if self.op_at(pos, limit, OpKind::Fact) {
                value = value.fact()?;
            } else if self.op_at(pos, limit, OpKind::Square) {
                value = value.multiply(&value);
            } else if self.op_at(pos, limit, OpKind::Percent) {
                value = value.percent();
            } else {
                return Ok((value, pos));
            }
            pos += 1;
        }
    }

    fn eval_unary(
        &self,
        pos: usize,
        limit: usize,
        ctx: &EvalContext<'_>,
    ) -> Result<(UnifiedValue, usize), CalcError> {
        match self.token(pos, limit)? {
            Token::Literal(literal) => {
                let r = literal.to_rational().ok_or(CalcError::Syntax)?;
                Ok((UnifiedValue::from_rational(r), pos + 1))
            }
            Token::Ref { index, .. } => Ok((self.resolve_ref(*index, ctx)?, pos + 1)),
            Token::Op(OpKind::Pi) => Ok((UnifiedValue::pi(), pos + 1)),
            Token::Op(OpKind::E) => Ok((UnifiedValue::e()?, pos + 1)),
            Token::Op(OpKind::LParen) => {
                let (value, next) = self.eval_expr(pos + 1, limit, ctx)?;
                self.expect(next, limit, OpKind::RParen)?;
                Ok((value, next + 1))
            }
            Token::Op(op) => {
                if op.function_name().is_none() {
                    return Err(CalcError::Syntax);
                }
                self.expect(pos + 1, limit, OpKind::LParen)?;
                let (arg, next) = self.eval_expr(pos + 2, limit, ctx)?;
                self.expect(next, limit, OpKind::RParen)?;
                Ok((apply_function(*op, &arg, ctx.degree_mode)?, next + 1))
            }
        }
    }

    fn expect(&self, pos: usize, limit: usize, op: OpKind) -> Result<(), CalcError> {
        if self.op_at(pos, limit, op) {
            Ok(())
        } else {
            Err(CalcError::Syntax)
        }
    }

    fn resolve_ref(&self, index: usize, ctx: &EvalContext<'_>) -> Result<UnifiedValue, CalcError> {
        if let Some(value) = ctx.resolver.result(index) {
            return Ok(value);
        }
        // Normally filled in by the pre-evaluation pass; evaluate inline as
        // a fallback.
        let expr = ctx.resolver.expression(index);
        let value = expr.evaluate(ctx.resolver.degree_mode(index), ctx.resolver)?;
        Ok(ctx.resolver.put_result_if_absent(index, value))
    }
}

impl fmt::Display for CalculatorExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

/// Applies a function token, converting trig arguments from degrees inward
/// and inverse-trig results back to degrees outward when degree mode is on.
fn apply_function(
    op: OpKind,
    arg: &UnifiedValue,
    degree_mode: bool,
) -> Result<UnifiedValue, CalcError> {
    let to_radians = |v: &UnifiedValue| -> UnifiedValue {
        if degree_mode {
            v.multiply(&UnifiedValue::pi()).multiply(&degree_factor())
        } else {
            v.clone()
        }
    };
    let from_radians = |v: UnifiedValue| -> UnifiedValue {
        if degree_mode {
            v.divide(&UnifiedValue::pi())
                .unwrap_or(v)
                .multiply(&UnifiedValue::from_i64(180))
        } else {
            v
        }
    };
    match op {
        OpKind::Sqrt => arg.sqrt(),
        OpKind::Sin => to_radians(arg).sin(),
        OpKind::Cos => to_radians(arg).cos(),
        OpKind::Tan => to_radians(arg).tan(),
        OpKind::Asin => Ok(from_radians(arg.asin()?)),
        OpKind::Acos => Ok(from_radians(arg.acos()?)),
        OpKind::Atan => Ok(from_radians(arg.atan()?)),
        OpKind::Ln => arg.ln(),
        OpKind::Exp => arg.exp(),
        _ => Err(CalcError::Syntax),
    }
}

/// 1/180, the rational part of the degrees-to-radians factor.
fn degree_factor() -> UnifiedValue {
    match BoundedRational::from_ratio(1, 180) {
        Some(r) => UnifiedValue::from_rational(r),
        None => UnifiedValue::one(),
    }
}

/// Convenience constructors used by the owning application and the tests.
impl CalculatorExpr {
    /// Pushes a complete decimal literal.
    pub fn push_number(&mut self, text: &str) {
        let mut literal = Literal::new();
        for c in text.chars() {
            match c.to_digit(10) {
                Some(d) => literal.push_digit(d),
                None if c == '.' => {
                    literal.push_point();
                }
                None => {}
            }
        }
        self.push(Token::Literal(literal));
    }

    pub fn push_op(&mut self, op: OpKind) {
        self.push(Token::Op(op));
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::concurrency;
    use crate::real::CReal;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Resolver over fixed expressions with a memoized result store.
    #[derive(Default)]
    struct MapResolver {
        exprs: HashMap<usize, CalculatorExpr>,
        results: Mutex<HashMap<usize, UnifiedValue>>,
        degree_modes: HashMap<usize, bool>,
    }

    impl ExprResolver for MapResolver {
        fn expression(&self, index: usize) -> CalculatorExpr {
            self.exprs.get(&index).cloned().unwrap_or_default()
        }

        fn result(&self, index: usize) -> Option<UnifiedValue> {
            self.results.lock().get(&index).cloned()
        }

        fn put_result_if_absent(&self, index: usize, value: UnifiedValue) -> UnifiedValue {
            self.results.lock().entry(index).or_insert(value).clone()
        }

        fn degree_mode(&self, index: usize) -> bool {
            self.degree_modes.get(&index).copied().unwrap_or(false)
        }
    }

    fn eval(expr: &CalculatorExpr) -> UnifiedValue {
        expr.evaluate(false, &MapResolver::default())
            .expect("evaluation should succeed")
    }

    fn rational(num: i64, den: i64) -> BoundedRational {
        BoundedRational::from_ratio(num, den).expect("nonzero denominator")
    }

    #[test]
    fn precedence_keeps_multiplication_first() {
        // 2 + 3 * 4 = 14, exactly.
        let mut e = CalculatorExpr::new();
        e.push_number("2");
        e.push_op(OpKind::Plus);
        e.push_number("3");
        e.push_op(OpKind::Mul);
        e.push_number("4");
        let v = eval(&e);
        assert_eq!(v.exact().expect("exact"), &rational(14, 1));
    }

    #[test]
    fn one_third_renders_to_five_digits() {
        let mut e = CalculatorExpr::new();
        e.push_number("1");
        e.push_op(OpKind::Div);
        e.push_number("3");
        let v = eval(&e);
        assert_eq!(v.to_digits(5, 10).expect("digits"), "0.33333");
    }

    #[test]
    fn sqrt_two_renders_twenty_digits() {
        let mut e = CalculatorExpr::new();
        e.push_op(OpKind::Sqrt);
        e.push_op(OpKind::LParen);
        e.push_number("2");
        e.push_op(OpKind::RParen);
        let v = eval(&e);
        assert_eq!(
            v.to_digits(20, 10).expect("digits"),
            "1.41421356237309504880"
        );
    }

    #[test]
    fn percent_of_running_total() {
        // 100 + 10% = 110, exactly.
        let mut e = CalculatorExpr::new();
        e.push_number("100");
        e.push_op(OpKind::Plus);
        e.push_number("10");
        e.push_op(OpKind::Percent);
        let v = eval(&e);
        assert_eq!(v.exact().expect("exact"), &rational(110, 1));
    }

    #[test]
    fn percent_of_running_total_subtracts_too() {
        let mut e = CalculatorExpr::new();
        e.push_number("50");
        e.push_op(OpKind::Minus);
        e.push_number("10");
        e.push_op(OpKind::Percent);
        let v = eval(&e);
        assert_eq!(v.exact().expect("exact"), &rational(45, 1));
    }

    #[test]
    fn plain_percent_divides_by_one_hundred() {
        // (10)% = 0.1: more than one token before %, so no special case.
        let mut e = CalculatorExpr::new();
        e.push_op(OpKind::LParen);
        e.push_number("10");
        e.push_op(OpKind::RParen);
        e.push_op(OpKind::Percent);
        let v = eval(&e);
        assert_eq!(v.exact().expect("exact"), &rational(1, 10));
    }

    #[test]
    fn sin_of_half_pi_in_radian_mode() {
        let mut e = CalculatorExpr::new();
        e.push_op(OpKind::Sin);
        e.push_op(OpKind::LParen);
        e.push_op(OpKind::Pi);
        e.push_op(OpKind::Div);
        e.push_number("2");
        e.push_op(OpKind::RParen);
        let v = eval(&e);
        assert_eq!(
            v.cr()
                .compare_abs(&CReal::from(1), -60)
                .expect("compare within tolerance"),
            0
        );
    }

    #[test]
    fn sin_of_ninety_in_degree_mode() {
        let mut e = CalculatorExpr::new();
        e.push_op(OpKind::Sin);
        e.push_op(OpKind::LParen);
        e.push_number("90");
        e.push_op(OpKind::RParen);
        let v = e
            .evaluate(true, &MapResolver::default())
            .expect("evaluation should succeed");
        assert_eq!(
            v.cr()
                .compare_abs(&CReal::from(1), -60)
                .expect("compare within tolerance"),
            0
        );
    }

    #[test]
    fn trailing_operators_are_ignored() {
        // "5 * 3 +" evaluates its valid prefix.
        let mut e = CalculatorExpr::new();
        e.push_number("5");
        e.push_op(OpKind::Mul);
        e.push_number("3");
        e.push_op(OpKind::Plus);
        let v = eval(&e);
        assert_eq!(v.exact().expect("exact"), &rational(15, 1));
    }

    #[test]
    fn implicit_multiplication_between_operands() {
        let mut e = CalculatorExpr::new();
        e.push_number("2");
        e.push_number("3");
        assert_eq!(e.tokens().len(), 3);
        let v = eval(&e);
        assert_eq!(v.exact().expect("exact"), &rational(6, 1));
    }

    #[test]
    fn unbalanced_parenthesis_is_a_syntax_error() {
        let mut e = CalculatorExpr::new();
        e.push_op(OpKind::LParen);
        e.push_number("2");
        assert!(matches!(
            e.evaluate(false, &MapResolver::default()),
            Err(CalcError::Syntax)
        ));
    }

    #[test]
    fn exponentiation_is_right_associative() {
        // 2 ^ 3 ^ 2 = 512.
        let mut e = CalculatorExpr::new();
        e.push_number("2");
        e.push_op(OpKind::Pow);
        e.push_number("3");
        e.push_op(OpKind::Pow);
        e.push_number("2");
        let v = eval(&e);
        assert_eq!(v.exact().expect("exact"), &rational(512, 1));
    }

    #[test]
    fn factorial_and_square_suffixes() {
        // 3!^2 via suffix then pow: (3!)² = 36 using the square suffix.
        let mut e = CalculatorExpr::new();
        e.push_number("3");
        e.push_op(OpKind::Fact);
        e.push_op(OpKind::Square);
        let v = eval(&e);
        assert_eq!(v.exact().expect("exact"), &rational(36, 1));
    }

    #[test]
    fn references_resolve_through_the_store() {
        // Index 1: "6 * 7"; main expression: "ref(1) + 1".
        let mut referenced = CalculatorExpr::new();
        referenced.push_number("6");
        referenced.push_op(OpKind::Mul);
        referenced.push_number("7");
        let mut resolver = MapResolver::default();
        resolver.exprs.insert(1, referenced);
        let mut e = CalculatorExpr::new();
        e.push(Token::Ref {
            index: 1,
            short_repr: "42".to_owned(),
        });
        e.push_op(OpKind::Plus);
        e.push_number("1");
        let v = e.evaluate(false, &resolver).expect("evaluation");
        assert_eq!(v.exact().expect("exact"), &rational(43, 1));
        // The pre-evaluation pass memoized the referenced result.
        assert!(resolver.result(1).is_some());
    }

    #[test]
    fn reference_chains_pre_evaluate_transitively() {
        // 2 -> 1 -> 0, only the head evaluated directly.
        let mut base = CalculatorExpr::new();
        base.push_number("5");
        let mut middle = CalculatorExpr::new();
        middle.push(Token::Ref {
            index: 0,
            short_repr: "5".to_owned(),
        });
        middle.push_op(OpKind::Mul);
        middle.push_number("2");
        let mut resolver = MapResolver::default();
        resolver.exprs.insert(0, base);
        resolver.exprs.insert(1, middle);
        let mut e = CalculatorExpr::new();
        e.push(Token::Ref {
            index: 1,
            short_repr: "10".to_owned(),
        });
        e.push_op(OpKind::Plus);
        e.push_number("1");
        let v = e.evaluate(false, &resolver).expect("evaluation");
        assert_eq!(v.exact().expect("exact"), &rational(11, 1));
        assert!(resolver.result(0).is_some());
        assert!(resolver.result(1).is_some());
    }

    #[test]
    fn literal_entry_supports_undo() {
        let mut literal = Literal::new();
        literal.push_digit(1);
        literal.push_point();
        literal.push_digit(5);
        assert_eq!(
            literal.to_rational().expect("rational"),
            rational(3, 2)
        );
        assert!(literal.pop()); // 5
        assert!(literal.pop()); // point
        literal.push_digit(7);
        assert_eq!(
            literal.to_rational().expect("rational"),
            rational(17, 1)
        );
    }

    #[test]
    fn literal_exponent_entry() {
        let mut literal = Literal::new();
        literal.push_digit(2);
        literal.push_digit(5);
        literal.set_exponent(-3);
        assert_eq!(
            literal.to_rational().expect("rational"),
            rational(1, 40)
        );
    }

    #[test]
    fn cancellation_surfaces_from_evaluation() {
        let mut e = CalculatorExpr::new();
        e.push_op(OpKind::Sin);
        e.push_op(OpKind::LParen);
        e.push_op(OpKind::Pi);
        e.push_op(OpKind::RParen);
        let v = eval(&e);
        concurrency::request_stop();
        let result = v.to_digits(10_000, 10);
        concurrency::clear_stop();
        assert_eq!(result, Err(CalcError::Cancelled));
        // After clearing the flag the same value evaluates normally.
        let digits = v.to_digits(5, 10).expect("digits after clearing");
        assert_eq!(digits, "0.00000");
    }
}
