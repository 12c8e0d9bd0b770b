// 0.0: 18-decimal fixed point. every reserve, size, margin and ratio in the engine is one of these.
// the mantissa is a signed i128 scaled by 1e18. all ops are checked and truncate toward zero.
// products that overflow i128 are redone in BigInt so only the final result has to fit.

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const DECIMALS: u32 = 18;
pub const SCALE: i128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MathError {
    #[error("arithmetic overflow")]
    Overflow,

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid decimal literal")]
    InvalidLiteral,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedDecimal(i128);

impl FixedDecimal {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(SCALE);
    /// Smallest representable step (1e-18).
    pub const UNIT: Self = Self(1);

    pub const fn from_raw(raw: i128) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> i128 {
        self.0
    }

    pub const fn from_int(value: i64) -> Self {
        // |i64| * 1e18 < 2^127, cannot overflow
        Self(value as i128 * SCALE)
    }

    /// Builds `numerator / denominator` without an intermediate fixed value.
    pub fn from_ratio(numerator: i64, denominator: i64) -> Result<Self, MathError> {
        Self::from_int(numerator).try_div(Self::from_int(denominator))
    }

    // 0.1: rust_decimal interop. config files and tests speak Decimal.
    pub fn from_decimal(value: Decimal) -> Result<Self, MathError> {
        let scale = value.scale();
        let mantissa = value.mantissa();
        let raw = if scale <= DECIMALS {
            let factor = 10i128.pow(DECIMALS - scale);
            mantissa.checked_mul(factor).ok_or(MathError::Overflow)?
        } else {
            mantissa / 10i128.pow(scale - DECIMALS)
        };
        Ok(Self(raw))
    }

    pub fn to_decimal(&self) -> Result<Decimal, MathError> {
        Decimal::try_from_i128_with_scale(self.0, DECIMALS)
            .map(|d| d.normalize())
            .map_err(|_| MathError::Overflow)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn signum(&self) -> i128 {
        self.0.signum()
    }

    pub fn abs(&self) -> Self {
        Self(self.0.saturating_abs())
    }

    pub fn try_neg(&self) -> Result<Self, MathError> {
        self.0.checked_neg().map(Self).ok_or(MathError::Overflow)
    }

    pub fn try_add(&self, other: Self) -> Result<Self, MathError> {
        self.0.checked_add(other.0).map(Self).ok_or(MathError::Overflow)
    }

    pub fn try_sub(&self, other: Self) -> Result<Self, MathError> {
        self.0.checked_sub(other.0).map(Self).ok_or(MathError::Overflow)
    }

    /// `self * other / 1e18`, truncated toward zero.
    pub fn try_mul(&self, other: Self) -> Result<Self, MathError> {
        mul_div_raw(self.0, other.0, SCALE).map(|(q, _)| Self(q))
    }

    /// `self * 1e18 / other`, truncated toward zero.
    pub fn try_div(&self, other: Self) -> Result<Self, MathError> {
        self.try_div_exact(other).map(|(q, _)| q)
    }

    /// Like `try_div` but also reports whether the quotient was truncated.
    pub fn try_div_exact(&self, other: Self) -> Result<(Self, bool), MathError> {
        mul_div_raw(self.0, SCALE, other.0).map(|(q, inexact)| (Self(q), inexact))
    }

    /// `self * numerator / denominator` with a single truncation.
    pub fn try_mul_div(&self, numerator: Self, denominator: Self) -> Result<Self, MathError> {
        mul_div_raw(self.0, numerator.0, denominator.0).map(|(q, _)| Self(q))
    }

    pub fn try_mul_int(&self, factor: i128) -> Result<Self, MathError> {
        self.0.checked_mul(factor).map(Self).ok_or(MathError::Overflow)
    }

    pub fn try_div_int(&self, divisor: i128) -> Result<Self, MathError> {
        if divisor == 0 {
            return Err(MathError::DivisionByZero);
        }
        self.0.checked_div(divisor).map(Self).ok_or(MathError::Overflow)
    }

    /// Clamps negatives to zero.
    pub fn non_negative(&self) -> Self {
        if self.0 < 0 {
            Self::ZERO
        } else {
            *self
        }
    }
}

// a * b / d on raw mantissas. returns (quotient, remainder != 0)
fn mul_div_raw(a: i128, b: i128, d: i128) -> Result<(i128, bool), MathError> {
    if d == 0 {
        return Err(MathError::DivisionByZero);
    }
    if let Some(product) = a.checked_mul(b) {
        let q = product.checked_div(d).ok_or(MathError::Overflow)?;
        return Ok((q, product % d != 0));
    }
    let product = BigInt::from(a) * BigInt::from(b);
    let divisor = BigInt::from(d);
    // BigInt division truncates toward zero like the i128 path
    let q = &product / &divisor;
    let inexact = !(&product % &divisor).is_zero();
    let q = q.to_i128().ok_or(MathError::Overflow)?;
    Ok((q, inexact))
}

impl fmt::Display for FixedDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        let scale = SCALE as u128;
        let int_part = magnitude / scale;
        let frac_part = magnitude % scale;
        if frac_part == 0 {
            return write!(f, "{}{}", sign, int_part);
        }
        let frac = format!("{:018}", frac_part);
        write!(f, "{}{}.{}", sign, int_part, frac.trim_end_matches('0'))
    }
}

impl FromStr for FixedDecimal {
    type Err = MathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (int_str, frac_str) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if int_str.is_empty() && frac_str.is_empty() {
            return Err(MathError::InvalidLiteral);
        }
        if frac_str.len() > DECIMALS as usize {
            return Err(MathError::InvalidLiteral);
        }
        let digits_ok = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if !digits_ok(int_str) || !digits_ok(frac_str) {
            return Err(MathError::InvalidLiteral);
        }

        let int_value: i128 = if int_str.is_empty() {
            0
        } else {
            int_str.parse().map_err(|_| MathError::Overflow)?
        };
        let frac_value: i128 = if frac_str.is_empty() {
            0
        } else {
            let padded = format!("{:0<18}", frac_str);
            padded.parse().map_err(|_| MathError::InvalidLiteral)?
        };

        let raw = int_value
            .checked_mul(SCALE)
            .and_then(|v| v.checked_add(frac_value))
            .ok_or(MathError::Overflow)?;
        Ok(Self(if negative { -raw } else { raw }))
    }
}

impl TryFrom<Decimal> for FixedDecimal {
    type Error = MathError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::from_decimal(value)
    }
}

// serialized as a decimal string so json never rounds through f64
impl Serialize for FixedDecimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FixedDecimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
