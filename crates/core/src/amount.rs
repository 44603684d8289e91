//! Fixed-point decimal amounts.
//!
//! Token quantities arrive as base-unit integers (RPC logs, subgraph `BigInt`s)
//! or as decimal strings (subgraph `BigDecimal`s). Both are normalised into an
//! [`Amount`]: a signed 256-bit integer scaled by `10^18`. The ledger stores the
//! `Display` form as text, like the rest of the numeric columns.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use alloy::primitives::{I256, U256};

use crate::AppError;

/// Number of fractional digits kept by [`Amount`].
pub const SCALE_DECIMALS: u8 = 18;

/// Largest decimal exponent magnitude accepted by [`Amount::parse`].
const MAX_EXPONENT: u64 = 96;

fn pow10(exp: u8) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// A signed decimal with 18 fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(I256);

impl Amount {
    pub const ZERO: Amount = Amount(I256::ZERO);

    /// Convert a base-unit integer into a decimal using the token's `decimals`.
    pub fn from_units(units: U256, decimals: u8) -> Result<Self, AppError> {
        if decimals > SCALE_DECIMALS {
            return Err(AppError::Decode(format!(
                "tokens with {decimals} decimals exceed supported precision"
            )));
        }
        let scaled = units
            .checked_mul(pow10(SCALE_DECIMALS - decimals))
            .ok_or_else(|| AppError::Decode(format!("amount {units} overflows")))?;
        let signed = I256::try_from(scaled)
            .map_err(|_| AppError::Decode(format!("amount {units} overflows")))?;
        Ok(Self(signed))
    }

    /// Parse a base-unit integer string (a GraphQL `BigInt`).
    pub fn parse_units(s: &str, decimals: u8) -> Result<Self, AppError> {
        let units = U256::from_str_radix(s.trim(), 10)
            .map_err(|e| AppError::Decode(format!("invalid integer amount {s:?}: {e}")))?;
        Self::from_units(units, decimals)
    }

    /// Parse a decimal string, with optional sign and exponent (`1.5`, `-3`, `2e-6`).
    ///
    /// Digits beyond 18 fractional places are truncated toward zero.
    pub fn parse(s: &str) -> Result<Self, AppError> {
        let invalid = || AppError::Decode(format!("invalid decimal amount {s:?}"));
        let s = s.trim();
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        let (mantissa, exponent) = match body.split_once(['e', 'E']) {
            Some((m, e)) => (m, e.parse::<i64>().map_err(|_| invalid())?),
            None => (body, 0),
        };
        if exponent.unsigned_abs() > MAX_EXPONENT {
            return Err(invalid());
        }
        let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        // Re-place the decimal point after applying the exponent.
        let digits: String = format!("{int_part}{frac_part}");
        let point = i64::try_from(int_part.len())
            .ok()
            .and_then(|len| len.checked_add(exponent))
            .ok_or_else(invalid)?;
        let (int_digits, frac_digits) = if point <= 0 {
            let zeros = "0".repeat(point.unsigned_abs() as usize);
            (String::new(), format!("{zeros}{digits}"))
        } else if point as usize >= digits.len() {
            let zeros = "0".repeat(point as usize - digits.len());
            (format!("{digits}{zeros}"), String::new())
        } else {
            let (i, f) = digits.split_at(point as usize);
            (i.to_string(), f.to_string())
        };

        let mut frac: String = frac_digits.chars().take(SCALE_DECIMALS as usize).collect();
        while frac.len() < SCALE_DECIMALS as usize {
            frac.push('0');
        }

        let int = if int_digits.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(&int_digits, 10).map_err(|_| invalid())?
        };
        let frac = U256::from_str_radix(&frac, 10).map_err(|_| invalid())?;
        let raw = int
            .checked_mul(pow10(SCALE_DECIMALS))
            .and_then(|v| v.checked_add(frac))
            .ok_or_else(invalid)?;
        let value = I256::try_from(raw).map_err(|_| invalid())?;

        Ok(Self(if negative { -value } else { value }))
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = pow10(SCALE_DECIMALS);
        let abs = self.0.unsigned_abs();
        let int = abs / scale;
        let frac = abs % scale;

        if self.0.is_negative() {
            f.write_str("-")?;
        }
        write!(f, "{int}")?;
        if !frac.is_zero() {
            let padded = format!("{:0>width$}", frac.to_string(), width = SCALE_DECIMALS as usize);
            write!(f, ".{}", padded.trim_end_matches('0'))?;
        }
        Ok(())
    }
}

impl FromStr for Amount {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 = self.0 + rhs.0;
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        self.0 = self.0 - rhs.0;
    }
}
