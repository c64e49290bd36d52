//! Exact decimal token quantities.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Largest supported number of fractional digits.
pub const MAX_SCALE: u32 = 38;

/// A non-negative decimal quantity of tokens.
///
/// Stored as an integer mantissa and a decimal scale so that amounts like
/// `"0.000000000000000001"` survive storage and transport without ever
/// passing through a float. Trailing fractional zeros are stripped on
/// construction, so equal quantities are structurally equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenAmount {
    mantissa: u128,
    scale: u32,
}

/// Error returned when a string is not a valid [`TokenAmount`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenAmountError {
    /// The input was empty or contained something other than digits and
    /// a single decimal point.
    #[error("Invalid token amount '{0}': expected a non-negative decimal like 150 or 0.25")]
    Malformed(String),

    /// Too many fractional digits.
    #[error("Invalid token amount '{0}': at most {MAX_SCALE} fractional digits are supported")]
    ScaleTooLarge(String),

    /// The value does not fit in 128 bits of mantissa.
    #[error("Invalid token amount '{0}': value is too large")]
    Overflow(String),
}

impl TokenAmount {
    /// Zero tokens.
    pub const ZERO: Self = Self {
        mantissa: 0,
        scale: 0,
    };

    /// A whole number of tokens.
    #[must_use]
    pub const fn whole(units: u128) -> Self {
        Self {
            mantissa: units,
            scale: 0,
        }
    }

    /// Builds an amount from a mantissa and scale, i.e.
    /// `mantissa * 10^-scale`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenAmountError::ScaleTooLarge`] if `scale` exceeds
    /// [`MAX_SCALE`].
    pub fn from_parts(mantissa: u128, scale: u32) -> Result<Self, TokenAmountError> {
        if scale > MAX_SCALE {
            return Err(TokenAmountError::ScaleTooLarge(format!(
                "{mantissa}e-{scale}"
            )));
        }
        Ok(Self::normalized(mantissa, scale))
    }

    const fn normalized(mut mantissa: u128, mut scale: u32) -> Self {
        while scale > 0 && mantissa % 10 == 0 {
            mantissa /= 10;
            scale -= 1;
        }
        if mantissa == 0 {
            scale = 0;
        }
        Self { mantissa, scale }
    }

    /// Integer mantissa.
    #[must_use]
    pub const fn mantissa(&self) -> u128 {
        self.mantissa
    }

    /// Number of fractional digits.
    #[must_use]
    pub const fn scale(&self) -> u32 {
        self.scale
    }

    /// Whether this amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    /// Adds two amounts, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        let scale = self.scale.max(other.scale);
        let a = rescale(self.mantissa, scale - self.scale)?;
        let b = rescale(other.mantissa, scale - other.scale)?;
        Some(Self::normalized(a.checked_add(b)?, scale))
    }
}

fn rescale(mantissa: u128, extra_digits: u32) -> Option<u128> {
    10u128
        .checked_pow(extra_digits)
        .and_then(|factor| mantissa.checked_mul(factor))
}

impl FromStr for TokenAmount {
    type Err = TokenAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (int_part, frac_part) = trimmed.split_once('.').unwrap_or((trimmed, ""));

        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if int_part.is_empty()
            || !all_digits(int_part)
            || !all_digits(frac_part)
            || (trimmed.contains('.') && frac_part.is_empty())
        {
            return Err(TokenAmountError::Malformed(s.to_string()));
        }

        let frac_part = frac_part.trim_end_matches('0');
        let scale = u32::try_from(frac_part.len()).unwrap_or(u32::MAX);
        if scale > MAX_SCALE {
            return Err(TokenAmountError::ScaleTooLarge(s.to_string()));
        }

        let mut mantissa: u128 = 0;
        for digit in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(u128::from(digit - b'0')))
                .ok_or_else(|| TokenAmountError::Overflow(s.to_string()))?;
        }

        Ok(Self::normalized(mantissa, scale))
    }
}

impl std::fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let digits = self.mantissa.to_string();
        let scale = self.scale as usize;
        if digits.len() > scale {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            write!(f, "{int_part}.{frac_part}")
        } else {
            write!(f, "0.{digits:0>scale$}")
        }
    }
}

impl TryFrom<String> for TokenAmount {
    type Error = TokenAmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TokenAmount> for String {
    fn from(value: TokenAmount) -> Self {
        value.to_string()
    }
}

impl PartialOrd for TokenAmount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TokenAmount {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        // An overflowing rescale means that side is beyond u128 at the
        // common scale, so it is the larger one.
        match (
            rescale(self.mantissa, scale - self.scale),
            rescale(other.mantissa, scale - other.scale),
        ) {
            (Some(a), Some(b)) => a.cmp(&b),
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (None, None) => self
                .mantissa
                .cmp(&other.mantissa)
                .then(other.scale.cmp(&self.scale)),
        }
    }
}
