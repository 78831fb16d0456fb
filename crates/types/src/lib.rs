//! Validated value types shared across the quotation crates.
//!
//! These types carry their invariant from construction onwards, so callers further down never
//! need to re-check for blank text or negative amounts.

/// Errors that can occur when creating validated value types.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TypesError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    EmptyText,
    /// The amount was NaN or infinite
    #[error("Amount must be a finite number")]
    NonFiniteAmount,
    /// The amount was below zero
    #[error("Amount cannot be negative: {0}")]
    NegativeAmount(f64),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Errors
    ///
    /// Returns `TypesError::EmptyText` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TypesError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TypesError::EmptyText);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// A monetary amount that is finite and never negative.
///
/// Amounts are kept as `f64` in the currency's major unit. Comparisons that involve computed
/// totals should go through [`Money::approx_eq`] rather than `==`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Money(f64);

impl Money {
    pub const ZERO: Money = Money(0.0);

    /// Creates a new `Money` value.
    ///
    /// # Errors
    ///
    /// Returns `TypesError::NonFiniteAmount` for NaN/infinity and
    /// `TypesError::NegativeAmount` for values below zero.
    pub fn new(amount: f64) -> Result<Self, TypesError> {
        if !amount.is_finite() {
            return Err(TypesError::NonFiniteAmount);
        }
        if amount < 0.0 {
            return Err(TypesError::NegativeAmount(amount));
        }
        // Normalise -0.0 so it serialises as 0.
        Ok(Self(amount + 0.0))
    }

    pub fn amount(self) -> f64 {
        self.0
    }

    /// Returns true when both amounts differ by no more than `tolerance`.
    pub fn approx_eq(self, other: Money, tolerance: f64) -> bool {
        (self.0 - other.0).abs() <= tolerance
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl serde::Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_f64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = f64::deserialize(deserializer)?;
        Money::new(v).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_input() {
        let text = NonEmptyText::new("  Amoxicillin 500mg ").unwrap();
        assert_eq!(text.as_str(), "Amoxicillin 500mg");
    }

    #[test]
    fn non_empty_text_rejects_whitespace() {
        assert_eq!(NonEmptyText::new("   "), Err(TypesError::EmptyText));
    }

    #[test]
    fn non_empty_text_deserialize_rejects_blank() {
        let result: Result<NonEmptyText, _> = serde_json::from_str("\"  \"");
        assert!(result.is_err());
    }

    #[test]
    fn money_rejects_negative_and_non_finite() {
        assert_eq!(Money::new(-0.5), Err(TypesError::NegativeAmount(-0.5)));
        assert_eq!(Money::new(f64::NAN), Err(TypesError::NonFiniteAmount));
        assert_eq!(Money::new(f64::INFINITY), Err(TypesError::NonFiniteAmount));
    }

    #[test]
    fn money_sum_and_tolerance() {
        let total: Money = [0.1, 0.2]
            .into_iter()
            .map(|v| Money::new(v).unwrap())
            .sum();
        assert!(total.approx_eq(Money::new(0.3).unwrap(), 1e-9));
        assert_eq!(format!("{}", total), "0.30");
    }
}
