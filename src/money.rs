//! Fixed-point money values
//!
//! Every amount in the ledger is an `i64` count of minor units (cents for
//! two-decimal currencies). Decimal strings only appear at the edges, when a
//! payload is parsed or a value is rendered, and `bigdecimal` keeps that
//! conversion exact.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Neg;
use std::str::FromStr;

use crate::types::{LedgerError, LedgerResult};

/// Signed amount in minor units of the owning account's currency
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Wrap a raw minor-unit count
    pub const fn from_minor(minor_units: i64) -> Self {
        Self(minor_units)
    }

    /// Raw minor-unit count
    pub const fn minor_units(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Magnitude as an unsigned count, safe for `i64::MIN`
    pub fn magnitude(&self) -> u64 {
        self.0.unsigned_abs()
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn checked_neg(self) -> Option<Amount> {
        self.0.checked_neg().map(Amount)
    }

    /// Add, reporting overflow as an `OutOfRange` error
    pub fn try_add(self, other: Amount) -> LedgerResult<Amount> {
        self.checked_add(other).ok_or_else(|| {
            LedgerError::OutOfRange(format!("amount overflow adding {} to {}", other, self))
        })
    }

    pub fn try_sub(self, other: Amount) -> LedgerResult<Amount> {
        self.checked_sub(other).ok_or_else(|| {
            LedgerError::OutOfRange(format!("amount overflow subtracting {} from {}", other, self))
        })
    }

    /// Sum a sequence of amounts without wrapping
    pub fn try_sum<I>(amounts: I) -> LedgerResult<Amount>
    where
        I: IntoIterator<Item = Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, amount| acc.try_add(amount))
    }

    /// Convert to a decimal value with the currency's number of minor digits
    pub fn to_decimal(&self, currency: &Currency) -> BigDecimal {
        BigDecimal::new(BigInt::from(self.0), i64::from(currency.minor_unit_digits()))
    }

    /// Convert a decimal value into minor units, rejecting sub-minor fractions
    pub fn from_decimal(value: &BigDecimal, currency: &Currency) -> LedgerResult<Amount> {
        let factor = BigDecimal::new(BigInt::from(1), -i64::from(currency.minor_unit_digits()));
        let scaled = value * &factor;

        if scaled.with_scale(0) != scaled {
            return Err(LedgerError::Validation(format!(
                "{} has more than {} decimal places for {}",
                value,
                currency.minor_unit_digits(),
                currency
            )));
        }

        scaled
            .to_i64()
            .map(Amount)
            .ok_or_else(|| LedgerError::OutOfRange(format!("{} does not fit in an amount", value)))
    }

    /// Parse a user-entered decimal string such as `"-25.00"`
    pub fn parse(input: &str, currency: &Currency) -> LedgerResult<Amount> {
        let value = BigDecimal::from_str(input.trim())
            .map_err(|e| LedgerError::Validation(format!("invalid amount '{}': {}", input, e)))?;
        Self::from_decimal(&value, currency)
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl From<i64> for Amount {
    fn from(minor_units: i64) -> Self {
        Amount(minor_units)
    }
}

/// Renders with two minor digits; use [`Amount::to_decimal`] for other currencies
impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.magnitude();
        write!(f, "{}{}.{:02}", sign, magnitude / 100, magnitude % 100)
    }
}

/// ISO-4217 currency code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Validate and wrap a three-letter uppercase code
    pub fn new(code: impl Into<String>) -> LedgerResult<Self> {
        let code = code.into();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(LedgerError::Validation(format!(
                "currency must be a three-letter ISO code, got '{}'",
                code
            )));
        }
        Ok(Self(code))
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Number of decimal digits in one major unit
    pub fn minor_unit_digits(&self) -> u8 {
        match self.0.as_str() {
            "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF"
            | "UGX" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
            "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
            _ => 2,
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = LedgerError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        Currency::new(code)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brl() -> Currency {
        Currency::new("BRL").unwrap()
    }

    #[test]
    fn test_parse_exact_minor_units() {
        assert_eq!(Amount::parse("125.40", &brl()).unwrap(), Amount::from_minor(12540));
        assert_eq!(Amount::parse("-25", &brl()).unwrap(), Amount::from_minor(-2500));
        assert_eq!(Amount::parse("0.1", &brl()).unwrap(), Amount::from_minor(10));
    }

    #[test]
    fn test_parse_rejects_sub_cent_fractions() {
        let err = Amount::parse("10.005", &brl()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_zero_decimal_currency() {
        let jpy = Currency::new("JPY").unwrap();
        assert_eq!(Amount::parse("1500", &jpy).unwrap(), Amount::from_minor(1500));
        assert!(Amount::parse("1500.5", &jpy).is_err());
        assert_eq!(
            Amount::from_minor(1500).to_decimal(&jpy),
            BigDecimal::from(1500)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Amount::from_minor(-2500).to_string(), "-25.00");
        assert_eq!(Amount::from_minor(7).to_string(), "0.07");
        assert_eq!(Amount::from_minor(i64::MIN).to_string(), "-92233720368547758.08");
    }

    #[test]
    fn test_try_sum_reports_overflow() {
        let err = Amount::try_sum([Amount::from_minor(i64::MAX), Amount::from_minor(1)]).unwrap_err();
        assert!(matches!(err, LedgerError::OutOfRange(_)));
        assert_eq!(
            Amount::try_sum([10, -3, 5].map(Amount::from_minor)).unwrap(),
            Amount::from_minor(12)
        );
    }

    #[test]
    fn test_currency_validation() {
        assert!(Currency::new("usd").is_err());
        assert!(Currency::new("EURO").is_err());
        assert_eq!(Currency::new("KWD").unwrap().minor_unit_digits(), 3);
    }
}
