//! Money and currency value objects.
//!
//! Amounts are carried as integer minor units (cents for USD) so that split
//! allocation and balance arithmetic never leak rounding error. Decimal input
//! is converted at the boundary with [`Money::from_decimal`].

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// ISO-4217 alpha-3 currency code (always upper-case).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> VaultResult<Self> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(VaultError::validation(format!(
                "currency must be a 3-letter ISO code, got '{code}'"
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of decimal places of the currency's minor unit.
    pub fn minor_unit_exponent(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" | "XAF" | "XOF" => 0,
            "BHD" | "KWD" | "JOD" | "OMR" | "TND" => 3,
            _ => 2,
        }
    }

    /// Smallest representable amount, in major units (0.01 for USD).
    pub fn epsilon(&self) -> Decimal {
        Decimal::new(1, self.minor_unit_exponent())
    }

    fn scale_factor(&self) -> Decimal {
        Decimal::from(10i64.pow(self.minor_unit_exponent()))
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::usd()
    }
}

impl TryFrom<String> for Currency {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An amount of money in a single currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the currency's minor unit (e.g. cents).
    pub amount_minor: i64,
    pub currency: Currency,
}

impl Money {
    /// Largest amount a single ledger entry may carry, in minor units.
    pub const MAX_ENTRY_MINOR: i64 = 1_000_000_000_000_000;

    pub fn new(amount_minor: i64, currency: Currency) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    /// Parse a major-unit decimal (e.g. `33.34`) into minor units.
    ///
    /// Rejects values with more precision than the currency's minor unit.
    pub fn from_decimal(amount: Decimal, currency: Currency) -> VaultResult<Self> {
        let scaled = amount
            .checked_mul(currency.scale_factor())
            .ok_or_else(|| VaultError::validation("amount out of range"))?;
        if !scaled.fract().is_zero() {
            return Err(VaultError::validation(format!(
                "amount {amount} has more than {} decimal places for {currency}",
                currency.minor_unit_exponent()
            )));
        }
        let amount_minor = scaled
            .to_i64()
            .ok_or_else(|| VaultError::validation("amount out of range"))?;
        Ok(Self::new(amount_minor, currency))
    }

    /// Convert a major-unit decimal to minor units, rounding half away from zero.
    pub fn minor_units_rounded(amount: Decimal, currency: &Currency) -> VaultResult<i64> {
        amount
            .checked_mul(currency.scale_factor())
            .map(|d| d.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|d| d.to_i64())
            .ok_or_else(|| VaultError::validation("amount out of range"))
    }

    /// Major-unit decimal representation, scaled to the currency exponent.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from_i128_with_scale(
            self.amount_minor as i128,
            self.currency.minor_unit_exponent(),
        )
    }

    pub fn is_positive(&self) -> bool {
        self.amount_minor > 0
    }

    /// Same currency, different amount.
    pub fn with_amount(&self, amount_minor: i64) -> Self {
        Self::new(amount_minor, self.currency.clone())
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.to_decimal(), self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn currency_is_normalised_to_upper_case() {
        assert_eq!(Currency::new("eur").unwrap().as_str(), "EUR");
        assert!(Currency::new("EURO").is_err());
        assert!(Currency::new("U$D").is_err());
    }

    #[test]
    fn from_decimal_respects_minor_unit_precision() {
        let usd = Currency::usd();
        assert_eq!(Money::from_decimal(dec!(33.34), usd.clone()).unwrap().amount_minor, 3334);
        assert_eq!(Money::from_decimal(dec!(100), usd.clone()).unwrap().amount_minor, 10000);
        assert!(Money::from_decimal(dec!(1.005), usd).is_err());

        let jpy = Currency::new("JPY").unwrap();
        assert_eq!(Money::from_decimal(dec!(1500), jpy.clone()).unwrap().amount_minor, 1500);
        assert!(Money::from_decimal(dec!(10.5), jpy).is_err());
    }

    #[test]
    fn to_decimal_keeps_currency_scale() {
        let m = Money::new(10000, Currency::usd());
        assert_eq!(m.to_decimal().to_string(), "100.00");
        assert_eq!(m.to_string(), "100.00 USD");

        let kwd = Money::new(1500, Currency::new("KWD").unwrap());
        assert_eq!(kwd.to_decimal().to_string(), "1.500");
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        let usd = Currency::usd();
        assert_eq!(Money::minor_units_rounded(dec!(33.335), &usd).unwrap(), 3334);
        assert_eq!(Money::minor_units_rounded(dec!(33.334), &usd).unwrap(), 3333);
    }

    #[test]
    fn currency_serde_rejects_invalid_codes() {
        let ok: Currency = serde_json::from_str("\"gbp\"").unwrap();
        assert_eq!(ok.as_str(), "GBP");
        assert!(serde_json::from_str::<Currency>("\"pounds\"").is_err());
    }
}
