//! Amounts and qualities - the value layer of the engine.
//!
//! Every quantity is a `rust_decimal::Decimal` tagged with its asset. An
//! offer's quality is kept as an exact `taker_pays / taker_gets` pair and is
//! only ever divided out when an amount has to be produced, so chained bridge
//! computations do not accumulate division error. Amounts are rounded to a
//! per-asset scale at the point they are committed to a fragment.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Currency code of the native asset.
pub const NATIVE_CODE: &str = "XRP";

/// Errors raised by the value layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("asset mismatch: {left} vs {right}")]
    AssetMismatch { left: Asset, right: Asset },

    #[error("division by zero quality (zero taker_gets)")]
    DivisionByZero,

    #[error("non-positive value in quality: {0}")]
    NonPositive(Decimal),

    #[error("decimal overflow")]
    Overflow,

    #[error("cannot parse {input:?}: {reason}")]
    Parse { input: String, reason: String },
}

// ============================================================================
// Identifiers
// ============================================================================

/// Ledger account identifier. Ordered canonically by its text form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Currency symbol, e.g. `USD`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn native() -> Self {
        Self(NATIVE_CODE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Currency {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

// ============================================================================
// Asset
// ============================================================================

/// What an amount is denominated in: the native asset, or a currency issued
/// by a specific account.
///
/// Text form is `XRP` for the native asset and `USD/issuer` otherwise.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Asset {
    Native,
    Issued { currency: Currency, issuer: AccountId },
}

impl Asset {
    pub fn issued(currency: impl Into<Currency>, issuer: impl Into<AccountId>) -> Self {
        Asset::Issued {
            currency: currency.into(),
            issuer: issuer.into(),
        }
    }

    #[inline]
    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }

    pub fn currency(&self) -> Currency {
        match self {
            Asset::Native => Currency::native(),
            Asset::Issued { currency, .. } => currency.clone(),
        }
    }

    /// Issuing account, `None` for the native asset.
    pub fn issuer(&self) -> Option<&AccountId> {
        match self {
            Asset::Native => None,
            Asset::Issued { issuer, .. } => Some(issuer),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => f.write_str(NATIVE_CODE),
            Asset::Issued { currency, issuer } => write!(f, "{}/{}", currency, issuer),
        }
    }
}

impl FromStr for Asset {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_err = |reason: &str| AmountError::Parse {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        match s.split_once('/') {
            None if s == NATIVE_CODE => Ok(Asset::Native),
            None => Err(parse_err("issued currency needs an issuer")),
            Some((currency, issuer)) => {
                if currency.is_empty() || issuer.is_empty() || issuer.contains('/') {
                    return Err(parse_err("expected CURRENCY/ISSUER"));
                }
                if currency == NATIVE_CODE {
                    return Err(parse_err("native currency has no issuer"));
                }
                Ok(Asset::issued(currency, issuer))
            }
        }
    }
}

impl TryFrom<String> for Asset {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Asset> for String {
    fn from(asset: Asset) -> Self {
        asset.to_string()
    }
}

// ============================================================================
// Precision
// ============================================================================

/// Decimal places amounts are rounded to when committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Precision {
    /// Scale of the native asset (6 = smallest native unit)
    pub native_scale: u32,
    /// Scale of issued currencies
    pub issued_scale: u32,
}

impl Precision {
    #[inline]
    pub fn scale_for(&self, asset: &Asset) -> u32 {
        if asset.is_native() {
            self.native_scale
        } else {
            self.issued_scale
        }
    }
}

impl Default for Precision {
    fn default() -> Self {
        Self {
            native_scale: 6,
            issued_scale: 15,
        }
    }
}

// ============================================================================
// Amount
// ============================================================================

/// A priced quantity: value plus asset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    pub value: Decimal,
    pub asset: Asset,
}

impl Amount {
    pub fn new(value: Decimal, asset: Asset) -> Self {
        Self { value, asset }
    }

    pub fn native(value: Decimal) -> Self {
        Self::new(value, Asset::Native)
    }

    pub fn issued(value: Decimal, currency: &str, issuer: &str) -> Self {
        Self::new(value, Asset::issued(currency, issuer))
    }

    pub fn zero(asset: Asset) -> Self {
        Self::new(Decimal::ZERO, asset)
    }

    pub fn currency(&self) -> Currency {
        self.asset.currency()
    }

    pub fn issuer(&self) -> Option<&AccountId> {
        self.asset.issuer()
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.value > Decimal::ZERO
    }

    fn same_asset(&self, other: &Amount) -> Result<(), AmountError> {
        if self.asset == other.asset {
            Ok(())
        } else {
            Err(AmountError::AssetMismatch {
                left: self.asset.clone(),
                right: other.asset.clone(),
            })
        }
    }

    pub fn checked_add(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.same_asset(other)?;
        let value = self.value.checked_add(other.value).ok_or(AmountError::Overflow)?;
        Ok(Amount::new(value, self.asset.clone()))
    }

    /// Subtract; the result may be negative (a computed delta).
    pub fn checked_sub(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.same_asset(other)?;
        let value = self.value.checked_sub(other.value).ok_or(AmountError::Overflow)?;
        Ok(Amount::new(value, self.asset.clone()))
    }

    /// `self × num / den`, unrounded.
    pub fn mul_ratio(&self, num: Decimal, den: Decimal) -> Result<Amount, AmountError> {
        Ok(Amount::new(mul_ratio(self.value, num, den)?, self.asset.clone()))
    }

    /// Compare values of two amounts in the same asset.
    pub fn compare(&self, other: &Amount) -> Result<Ordering, AmountError> {
        self.same_asset(other)?;
        Ok(self.value.cmp(&other.value))
    }

    /// Round toward zero at the asset's committed scale.
    pub fn round_down(&self, precision: &Precision) -> Amount {
        Amount::new(
            round_down(self.value, precision.scale_for(&self.asset)),
            self.asset.clone(),
        )
    }

    /// Round away from zero at the asset's committed scale.
    pub fn round_up(&self, precision: &Precision) -> Amount {
        Amount::new(
            round_up(self.value, precision.scale_for(&self.asset)),
            self.asset.clone(),
        )
    }
}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value.normalize(), self.asset)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    /// Parses `100/USD/g1` or `88/XRP`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, asset) = s.split_once('/').ok_or_else(|| AmountError::Parse {
            input: s.to_string(),
            reason: "expected VALUE/ASSET".to_string(),
        })?;
        let value = Decimal::from_str(value.trim()).map_err(|e| AmountError::Parse {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Amount::new(value, asset.trim().parse()?))
    }
}

// ============================================================================
// Quality
// ============================================================================

/// Exchange rate of an offer: `taker_pays / taker_gets`, kept as an exact
/// ratio. Lower is better for a taker acquiring `taker_gets`.
///
/// Both terms are strictly positive. Equality and ordering compare the ratio
/// value, so `1/2 == 2/4`.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Quality {
    pays: Decimal,
    gets: Decimal,
}

impl Quality {
    /// Quality of an offer paying `pays` for `gets`.
    pub fn new(pays: Decimal, gets: Decimal) -> Result<Self, AmountError> {
        if gets.is_zero() {
            return Err(AmountError::DivisionByZero);
        }
        if gets.is_sign_negative() {
            return Err(AmountError::NonPositive(gets));
        }
        if pays <= Decimal::ZERO {
            return Err(AmountError::NonPositive(pays));
        }
        Ok(Self { pays, gets })
    }

    /// Quality of an offer given its two amounts.
    pub fn from_amounts(taker_pays: &Amount, taker_gets: &Amount) -> Result<Self, AmountError> {
        Self::new(taker_pays.value, taker_gets.value)
    }

    pub fn pays(&self) -> Decimal {
        self.pays
    }

    pub fn gets(&self) -> Decimal {
        self.gets
    }

    /// Reciprocal: the same rate seen from the reverse book.
    #[inline]
    pub fn invert(&self) -> Self {
        Self {
            pays: self.gets,
            gets: self.pays,
        }
    }

    /// Product of two qualities (`self × other`), used for bridged paths.
    pub fn compose(&self, other: &Quality) -> Result<Self, AmountError> {
        match (
            self.pays.checked_mul(other.pays),
            self.gets.checked_mul(other.gets),
        ) {
            (Some(pays), Some(gets)) if !gets.is_zero() => Ok(Self { pays, gets }),
            _ => {
                let rate = self
                    .rate()
                    .checked_mul(other.rate())
                    .ok_or(AmountError::Overflow)?;
                Self::new(rate, Decimal::ONE)
            }
        }
    }

    /// Decimal rate (rounded to 28 significant digits). Display only.
    pub fn rate(&self) -> Decimal {
        self.pays.checked_div(self.gets).unwrap_or(Decimal::MAX)
    }

    /// Amount of `taker_pays` owed for receiving `gets`, unrounded.
    pub fn pays_for(&self, gets: Decimal) -> Result<Decimal, AmountError> {
        mul_ratio(gets, self.pays, self.gets)
    }

    /// Amount of `taker_gets` bought by paying `pays`, unrounded.
    pub fn gets_for(&self, pays: Decimal) -> Result<Decimal, AmountError> {
        mul_ratio(pays, self.gets, self.pays)
    }
}

impl PartialEq for Quality {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Quality {}

impl PartialOrd for Quality {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quality {
    fn cmp(&self, other: &Self) -> Ordering {
        // a/b vs c/d with b, d > 0  <=>  a*d vs c*b
        match (
            self.pays.checked_mul(other.gets),
            other.pays.checked_mul(self.gets),
        ) {
            (Some(left), Some(right)) => left.cmp(&right),
            _ => self.rate().cmp(&other.rate()),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rate().normalize())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// `value × num / den` with multiplication first to keep precision.
pub fn mul_ratio(value: Decimal, num: Decimal, den: Decimal) -> Result<Decimal, AmountError> {
    if den.is_zero() {
        return Err(AmountError::DivisionByZero);
    }
    match value.checked_mul(num) {
        Some(product) => product.checked_div(den).ok_or(AmountError::Overflow),
        None => value
            .checked_div(den)
            .and_then(|v| v.checked_mul(num))
            .ok_or(AmountError::Overflow),
    }
}

#[inline]
pub fn round_down(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::ToZero)
}

#[inline]
pub fn round_up(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::AwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_asset_parse_and_display() {
        assert_eq!("XRP".parse::<Asset>().unwrap(), Asset::Native);
        let usd: Asset = "USD/g1".parse().unwrap();
        assert_eq!(usd, Asset::issued("USD", "g1"));
        assert_eq!(usd.to_string(), "USD/g1");
        assert!("USD".parse::<Asset>().is_err());
        assert!("XRP/g1".parse::<Asset>().is_err());
        assert!("USD/g1/x".parse::<Asset>().is_err());
    }

    #[test]
    fn test_account_id_from_owned_name() {
        let name = format!("taker{}", 3);
        assert_eq!(AccountId::from(name), AccountId::from("taker3"));
    }

    #[test]
    fn test_amount_parse() {
        let a: Amount = "100/USD/g1".parse().unwrap();
        assert_eq!(a.value, dec!(100));
        assert_eq!(a.currency(), Currency::new("USD"));
        assert_eq!(a.issuer(), Some(&AccountId::new("g1")));

        let n: Amount = "88/XRP".parse().unwrap();
        assert!(n.asset.is_native());
        assert_eq!(n.issuer(), None);
        assert_eq!(n.to_string(), "88/XRP");
    }

    #[test]
    fn test_add_subtract_same_asset() {
        let a = Amount::issued(dec!(100), "USD", "g1");
        let b = Amount::issued(dec!(40), "USD", "g1");
        assert_eq!(a.checked_add(&b).unwrap().value, dec!(140));
        assert_eq!(b.checked_sub(&a).unwrap().value, dec!(-60));
    }

    #[test]
    fn test_asset_mismatch_rejected() {
        let a = Amount::issued(dec!(100), "USD", "g1");
        let b = Amount::issued(dec!(100), "USD", "g2");
        assert!(matches!(a.checked_add(&b), Err(AmountError::AssetMismatch { .. })));
        assert_eq!(a.partial_cmp(&b), None);
    }

    #[test]
    fn test_zero_gets_is_division_by_zero() {
        assert_eq!(Quality::new(dec!(1), dec!(0)), Err(AmountError::DivisionByZero));
        assert!(matches!(Quality::new(dec!(0), dec!(1)), Err(AmountError::NonPositive(_))));
    }

    #[test]
    fn test_quality_ordering_is_exact() {
        // 1/3 vs 33333/100000: division would round, cross multiplication does not
        let third = Quality::new(dec!(1), dec!(3)).unwrap();
        let approx = Quality::new(dec!(0.33333), dec!(1)).unwrap();
        assert!(approx < third);
        assert_eq!(Quality::new(dec!(1), dec!(2)).unwrap(), Quality::new(dec!(2), dec!(4)).unwrap());
    }

    #[test]
    fn test_quality_invert_roundtrip_is_exact() {
        // 100/88 inverted and inverted again must be the same ratio, no 299.999... drift
        let q = Quality::new(dec!(300), dec!(7)).unwrap();
        assert_eq!(q.invert().invert(), q);
        assert_eq!(q.invert().gets_for(dec!(7)).unwrap(), dec!(300));
    }

    #[test]
    fn test_quality_compose() {
        let leg1 = Quality::new(dec!(100), dec!(88)).unwrap();
        let leg2 = Quality::new(dec!(88), dec!(100)).unwrap();
        let bridged = leg1.compose(&leg2).unwrap();
        assert_eq!(bridged, Quality::new(dec!(1), dec!(1)).unwrap());
    }

    #[test]
    fn test_pays_for_and_gets_for() {
        let q = Quality::new(dec!(88), dec!(100)).unwrap();
        assert_eq!(q.pays_for(dec!(50)).unwrap(), dec!(44));
        assert_eq!(q.gets_for(dec!(44)).unwrap(), dec!(50));
    }

    #[test]
    fn test_rounding_by_asset() {
        let p = Precision::default();
        let n = Amount::native(dec!(1.23456789));
        assert_eq!(n.round_down(&p).value, dec!(1.234567));
        assert_eq!(n.round_up(&p).value, dec!(1.234568));
        let i = Amount::issued(dec!(1.23456789), "USD", "g1");
        assert_eq!(i.round_down(&p).value, dec!(1.23456789));
    }
}
