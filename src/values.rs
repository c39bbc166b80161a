use crate::error::{FieldPath, RecordError, Result};
use crate::validation::{Decode, DecodeScope, ObjectReader, Tagged};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

pub const DEFAULT_CURRENCY: &str = "GBP";

/// ISO 4217 code: exactly three upper-case ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn parse(raw: &str) -> Result<Self> {
        let code = raw.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
            Ok(Self(code.to_string()))
        } else {
            Err(RecordError::validation(
                &FieldPath::root(),
                format!(
                    "currency must be a three-letter upper-case ISO 4217 code, got '{}'",
                    code
                ),
            ))
        }
    }

    pub fn gbp() -> Self {
        Self(DEFAULT_CURRENCY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CurrencyCode {
    fn default() -> Self {
        Self::gbp()
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A non-negative amount in a given currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct Money {
    #[serde(serialize_with = "serialize_amount")]
    #[schemars(with = "f64", description = "Non-negative amount")]
    amount: Decimal,

    #[schemars(description = "ISO 4217 currency code; defaults to the item's currency")]
    currency: CurrencyCode,
}

impl Money {
    pub fn new(amount: Decimal, currency: CurrencyCode) -> Result<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(RecordError::validation(
                &FieldPath::root(),
                format!("must be non-negative, got {}", amount),
            ));
        }
        Ok(Self { amount, currency })
    }

    pub fn gbp(amount: Decimal) -> Result<Self> {
        Self::new(amount, CurrencyCode::gbp())
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &CurrencyCode {
        &self.currency
    }
}

impl Decode for Money {
    fn decode(raw: &Value, path: &FieldPath, scope: &DecodeScope) -> Result<Self> {
        let r = ObjectReader::strict(raw, path, &[&["amount", "currency"]])?;
        let amount = r.required_decimal("amount")?;
        let currency = match r.optional_str("currency")? {
            Some(code) => {
                CurrencyCode::parse(&code).map_err(|e| e.under(&r.field_path("currency")))?
            }
            None => scope.currency.clone(),
        };
        Money::new(amount, currency).map_err(|e| e.under(path))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Weekly,
    #[default]
    Monthly,
    Quarterly,
    SixMonthly,
    Annually,
    Unknown,
}

impl Tagged for Frequency {
    const VARIANTS: &'static [Self] = &[
        Self::Weekly,
        Self::Monthly,
        Self::Quarterly,
        Self::SixMonthly,
        Self::Annually,
        Self::Unknown,
    ];

    fn tag(self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::SixMonthly => "six_monthly",
            Self::Annually => "annually",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NetGross {
    Net,
    Gross,
    #[default]
    Unknown,
}

impl Tagged for NetGross {
    const VARIANTS: &'static [Self] = &[Self::Net, Self::Gross, Self::Unknown];

    fn tag(self) -> &'static str {
        match self {
            Self::Net => "net",
            Self::Gross => "gross",
            Self::Unknown => "unknown",
        }
    }
}

/// Value-type tags fail with `Validation` rather than a shape error.
fn parse_value_tag<T: Tagged>(tag: &str, what: &str) -> Result<T> {
    T::from_tag(tag).ok_or_else(|| {
        RecordError::validation(
            &FieldPath::root(),
            format!("'{}' is not a valid {}; expected one of: {}", tag, what, T::expected()),
        )
    })
}

impl Frequency {
    pub fn parse(tag: &str) -> Result<Self> {
        parse_value_tag(tag.trim(), "frequency")
    }
}

impl NetGross {
    pub fn parse(tag: &str) -> Result<Self> {
        parse_value_tag(tag.trim(), "net/gross indicator")
    }
}

/// A recurring amount. The amount is optional (the extractor may know a cash
/// flow exists without knowing its size) but positive when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct PeriodicCashFlow {
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_amount"
    )]
    #[schemars(with = "Option<f64>", description = "Amount paid or received each period; positive")]
    periodic_amount: Option<Decimal>,

    #[schemars(description = "How often the amount recurs; defaults to monthly")]
    frequency: Frequency,

    #[schemars(description = "Whether the amount is before (gross) or after (net) tax; defaults to unknown")]
    net_gross: NetGross,
}

impl PeriodicCashFlow {
    pub fn new(
        periodic_amount: Option<Decimal>,
        frequency: Frequency,
        net_gross: NetGross,
    ) -> Result<Self> {
        if let Some(amount) = periodic_amount {
            if amount <= Decimal::ZERO {
                return Err(RecordError::validation(
                    &FieldPath::root(),
                    format!("periodic amount must be positive, got {}", amount),
                ));
            }
        }
        Ok(Self {
            periodic_amount,
            frequency,
            net_gross,
        })
    }

    pub fn monthly(amount: Decimal) -> Result<Self> {
        Self::new(Some(amount), Frequency::Monthly, NetGross::Unknown)
    }

    pub fn periodic_amount(&self) -> Option<Decimal> {
        self.periodic_amount
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn net_gross(&self) -> NetGross {
        self.net_gross
    }
}

impl Decode for PeriodicCashFlow {
    fn decode(raw: &Value, path: &FieldPath, _scope: &DecodeScope) -> Result<Self> {
        let r = ObjectReader::strict(raw, path, &[&["periodic_amount", "frequency", "net_gross"]])?;
        let amount = r.optional_decimal("periodic_amount")?;
        let frequency = match r.optional_str("frequency")? {
            Some(tag) => Frequency::parse(&tag).map_err(|e| e.under(&r.field_path("frequency")))?,
            None => Frequency::default(),
        };
        let net_gross = match r.optional_str("net_gross")? {
            Some(tag) => NetGross::parse(&tag).map_err(|e| e.under(&r.field_path("net_gross")))?,
            None => NetGross::default(),
        };
        PeriodicCashFlow::new(amount, frequency, net_gross)
            .map_err(|e| e.under(&r.field_path("periodic_amount")))
    }
}

/// Outstanding borrowing attached to an asset (e.g. a mortgage on a property).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct Debt {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Outstanding balance")]
    pub balance: Option<Money>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Regular repayment")]
    pub repayment: Option<PeriodicCashFlow>,
}

impl Decode for Debt {
    fn decode(raw: &Value, path: &FieldPath, scope: &DecodeScope) -> Result<Self> {
        let r = ObjectReader::strict(raw, path, &[&["balance", "repayment"]])?;
        Ok(Self {
            balance: r.optional("balance", scope)?,
            repayment: r.optional("repayment", scope)?,
        })
    }
}

/// Whole amounts go out as JSON integers, fractional ones as floats.
fn serialize_amount<S: Serializer>(amount: &Decimal, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if amount.fract().is_zero() {
        if let Some(whole) = amount.to_i64() {
            return serializer.serialize_i64(whole);
        }
    }
    match amount.to_f64() {
        Some(f) => serializer.serialize_f64(f),
        None => serializer.collect_str(amount),
    }
}

fn serialize_optional_amount<S: Serializer>(
    amount: &Option<Decimal>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match amount {
        Some(a) => serialize_amount(a, serializer),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_money_sign() {
        assert!(Money::gbp(Decimal::new(-1, 2)).is_err());
        assert!(Money::gbp(Decimal::ZERO).is_ok());
        let err = Money::gbp(Decimal::new(-1, 2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_currency_code_format() {
        assert!(CurrencyCode::parse("gb").is_err());
        assert!(CurrencyCode::parse("gbp").is_err());
        assert!(CurrencyCode::parse("GBPX").is_err());
        assert_eq!(CurrencyCode::parse(" GBP ").unwrap().as_str(), "GBP");
        assert_eq!(CurrencyCode::default().as_str(), "GBP");
    }

    #[test]
    fn test_cash_flow_defaults() {
        let cf = PeriodicCashFlow::decode(
            &json!({"periodic_amount": 2500}),
            &FieldPath::root(),
            &DecodeScope::default(),
        )
        .unwrap();
        assert_eq!(cf.frequency(), Frequency::Monthly);
        assert_eq!(cf.net_gross(), NetGross::Unknown);
        assert_eq!(
            serde_json::to_value(&cf).unwrap(),
            json!({"periodic_amount": 2500, "frequency": "monthly", "net_gross": "unknown"})
        );
    }

    #[test]
    fn test_cash_flow_rejects_non_positive_and_bad_tags() {
        let scope = DecodeScope::default();
        let path = FieldPath::root().key("income");
        let err = PeriodicCashFlow::decode(&json!({"periodic_amount": 0}), &path, &scope).unwrap_err();
        assert_eq!(err.path().to_string(), "income.periodic_amount");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = PeriodicCashFlow::decode(&json!({"frequency": "fortnightly"}), &path, &scope)
            .unwrap_err();
        assert_eq!(err.path().to_string(), "income.frequency");
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(PeriodicCashFlow::decode(&json!({"net_gross": "Gross "}), &path, &scope).is_err());
    }

    #[test]
    fn test_money_inherits_scope_currency() {
        let scope = DecodeScope::with_currency(CurrencyCode::parse("EUR").unwrap());
        let money = Money::decode(&json!({"amount": "12.50"}), &FieldPath::root(), &scope).unwrap();
        assert_eq!(money.currency().as_str(), "EUR");
        assert_eq!(serde_json::to_value(&money).unwrap(), json!({"amount": 12.5, "currency": "EUR"}));
    }

    #[test]
    fn test_debt_is_strict() {
        let err = Debt::decode(
            &json!({"balance": {"amount": 100}, "rate": 0.05}),
            &FieldPath::root().key("loan"),
            &DecodeScope::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownField);
        assert_eq!(err.path().to_string(), "loan.rate");
    }
}
