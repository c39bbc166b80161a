use crate::error::Result;
use crate::validation::{DecodeScope, ObjectReader};
use crate::values::{CurrencyCode, Debt, Money, PeriodicCashFlow};
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::{Map, Value};

/// Fields every item carries regardless of kind.
pub const HEADER_FIELDS: &[&str] = &["type", "iid", "description", "currency"];

/// Kind-specific fields of an item, decoded from the same flat object as the header.
pub trait Payload: Sized {
    const FIELDS: &'static [&'static str];

    fn read(reader: &ObjectReader<'_>, scope: &DecodeScope) -> Result<Self>;
}

/// An item of one kind: the shared header plus that kind's payload.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct Item<P> {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(
        description = "Item identifier (small integer), unique within the balance sheet. Reuse the iid from a previous version of the balance sheet when the item is the same; otherwise leave it out."
    )]
    pub iid: Option<u64>,

    #[schemars(
        description = "User-provided description of the item (at most 80 characters). Defaults to a readable name for the item type."
    )]
    pub description: String,

    #[schemars(description = "ISO 4217 currency code; defaults to GBP")]
    pub currency: CurrencyCode,

    #[serde(flatten)]
    pub payload: P,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct Income {
    #[schemars(description = "Regular income cash flow")]
    pub income: PeriodicCashFlow,
}

impl Payload for Income {
    const FIELDS: &'static [&'static str] = &["income"];

    fn read(r: &ObjectReader<'_>, scope: &DecodeScope) -> Result<Self> {
        Ok(Self {
            income: r.required("income", scope)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct Expenses {
    #[schemars(description = "Regular expenditure")]
    pub expenditure: PeriodicCashFlow,
}

impl Payload for Expenses {
    const FIELDS: &'static [&'static str] = &["expenditure"];

    fn read(r: &ObjectReader<'_>, scope: &DecodeScope) -> Result<Self> {
        Ok(Self {
            expenditure: r.required("expenditure", scope)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct Investment {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Current value of the holding")]
    pub value: Option<Money>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Regular contribution to the investment")]
    pub contribution: Option<PeriodicCashFlow>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Regular income from the investment")]
    pub income: Option<PeriodicCashFlow>,
}

impl Payload for Investment {
    const FIELDS: &'static [&'static str] = &["value", "contribution", "income"];

    fn read(r: &ObjectReader<'_>, scope: &DecodeScope) -> Result<Self> {
        Ok(Self {
            value: r.optional("value", scope)?,
            contribution: r.optional("contribution", scope)?,
            income: r.optional("income", scope)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct BuyToLet {
    #[schemars(description = "Regular rental income from the property")]
    pub rental_income: PeriodicCashFlow,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Market value of the property")]
    pub value: Option<Money>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Mortgage or other borrowing secured on the property")]
    pub loan: Option<Debt>,
}

impl Payload for BuyToLet {
    const FIELDS: &'static [&'static str] = &["rental_income", "value", "loan"];

    fn read(r: &ObjectReader<'_>, scope: &DecodeScope) -> Result<Self> {
        Ok(Self {
            rental_income: r.required("rental_income", scope)?,
            value: r.optional("value", scope)?,
            loan: r.optional("loan", scope)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct Loan {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Outstanding balance")]
    pub balance: Option<Money>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Regular repayment")]
    pub repayment: Option<PeriodicCashFlow>,
}

impl Payload for Loan {
    const FIELDS: &'static [&'static str] = &["balance", "repayment"];

    fn read(r: &ObjectReader<'_>, scope: &DecodeScope) -> Result<Self> {
        Ok(Self {
            balance: r.optional("balance", scope)?,
            repayment: r.optional("repayment", scope)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct Property {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Market value")]
    pub value: Option<Money>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Borrowing secured on the asset")]
    pub loan: Option<Debt>,
}

impl Payload for Property {
    const FIELDS: &'static [&'static str] = &["value", "loan"];

    fn read(r: &ObjectReader<'_>, scope: &DecodeScope) -> Result<Self> {
        Ok(Self {
            value: r.optional("value", scope)?,
            loan: r.optional("loan", scope)?,
        })
    }
}

/// Pot-based pensions behave like investments with an optional employer contribution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct NonStatePension {
    #[serde(flatten)]
    pub pot: Investment,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Regular contribution paid by the employer")]
    pub employer_contribution: Option<PeriodicCashFlow>,
}

impl Payload for NonStatePension {
    const FIELDS: &'static [&'static str] =
        &["value", "contribution", "income", "employer_contribution"];

    fn read(r: &ObjectReader<'_>, scope: &DecodeScope) -> Result<Self> {
        Ok(Self {
            pot: Investment::read(r, scope)?,
            employer_contribution: r.optional("employer_contribution", scope)?,
        })
    }
}

/// State pensions and annuities have no pot, only the income they pay.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct PensionIncome {
    #[schemars(description = "Expected pension cash flow")]
    pub pension: PeriodicCashFlow,
}

impl Payload for PensionIncome {
    const FIELDS: &'static [&'static str] = &["pension"];

    fn read(r: &ObjectReader<'_>, scope: &DecodeScope) -> Result<Self> {
        Ok(Self {
            pension: r.required("pension", scope)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct Insurance {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Sum assured")]
    pub cover: Option<Money>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Regular premium")]
    pub premium: Option<PeriodicCashFlow>,
}

impl Payload for Insurance {
    const FIELDS: &'static [&'static str] = &["cover", "premium"];

    fn read(r: &ObjectReader<'_>, scope: &DecodeScope) -> Result<Self> {
        Ok(Self {
            cover: r.optional("cover", scope)?,
            premium: r.optional("premium", scope)?,
        })
    }
}

/// Turns a schemars root schema into the self-contained form structured-output
/// LLM APIs accept: no `$schema`, no `definitions`, every `$ref` inlined.
pub fn clean_schema(root: schemars::schema::RootSchema) -> serde_json::Result<Value> {
    let mut value = serde_json::to_value(root)?;
    let definitions = match &mut value {
        Value::Object(map) => {
            map.remove("$schema");
            match map.remove("definitions") {
                Some(Value::Object(defs)) => defs,
                _ => Map::new(),
            }
        }
        _ => Map::new(),
    };
    inline_refs(&mut value, &definitions);
    Ok(value)
}

fn inline_refs(value: &mut Value, definitions: &Map<String, Value>) {
    match value {
        Value::Object(map) => {
            let target = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .and_then(|name| definitions.get(name))
                .cloned();
            if let Some(mut resolved) = target {
                inline_refs(&mut resolved, definitions);
                map.remove("$ref");
                if let Value::Object(fields) = resolved {
                    for (k, v) in fields {
                        map.entry(k).or_insert(v);
                    }
                }
            }
            for child in map.values_mut() {
                inline_refs(child, definitions);
            }
        }
        Value::Array(items) => {
            for child in items {
                inline_refs(child, definitions);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance_sheet::BalanceSheet;
    use crate::profile::IdentityProfile;

    #[test]
    fn test_schema_generation() {
        let schema_json = BalanceSheet::schema_as_json().unwrap();
        assert!(schema_json.contains("balance_sheet"));
        assert!(schema_json.contains("current_account"));
        assert!(schema_json.contains("periodic_amount"));

        let profile_json = IdentityProfile::schema_as_json().unwrap();
        assert!(profile_json.contains("target_retirement_age"));
    }

    #[test]
    fn test_llm_schema_has_no_refs() {
        let schema = BalanceSheet::llm_response_schema().unwrap();
        let text = schema.to_string();
        assert!(!text.contains("$ref"));
        assert!(!text.contains("definitions"));
        assert!(!text.contains("$schema"));
        assert!(text.contains("rental_income"));
    }
}
