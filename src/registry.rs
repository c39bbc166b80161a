//! The closed set of financial item kinds.
//!
//! `item_registry!` is the single extension point: one row per kind names its
//! variant, wire tag, group, payload shape and default description. The row
//! generates the `ItemKind` tag, the `FinancialItem` variant, the registry table
//! entry and the decode dispatch, so a new kind needs no edits anywhere else.

use crate::error::{FieldPath, RecordError, Result};
use crate::schema::{
    BuyToLet, Expenses, Income, Insurance, Investment, Item, Loan, NonStatePension, Payload,
    PensionIncome, Property, HEADER_FIELDS,
};
use crate::validation::{DecodeScope, ObjectReader, Tagged};
use crate::values::CurrencyCode;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const MAX_DESCRIPTION_CHARS: usize = 80;

/// Largest identifier an item may carry. Leaves room above it so issuing
/// fresh ids can never overflow.
pub const MAX_IID: u64 = u32::MAX as u64;

/// Coarse grouping used for presentation. Declaration order is display order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ItemGroup {
    Income,
    Expense,
    Investment,
    Property,
    Debt,
    Pension,
    Insurance,
}

impl ItemGroup {
    pub fn label(self) -> &'static str {
        match self {
            Self::Income => "Income",
            Self::Expense => "Expenses",
            Self::Investment => "Investments",
            Self::Property => "Property",
            Self::Debt => "Debts",
            Self::Pension => "Pensions",
            Self::Insurance => "Insurance",
        }
    }
}

/// Which payload struct a kind carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadShape {
    Income,
    Expenses,
    Investment,
    BuyToLet,
    Loan,
    Property,
    NonStatePension,
    PensionIncome,
    Insurance,
}

/// One row of the registry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSpec {
    pub kind: ItemKind,
    pub tag: &'static str,
    pub group: ItemGroup,
    pub shape: PayloadShape,
    pub default_description: &'static str,
    pub payload_fields: &'static [&'static str],
}

macro_rules! item_registry {
    ($( $variant:ident => $tag:literal, $group:ident, $shape:ident, $description:literal; )+) => {
        /// Discriminator of a [`FinancialItem`].
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
            JsonSchema,
        )]
        pub enum ItemKind {
            $( #[serde(rename = $tag)] $variant, )+
        }

        /// Registry table, in `ItemKind` declaration order.
        pub const KIND_TABLE: &[KindSpec] = &[
            $(
                KindSpec {
                    kind: ItemKind::$variant,
                    tag: $tag,
                    group: ItemGroup::$group,
                    shape: PayloadShape::$shape,
                    default_description: $description,
                    payload_fields: <$shape as Payload>::FIELDS,
                },
            )+
        ];

        impl Tagged for ItemKind {
            const VARIANTS: &'static [Self] = &[ $( ItemKind::$variant, )+ ];

            fn tag(self) -> &'static str {
                self.spec().tag
            }
        }

        /// A validated financial item. The variant fixes the payload shape, so an
        /// item can never carry fields that belong to another kind.
        #[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
        #[serde(tag = "type")]
        pub enum FinancialItem {
            $( #[serde(rename = $tag)] $variant(Item<$shape>), )+
        }

        impl FinancialItem {
            pub fn kind(&self) -> ItemKind {
                match self {
                    $( FinancialItem::$variant(_) => ItemKind::$variant, )+
                }
            }

            pub fn iid(&self) -> Option<u64> {
                match self {
                    $( FinancialItem::$variant(item) => item.iid, )+
                }
            }

            pub fn set_iid(&mut self, iid: Option<u64>) {
                match self {
                    $( FinancialItem::$variant(item) => item.iid = iid, )+
                }
            }

            pub fn description(&self) -> &str {
                match self {
                    $( FinancialItem::$variant(item) => &item.description, )+
                }
            }

            pub fn currency(&self) -> &CurrencyCode {
                match self {
                    $( FinancialItem::$variant(item) => &item.currency, )+
                }
            }
        }

        fn decode_kind(
            kind: ItemKind,
            raw: &Value,
            path: &FieldPath,
        ) -> Result<FinancialItem> {
            match kind {
                $( ItemKind::$variant => decode_as::<$shape>(kind, raw, path).map(FinancialItem::$variant), )+
            }
        }
    };
}

item_registry! {
    SalaryIncome => "salary_income", Income, Income, "Salary";
    SideHustleIncome => "side_hustle_income", Income, Income, "Side Hustle Income";
    SelfEmploymentIncome => "self_employment_income", Income, Income, "Self Employment Income";
    Expenses => "expenses", Expense, Expenses, "Expenses";
    CurrentAccount => "current_account", Investment, Investment, "Current Account";
    DepositAccount => "deposit_account", Investment, Investment, "Deposit Account";
    Gia => "gia", Investment, Investment, "General Investment Account";
    Isa => "isa", Investment, Investment, "ISA";
    PremiumBond => "premium_bond", Investment, Investment, "Premium Bonds";
    SavingsAccount => "savings_account", Investment, Investment, "Savings Account";
    UniFeesSavingsPlan => "uni_fees_savings_plan", Investment, Investment, "University Fees Savings Plan";
    Vct => "vct", Investment, Investment, "Venture Capital Trust";
    Eis => "eis", Investment, Investment, "Enterprise Investment Scheme";
    IhtScheme => "iht_scheme", Investment, Investment, "Inheritance Tax Scheme";
    Sipp => "sipp", Investment, NonStatePension, "SIPP";
    CreditCard => "credit_card", Debt, Loan, "Credit Card";
    PersonalLoan => "personal_loan", Debt, Loan, "Personal Loan";
    StudentLoan => "student_loan", Debt, Loan, "Student Loan";
    MainResidence => "main_residence", Property, Property, "Main Residence";
    HolidayHome => "holiday_home", Property, Property, "Holiday Home";
    BuyToLet => "buy_to_let", Property, BuyToLet, "Buy To Let Property";
    Car => "car", Property, Property, "Car";
    Collectable => "collectable", Property, Property, "Collectable";
    OtherValuableItem => "other_valuable_item", Property, Property, "Other Valuable Item";
    WorkplacePension => "workplace_pension", Pension, NonStatePension, "Workplace Pension";
    DefinedBenefitPension => "defined_benefit_pension", Pension, NonStatePension, "Defined Benefit Pension";
    PersonalPension => "personal_pension", Pension, NonStatePension, "Personal Pension";
    StatePension => "state_pension", Pension, PensionIncome, "State Pension";
    AnnuityPension => "annuity_pension", Pension, PensionIncome, "Annuity";
    LifeInsurance => "life_insurance", Insurance, Insurance, "Life Insurance";
    WholeOfLifePolicy => "whole_of_life_policy", Insurance, Insurance, "Whole Of Life Policy";
}

impl ItemKind {
    pub fn spec(self) -> &'static KindSpec {
        &KIND_TABLE[self as usize]
    }

    pub fn group(self) -> ItemGroup {
        self.spec().group
    }

    pub fn shape(self) -> PayloadShape {
        self.spec().shape
    }

    pub fn default_description(self) -> &'static str {
        self.spec().default_description
    }

    /// Every field name an item of this kind may carry, header included.
    pub fn allows_field(self, field: &str) -> bool {
        HEADER_FIELDS.contains(&field) || self.spec().payload_fields.contains(&field)
    }
}

impl FinancialItem {
    pub fn group(&self) -> ItemGroup {
        self.kind().group()
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Decodes one raw record into its typed variant.
///
/// The discriminator is read first: a missing or unregistered `type` fails with
/// `UnknownItemKind` before any payload field is looked at.
pub fn decode_item(raw: &Value) -> Result<FinancialItem> {
    decode_item_at(raw, &FieldPath::root())
}

pub fn decode_item_str(raw: &str) -> Result<FinancialItem> {
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        RecordError::invalid_field(&FieldPath::root(), format!("malformed JSON: {}", e))
    })?;
    decode_item(&value)
}

pub(crate) fn decode_item_at(raw: &Value, path: &FieldPath) -> Result<FinancialItem> {
    let reader = ObjectReader::new(raw, path)?;
    let kind = read_kind(&reader)?;
    decode_kind(kind, raw, path)
}

fn read_kind(reader: &ObjectReader<'_>) -> Result<ItemKind> {
    let path = reader.field_path("type");
    let tag = match reader.get("type") {
        None => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(other) => Some(other.to_string()),
    };
    tag.as_deref()
        .and_then(ItemKind::from_tag)
        .ok_or(RecordError::UnknownItemKind { path, found: tag })
}

fn decode_as<P: Payload>(kind: ItemKind, raw: &Value, path: &FieldPath) -> Result<Item<P>> {
    let r = ObjectReader::strict(raw, path, &[HEADER_FIELDS, P::FIELDS])?;

    let iid = r.optional_u64_in("iid", 0..=MAX_IID)?;
    let currency = match r.optional_str("currency")? {
        Some(code) => CurrencyCode::parse(&code).map_err(|e| e.under(&r.field_path("currency")))?,
        None => CurrencyCode::default(),
    };
    let description = r
        .optional_str_max("description", MAX_DESCRIPTION_CHARS)?
        .unwrap_or_else(|| kind.default_description().to_string());

    let scope = DecodeScope::with_currency(currency.clone());
    let payload = P::read(&r, &scope)?;

    debug!("Decoded {} item at {} (iid {:?})", kind.tag(), path, iid);

    Ok(Item {
        iid,
        description,
        currency,
        payload,
    })
}

impl<'de> Deserialize<'de> for FinancialItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        decode_item(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::values::Frequency;
    use rust_decimal::Decimal;
    use serde_json::json;

    #[test]
    fn test_table_matches_declaration_order() {
        for (index, spec) in KIND_TABLE.iter().enumerate() {
            assert_eq!(spec.kind as usize, index);
            assert_eq!(ItemKind::from_tag(spec.tag), Some(spec.kind));
        }
        assert_eq!(ItemKind::VARIANTS.len(), KIND_TABLE.len());
    }

    #[test]
    fn test_current_account_defaults() {
        let item = decode_item(&json!({
            "type": "current_account",
            "value": {"amount": 1500, "currency": "GBP"}
        }))
        .unwrap();

        assert_eq!(item.kind(), ItemKind::CurrentAccount);
        assert_eq!(item.description(), "Current Account");
        assert_eq!(item.iid(), None);
        assert_eq!(item.currency().as_str(), "GBP");
        match &item {
            FinancialItem::CurrentAccount(account) => {
                let value = account.payload.value.as_ref().unwrap();
                assert_eq!(value.amount(), Decimal::from(1500));
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_salary_default_description_and_trim() {
        let item = decode_item(&json!({
            "type": " salary_income ",
            "description": "   ",
            "income": {"periodic_amount": 4000, "frequency": "annually", "net_gross": "gross"}
        }))
        .unwrap();
        assert_eq!(item.description(), "Salary");
        match item {
            FinancialItem::SalaryIncome(salary) => {
                assert_eq!(salary.payload.income.frequency(), Frequency::Annually)
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_missing_or_unknown_discriminator() {
        let err = decode_item(&json!({"value": {"amount": 1}})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownItemKind);

        let err = decode_item(&json!({"type": "yacht"})).unwrap_err();
        assert_eq!(
            err,
            RecordError::UnknownItemKind {
                path: FieldPath::root().key("type"),
                found: Some("yacht".to_string()),
            }
        );

        let err = decode_item(&json!({"type": 7})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownItemKind);
    }

    #[test]
    fn test_fields_of_another_kind_are_rejected() {
        let err = decode_item(&json!({
            "type": "credit_card",
            "rental_income": {"periodic_amount": 900}
        }))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownField);
        assert_eq!(err.path().to_string(), "rental_income");
    }

    #[test]
    fn test_required_payload_field() {
        let err = decode_item(&json!({"type": "state_pension"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingOrInvalidField);
        assert_eq!(err.path().to_string(), "pension");
    }

    #[test]
    fn test_description_limit() {
        let err = decode_item(&json!({"type": "isa", "description": "x".repeat(81)})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingOrInvalidField);
        assert_eq!(err.path().to_string(), "description");
    }

    #[test]
    fn test_money_inherits_item_currency() {
        let item = decode_item(&json!({
            "type": "main_residence",
            "currency": "EUR",
            "value": {"amount": 350000},
            "loan": {"balance": {"amount": 120000}}
        }))
        .unwrap();
        let json = item.to_value().unwrap();
        assert_eq!(json["value"]["currency"], "EUR");
        assert_eq!(json["loan"]["balance"]["currency"], "EUR");
    }

    #[test]
    fn test_serialized_form_carries_type_tag() {
        let item = decode_item(&json!({
            "type": "workplace_pension",
            "iid": 4,
            "value": {"amount": 82000},
            "employer_contribution": {"periodic_amount": 300}
        }))
        .unwrap();
        assert_eq!(
            item.to_value().unwrap(),
            json!({
                "type": "workplace_pension",
                "iid": 4,
                "description": "Workplace Pension",
                "currency": "GBP",
                "value": {"amount": 82000, "currency": "GBP"},
                "employer_contribution": {
                    "periodic_amount": 300,
                    "frequency": "monthly",
                    "net_gross": "unknown"
                }
            })
        );
    }

    #[test]
    fn test_deserialize_goes_through_validation() {
        let ok: FinancialItem =
            serde_json::from_str(r#"{"type": "car", "value": {"amount": 9000}}"#).unwrap();
        assert_eq!(ok.kind(), ItemKind::Car);

        let bad = serde_json::from_str::<FinancialItem>(r#"{"type": "car", "colour": "red"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_malformed_json_text() {
        let err = decode_item_str("{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingOrInvalidField);
    }
}
