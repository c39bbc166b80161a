//! Translation of historical record shapes into the current model.
//!
//! Older extractions stored items as flat literal-typed records (`{"type", "ite": {...}}`
//! with plain integer amounts), bundled retirement goals with the item list, or
//! grouped everything into categorised holdings lists. [`upgrade`] rewrites any
//! of those into current-shape raw values; [`migrate`] then runs them through
//! the strict decoders. Anything that has no home in the current model is
//! dropped and reported as a [`MigrationWarning`].

use crate::balance_sheet::BalanceSheet;
use crate::error::{FieldPath, RecordError, Result};
use crate::profile::{decode_profile_at, IdentityProfile, PROFILE_FIELDS};
use crate::registry::{decode_item_at, FinancialItem, ItemKind, MAX_IID};
use crate::schema::HEADER_FIELDS;
use crate::validation::{json_type, parse_decimal, ObjectReader, Tagged};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;

/// Keys added by client applications for their own bookkeeping.
const CLIENT_KEYS: &[&str] = &["id", "__localId"];

/// Profile fields that used to live alongside the item list.
const PERSON_FIELDS: &[&str] = &[
    "target_retirement_age",
    "target_retirement_income",
    "employment_status",
    "occupation",
];

const HOLDINGS_LISTS: &[&str] = &[
    "current_income",
    "current_expenses",
    "savings_or_investments",
    "pension_holdings",
    "debt_holdings",
    "insurance_policies",
];

const CASHFLOW_ITEM_FIELDS: &[&str] = &[
    "description",
    "inflow",
    "amount",
    "currency",
    "frequency",
    "is_gross",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaShape {
    /// A single current item.
    Item,
    /// A bare list of items, current or flat.
    ItemList,
    /// `{"balance_sheet": [...], "last_iid"?}` with current items.
    BalanceSheet,
    /// A current identity profile, possibly with `postal_code`.
    Profile,
    /// `{"type", "description"?, "currency"?, "ite": {...}}`.
    FlatItem,
    /// Retirement goals and work details next to a list of flat items.
    PersonSummary,
    /// Income, expense and holdings lists, each with its own entry shape.
    HoldingsSummary,
}

impl SchemaShape {
    pub fn is_legacy(self) -> bool {
        matches!(
            self,
            Self::FlatItem | Self::PersonSummary | Self::HoldingsSummary
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::ItemList => "item list",
            Self::BalanceSheet => "balance sheet",
            Self::Profile => "profile",
            Self::FlatItem => "flat item",
            Self::PersonSummary => "person summary",
            Self::HoldingsSummary => "holdings summary",
        }
    }
}

impl fmt::Display for SchemaShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A field that was dropped or reinterpreted on the way to the current model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationWarning {
    pub path: FieldPath,
    pub message: String,
}

impl fmt::Display for MigrationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A record rewritten into current-shape raw values, not yet decoded.
///
/// Each item keeps the path of its source entry so decode errors point back
/// into the legacy document. Items that could not be rewritten carry the error.
#[derive(Debug, Clone, PartialEq)]
pub struct Upgraded {
    pub shape: SchemaShape,
    pub profile: Option<Value>,
    pub items: Vec<(FieldPath, Result<Value>)>,
    pub last_iid: Option<u64>,
    pub warnings: Vec<MigrationWarning>,
}

impl Upgraded {
    /// Strictly decodes every rewritten item, one result per entry.
    pub fn decode_items(&self) -> Vec<Result<FinancialItem>> {
        self.items
            .iter()
            .map(|(path, raw)| match raw {
                Ok(raw) => decode_item_at(raw, path),
                Err(err) => Err(err.clone()),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Migrated {
    pub shape: SchemaShape,
    pub profile: Option<IdentityProfile>,
    pub balance_sheet: BalanceSheet,
    pub warnings: Vec<MigrationWarning>,
}

/// Recognises which historical shape `raw` is in, if any.
pub fn detect_shape(raw: &Value) -> Option<SchemaShape> {
    let map = match raw {
        Value::Array(_) => return Some(SchemaShape::ItemList),
        Value::Object(map) => map,
        _ => return None,
    };

    if map.contains_key("ite") {
        return Some(SchemaShape::FlatItem);
    }
    if map.contains_key("type") {
        return Some(SchemaShape::Item);
    }
    if HOLDINGS_LISTS.iter().any(|key| map.contains_key(*key)) {
        return Some(SchemaShape::HoldingsSummary);
    }
    if let Some(list) = map.get("balance_sheet") {
        let has_person_fields = PERSON_FIELDS.iter().any(|key| map.contains_key(*key));
        let has_flat_items = list
            .as_array()
            .map_or(false, |items| items.iter().any(|item| item.get("ite").is_some()));
        return Some(if has_person_fields || has_flat_items {
            SchemaShape::PersonSummary
        } else {
            SchemaShape::BalanceSheet
        });
    }
    let profile_like = !map.is_empty()
        && map
            .keys()
            .all(|key| key == "postal_code" || PROFILE_FIELDS.contains(&key.as_str()));
    if profile_like {
        return Some(SchemaShape::Profile);
    }
    None
}

/// Rewrites `raw` into current-shape values without decoding them.
pub fn upgrade(raw: &Value) -> Result<Upgraded> {
    let root = FieldPath::root();
    let shape = detect_shape(raw).ok_or_else(|| {
        RecordError::unsupported(
            &root,
            format!(
                "{} is not an item, item list, balance sheet, profile or legacy summary",
                json_type(raw)
            ),
        )
    })?;
    debug!("Detected {} shape", shape);

    let mut upgrader = Upgrader::default();
    let mut upgraded = Upgraded {
        shape,
        profile: None,
        items: Vec::new(),
        last_iid: None,
        warnings: Vec::new(),
    };

    match shape {
        SchemaShape::Item | SchemaShape::FlatItem => {
            let item = upgrader.item(raw, &root);
            upgraded.items.push((root, item));
        }
        SchemaShape::ItemList => {
            let batch = root.key("item");
            if let Value::Array(raws) = raw {
                for (index, item) in raws.iter().enumerate() {
                    let path = batch.index(index);
                    let item = upgrader.item(item, &path);
                    upgraded.items.push((path, item));
                }
            }
        }
        SchemaShape::BalanceSheet => {
            let r = ObjectReader::strict(raw, &root, &[&["balance_sheet", "last_iid"]])?;
            upgraded.items = upgrader.item_list(&r, "balance_sheet")?;
            upgraded.last_iid = r.optional_u64_in("last_iid", 0..=MAX_IID)?;
        }
        SchemaShape::Profile => {
            upgraded.profile = Some(upgrader.profile(raw, &root)?);
        }
        SchemaShape::PersonSummary => {
            let r = ObjectReader::strict(raw, &root, &[PERSON_FIELDS, &["balance_sheet"]])?;
            upgraded.profile = upgrader.person_fields(&r, false)?;
            upgraded.items = upgrader.item_list(&r, "balance_sheet")?;
        }
        SchemaShape::HoldingsSummary => {
            let r = ObjectReader::strict(raw, &root, &[PERSON_FIELDS, HOLDINGS_LISTS])?;
            upgraded.profile = upgrader.person_fields(&r, true)?;
            for list in HOLDINGS_LISTS {
                upgraded.items.extend(upgrader.holdings(&r, list)?);
            }
        }
    }

    upgraded.warnings = upgrader.warnings;
    Ok(upgraded)
}

/// Translates and strictly decodes a record in any supported shape.
///
/// Fails on the first entry that does not decode. Callers that want per-item
/// tolerance use [`upgrade`] and validate the items themselves.
pub fn migrate(raw: &Value) -> Result<Migrated> {
    let upgraded = upgrade(raw)?;

    let profile = upgraded
        .profile
        .as_ref()
        .map(|profile| decode_profile_at(profile, &FieldPath::root()))
        .transpose()?;
    let items = upgraded
        .decode_items()
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
    let balance_sheet = BalanceSheet::with_last_iid(
        items,
        upgraded.last_iid.unwrap_or(0),
        &FieldPath::root().key("balance_sheet"),
    )?;

    if upgraded.shape.is_legacy() {
        info!(
            "Migrated {} with {} items ({} warnings)",
            upgraded.shape,
            balance_sheet.len(),
            upgraded.warnings.len()
        );
    }

    Ok(Migrated {
        shape: upgraded.shape,
        profile,
        balance_sheet,
        warnings: upgraded.warnings,
    })
}

/// Translates a single current or flat item.
pub fn migrate_item(raw: &Value) -> Result<(FinancialItem, Vec<MigrationWarning>)> {
    let root = FieldPath::root();
    let upgraded = upgrade(raw)?;
    if !matches!(upgraded.shape, SchemaShape::Item | SchemaShape::FlatItem) {
        return Err(RecordError::unsupported(
            &root,
            format!("expected a single item, found a {}", upgraded.shape),
        ));
    }
    match upgraded.decode_items().into_iter().next() {
        Some(item) => Ok((item?, upgraded.warnings)),
        None => Err(RecordError::unsupported(&root, "no item found")),
    }
}

/// How a legacy holding type maps onto the current kinds.
#[derive(Debug, Clone, Copy)]
enum Target {
    Exact(ItemKind),
    Nearest(ItemKind),
    NoHome,
}

const SAVINGS_TYPES: &[(&str, Target)] = &[
    ("isa", Target::Exact(ItemKind::Isa)),
    ("savings_account", Target::Exact(ItemKind::SavingsAccount)),
    ("premium_bonds", Target::Exact(ItemKind::PremiumBond)),
    ("current_account", Target::Exact(ItemKind::CurrentAccount)),
    ("deposit_fixed_term", Target::Exact(ItemKind::DepositAccount)),
    ("general_investment_account", Target::Exact(ItemKind::Gia)),
    ("other", Target::Nearest(ItemKind::Gia)),
];

const PENSION_TYPES: &[(&str, Target)] = &[
    ("defined_benefit", Target::Exact(ItemKind::DefinedBenefitPension)),
    ("workplace", Target::Exact(ItemKind::WorkplacePension)),
    ("personal", Target::Exact(ItemKind::PersonalPension)),
    ("sipp", Target::Exact(ItemKind::Sipp)),
    ("ssas", Target::Nearest(ItemKind::PersonalPension)),
    ("state", Target::Exact(ItemKind::StatePension)),
    ("other", Target::Nearest(ItemKind::PersonalPension)),
];

const DEBT_TYPES: &[(&str, Target)] = &[
    ("mortgage", Target::Nearest(ItemKind::MainResidence)),
    ("credit_card", Target::Exact(ItemKind::CreditCard)),
    ("personal_loan", Target::Exact(ItemKind::PersonalLoan)),
    ("student_loan", Target::Exact(ItemKind::StudentLoan)),
    ("auto_loan", Target::Nearest(ItemKind::PersonalLoan)),
    ("other", Target::Nearest(ItemKind::PersonalLoan)),
];

const INSURANCE_TYPES: &[(&str, Target)] = &[
    ("life", Target::Exact(ItemKind::LifeInsurance)),
    ("whole_of_life", Target::Exact(ItemKind::WholeOfLifePolicy)),
    ("critical_illness", Target::NoHome),
    ("income_protection", Target::NoHome),
    ("other", Target::NoHome),
];

/// A v0 `CashflowItem` split into the current cash flow and the item-level
/// fields it used to carry.
struct LegacyCashFlow {
    flow: Value,
    description: Option<String>,
    currency: Option<String>,
    inflow: Option<bool>,
}

#[derive(Default)]
struct Upgrader {
    warnings: Vec<MigrationWarning>,
}

impl Upgrader {
    fn warn(&mut self, path: &FieldPath, message: impl Into<String>) {
        let warning = MigrationWarning {
            path: path.clone(),
            message: message.into(),
        };
        warn!("Migration: {}", warning);
        self.warnings.push(warning);
    }

    fn item_list(
        &mut self,
        r: &ObjectReader<'_>,
        key: &str,
    ) -> Result<Vec<(FieldPath, Result<Value>)>> {
        let list_path = r.field_path(key);
        match r.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(raws)) => Ok(raws
                .iter()
                .enumerate()
                .map(|(index, raw)| {
                    let path = list_path.index(index);
                    let item = self.item(raw, &path);
                    (path, item)
                })
                .collect()),
            Some(other) => Err(RecordError::invalid_field(
                &list_path,
                format!("expected an array, got {}", json_type(other)),
            )),
        }
    }

    /// Rewrites a current or flat item. Unknown top-level keys are kept so the
    /// strict decoder still rejects them.
    fn item(&mut self, raw: &Value, path: &FieldPath) -> Result<Value> {
        let r = ObjectReader::new(raw, path)?;
        let kind = read_legacy_kind(&r)?;

        let mut out = Map::new();
        out.insert("type".to_string(), Value::from(kind.tag()));
        for key in r.keys() {
            let value = match r.get(key) {
                Some(value) => value,
                None => continue,
            };
            match key.as_str() {
                "type" => {}
                "ite" => self.flat_payload(kind, value, &r.field_path("ite"), &mut out)?,
                client if CLIENT_KEYS.contains(&client) => {
                    self.warn(&r.field_path(client), "client-side key dropped")
                }
                other => {
                    out.insert(other.to_string(), value.clone());
                }
            }
        }
        Ok(Value::Object(out))
    }

    fn flat_payload(
        &mut self,
        kind: ItemKind,
        ite: &Value,
        path: &FieldPath,
        out: &mut Map<String, Value>,
    ) -> Result<()> {
        let r = ObjectReader::new(ite, path)?;
        for key in r.keys() {
            let value = match r.get(key) {
                Some(value) => value,
                None => continue,
            };
            let field_path = r.field_path(key);
            let (target, mut translated) = match key.as_str() {
                "investment_value" | "property_value" | "value" => ("value", legacy_money(value)),
                "balance" => ("balance", legacy_money(value)),
                "loan" => ("loan", legacy_debt(value)),
                other => (other, value.clone()),
            };

            if HEADER_FIELDS.contains(&target) || !kind.allows_field(target) {
                self.warn(
                    &field_path,
                    format!("no equivalent on {} items; dropped", kind.tag()),
                );
                continue;
            }
            if out.contains_key(target) {
                self.warn(
                    &field_path,
                    format!("'{}' is already set on the item; dropped", target),
                );
                continue;
            }
            self.zero_amount_unknown(&mut translated, &field_path);
            if let Some(repayment) = translated.get_mut("repayment") {
                self.zero_amount_unknown(repayment, &field_path.key("repayment"));
            }
            out.insert(target.to_string(), translated);
        }
        Ok(())
    }

    /// Old cash flows allowed a zero amount; it now reads as not known.
    fn zero_amount_unknown(&mut self, flow: &mut Value, path: &FieldPath) {
        let zero = flow
            .get("periodic_amount")
            .map_or(false, |amount| parse_decimal(amount).map_or(false, |a| a.is_zero()));
        if let (true, Some(fields)) = (zero, flow.as_object_mut()) {
            fields.remove("periodic_amount");
            self.warn(&path.key("periodic_amount"), "zero amount recorded as unknown");
        }
    }

    fn profile(&mut self, raw: &Value, path: &FieldPath) -> Result<Value> {
        let r = ObjectReader::new(raw, path)?;
        let mut out = Map::new();
        for key in r.keys() {
            let value = match r.get(key) {
                Some(value) => value,
                None => continue,
            };
            match key.as_str() {
                "postal_code" if r.get("postcode").is_some() => self.warn(
                    &r.field_path("postal_code"),
                    "superseded by 'postcode'; dropped",
                ),
                "postal_code" => {
                    out.insert("postcode".to_string(), value.clone());
                }
                "employment_status" => {
                    out.insert(key.clone(), legacy_employment_status(value));
                }
                other => {
                    out.insert(other.to_string(), value.clone());
                }
            }
        }
        Ok(Value::Object(out))
    }

    /// Pulls the retirement and work fields that summaries kept next to their
    /// lists. `None` when none are present.
    fn person_fields(&mut self, r: &ObjectReader<'_>, holdings: bool) -> Result<Option<Value>> {
        let mut out = Map::new();
        for key in PERSON_FIELDS {
            let value = match r.get(key) {
                Some(value) => value,
                None => continue,
            };
            let translated = match *key {
                "employment_status" => legacy_employment_status(value),
                "target_retirement_income" if holdings => {
                    let legacy = self.cash_flow(value, &r.field_path(key))?;
                    if legacy.description.is_some() {
                        self.warn(&r.field_path(key).key("description"), "no equivalent; dropped");
                    }
                    legacy.flow
                }
                _ => value.clone(),
            };
            out.insert(key.to_string(), translated);
        }
        Ok(if out.is_empty() {
            None
        } else {
            Some(Value::Object(out))
        })
    }

    fn holdings(
        &mut self,
        r: &ObjectReader<'_>,
        list: &str,
    ) -> Result<Vec<(FieldPath, Result<Value>)>> {
        let list_path = r.field_path(list);
        let entries = match r.get(list) {
            None => return Ok(Vec::new()),
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                return Err(RecordError::invalid_field(
                    &list_path,
                    format!("expected an array, got {}", json_type(other)),
                ))
            }
        };

        let mut items = Vec::new();
        for (index, raw) in entries.iter().enumerate() {
            let path = list_path.index(index);
            let item = match list {
                "current_income" => self.cash_flow_item(raw, &path, ItemKind::SalaryIncome),
                "current_expenses" => self.cash_flow_item(raw, &path, ItemKind::Expenses),
                "savings_or_investments" => self.savings_holding(raw, &path),
                "pension_holdings" => self.pension_holding(raw, &path),
                "debt_holdings" => self.debt_holding(raw, &path),
                _ => self.insurance_policy(raw, &path),
            };
            match item {
                Ok(None) => {}
                Ok(Some(item)) => items.push((path, Ok(item))),
                Err(err) => items.push((path, Err(err))),
            }
        }
        Ok(items)
    }

    fn cash_flow(&mut self, raw: &Value, path: &FieldPath) -> Result<LegacyCashFlow> {
        let r = ObjectReader::strict(raw, path, &[CASHFLOW_ITEM_FIELDS])?;
        let mut flow = Map::new();

        if let Some(amount) = r.get("amount") {
            if parse_decimal(amount).map_or(false, |a| a.is_zero()) {
                self.warn(&r.field_path("amount"), "zero amount recorded as unknown");
            } else {
                flow.insert("periodic_amount".to_string(), amount.clone());
            }
        }
        if let Some(frequency) = r.get("frequency") {
            flow.insert("frequency".to_string(), frequency.clone());
        }
        // An omitted `is_gross` meant gross; an explicit null meant unknown.
        let net_gross = match raw.get("is_gross") {
            None | Some(Value::Bool(true)) => "gross",
            Some(Value::Bool(false)) => "net",
            Some(Value::Null) => "unknown",
            Some(other) => {
                return Err(RecordError::invalid_field(
                    &r.field_path("is_gross"),
                    format!("expected a boolean, got {}", json_type(other)),
                ))
            }
        };
        flow.insert("net_gross".to_string(), Value::from(net_gross));

        Ok(LegacyCashFlow {
            flow: Value::Object(flow),
            description: r.optional_str("description")?,
            currency: r.optional_str("currency")?,
            inflow: r.optional_bool("inflow")?,
        })
    }

    /// A cash flow nested inside a holding; only the flow itself survives.
    fn nested_cash_flow(&mut self, raw: &Value, path: &FieldPath) -> Result<Value> {
        let legacy = self.cash_flow(raw, path)?;
        if legacy.description.is_some() {
            self.warn(&path.key("description"), "no equivalent; dropped");
        }
        Ok(legacy.flow)
    }

    /// `{description, amount, currency}` becomes Money; its description has no home.
    fn value_with_currency(&mut self, raw: &Value, path: &FieldPath) -> Result<(Value, Option<String>)> {
        let r = ObjectReader::strict(raw, path, &[&["description", "amount", "currency"]])?;
        if r.optional_str("description")?.is_some() {
            self.warn(&r.field_path("description"), "no equivalent; dropped");
        }
        let currency = r.optional_str("currency")?;
        let mut money = Map::new();
        if let Some(amount) = r.get("amount") {
            money.insert("amount".to_string(), amount.clone());
        }
        if let Some(code) = &currency {
            money.insert("currency".to_string(), Value::from(code.as_str()));
        }
        Ok((Value::Object(money), currency))
    }

    fn cash_flow_item(&mut self, raw: &Value, path: &FieldPath, kind: ItemKind) -> Result<Option<Value>> {
        let legacy = self.cash_flow(raw, path)?;
        let expected_inflow = kind != ItemKind::Expenses;
        if legacy.inflow.map_or(false, |inflow| inflow != expected_inflow) {
            self.warn(
                &path.key("inflow"),
                format!("direction disagrees with its list; recorded as {}", kind.tag()),
            );
        }
        let field = if kind == ItemKind::Expenses {
            "expenditure"
        } else {
            "income"
        };
        Ok(Some(holding_item(
            kind,
            legacy.description,
            legacy.currency,
            vec![(field, legacy.flow)],
        )))
    }

    fn savings_holding(&mut self, raw: &Value, path: &FieldPath) -> Result<Option<Value>> {
        let r = ObjectReader::strict(raw, path, &[&["description", "type", "value", "contribution"]])?;
        let kind = match self.resolve_type(&r, SAVINGS_TYPES)? {
            Some(kind) => kind,
            None => return Ok(None),
        };
        let mut fields = Vec::new();
        let mut currency = None;
        if let Some(value) = r.get("value") {
            let (money, code) = self.value_with_currency(value, &r.field_path("value"))?;
            currency = code;
            fields.push(("value", money));
        }
        if let Some(contribution) = r.get("contribution") {
            fields.push((
                "contribution",
                self.nested_cash_flow(contribution, &r.field_path("contribution"))?,
            ));
        }
        Ok(Some(holding_item(kind, r.optional_str("description")?, currency, fields)))
    }

    fn pension_holding(&mut self, raw: &Value, path: &FieldPath) -> Result<Option<Value>> {
        let r = ObjectReader::strict(raw, path, &[&["description", "type", "value", "contribution"]])?;
        let kind = match self.resolve_type(&r, PENSION_TYPES)? {
            Some(kind) => kind,
            None => return Ok(None),
        };
        let description = r.optional_str("description")?;

        if kind == ItemKind::StatePension {
            for key in ["value", "contribution"] {
                if r.get(key).is_some() {
                    self.warn(&r.field_path(key), "state pensions carry no pot; dropped");
                }
            }
            return Ok(Some(holding_item(
                kind,
                description,
                None,
                vec![("pension", json!({}))],
            )));
        }

        let mut fields = Vec::new();
        let mut currency = None;
        if let Some(value) = r.get("value") {
            let (money, code) = self.value_with_currency(value, &r.field_path("value"))?;
            currency = code;
            fields.push(("value", money));
        }
        if let Some(contribution) = r.get("contribution") {
            fields.push((
                "contribution",
                self.nested_cash_flow(contribution, &r.field_path("contribution"))?,
            ));
        }
        Ok(Some(holding_item(kind, description, currency, fields)))
    }

    fn debt_holding(&mut self, raw: &Value, path: &FieldPath) -> Result<Option<Value>> {
        let r = ObjectReader::strict(raw, path, &[&["description", "type", "balance", "repayment"]])?;
        let kind = match self.resolve_type(&r, DEBT_TYPES)? {
            Some(kind) => kind,
            None => return Ok(None),
        };
        let mut fields = Vec::new();
        let mut currency = None;
        if let Some(balance) = r.get("balance") {
            let (money, code) = self.value_with_currency(balance, &r.field_path("balance"))?;
            currency = code;
            fields.push(("balance", money));
        }
        if let Some(repayment) = r.get("repayment") {
            fields.push((
                "repayment",
                self.nested_cash_flow(repayment, &r.field_path("repayment"))?,
            ));
        }
        if kind.allows_field("loan") {
            self.warn(r.path(), "property value unknown; only the loan was recorded");
            let loan: Map<String, Value> = fields
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect();
            fields = vec![("loan", Value::Object(loan))];
        }
        Ok(Some(holding_item(kind, r.optional_str("description")?, currency, fields)))
    }

    fn insurance_policy(&mut self, raw: &Value, path: &FieldPath) -> Result<Option<Value>> {
        let r = ObjectReader::strict(
            raw,
            path,
            &[&["description", "type", "coverage_amount", "premium"]],
        )?;
        let kind = match self.resolve_type(&r, INSURANCE_TYPES)? {
            Some(kind) => kind,
            None => return Ok(None),
        };
        let mut fields = Vec::new();
        let mut currency = None;
        if let Some(cover) = r.get("coverage_amount") {
            let (money, code) = self.value_with_currency(cover, &r.field_path("coverage_amount"))?;
            currency = code;
            fields.push(("cover", money));
        }
        if let Some(premium) = r.get("premium") {
            fields.push(("premium", self.nested_cash_flow(premium, &r.field_path("premium"))?));
        }
        Ok(Some(holding_item(kind, r.optional_str("description")?, currency, fields)))
    }

    /// Maps a holding's `type` through `table`. An absent type counts as
    /// `other`; a type outside the table is a shape error.
    fn resolve_type(
        &mut self,
        r: &ObjectReader<'_>,
        table: &[(&str, Target)],
    ) -> Result<Option<ItemKind>> {
        let tag = r
            .optional_str("type")?
            .unwrap_or_else(|| "other".to_string());
        let path = r.field_path("type");
        match table.iter().find(|(legacy, _)| *legacy == tag) {
            Some((_, Target::Exact(kind))) => Ok(Some(*kind)),
            Some((_, Target::Nearest(kind))) => {
                self.warn(
                    &path,
                    format!("'{}' has no exact equivalent; recorded as {}", tag, kind.tag()),
                );
                Ok(Some(*kind))
            }
            Some((_, Target::NoHome)) => {
                self.warn(
                    r.path(),
                    format!("'{}' has no equivalent item kind; entry dropped", tag),
                );
                Ok(None)
            }
            None => {
                let expected: Vec<&str> = table.iter().map(|(legacy, _)| *legacy).collect();
                Err(RecordError::invalid_field(
                    &path,
                    format!("'{}' is not one of: {}", tag, expected.join(", ")),
                ))
            }
        }
    }
}

fn read_legacy_kind(r: &ObjectReader<'_>) -> Result<ItemKind> {
    let found = r.get("type").map(|value| match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    });
    let tag = match found.as_deref() {
        Some("IHT_scheme") => Some("iht_scheme"),
        other => other,
    };
    tag.and_then(ItemKind::from_tag)
        .ok_or_else(|| RecordError::UnknownItemKind {
            path: r.field_path("type"),
            found: found.clone(),
        })
}

/// Old amounts were bare integers.
fn legacy_money(value: &Value) -> Value {
    match value {
        Value::Number(_) | Value::String(_) => json!({ "amount": value }),
        other => other.clone(),
    }
}

fn legacy_debt(value: &Value) -> Value {
    let mut debt = value.clone();
    if let Some(balance) = debt.get_mut("balance") {
        *balance = legacy_money(balance);
    }
    debt
}

fn legacy_employment_status(value: &Value) -> Value {
    match value.as_str().map(str::trim) {
        Some("retried") => Value::from("retired"),
        _ => value.clone(),
    }
}

fn holding_item(
    kind: ItemKind,
    description: Option<String>,
    currency: Option<String>,
    fields: Vec<(&str, Value)>,
) -> Value {
    let mut item = Map::new();
    item.insert("type".to_string(), Value::from(kind.tag()));
    if let Some(description) = description {
        item.insert("description".to_string(), Value::from(description));
    }
    if let Some(currency) = currency {
        item.insert("currency".to_string(), Value::from(currency));
    }
    for (key, value) in fields {
        item.insert(key.to_string(), value);
    }
    Value::Object(item)
}
