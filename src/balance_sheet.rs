use crate::error::{FieldPath, RecordError, Result};
use crate::profile::IdentityProfile;
use crate::reconciliation::{reconcile_raw, ChangeReport, ReconcileOptions};
use crate::registry::{decode_item_at, FinancialItem, ItemGroup, MAX_IID};
use crate::schema::clean_schema;
use crate::validation::{json_type, ObjectReader};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// A person's financial inventory: an ordered list of items, unique by `iid`
/// among the items that carry one.
///
/// `last_iid` is the high-water mark of issued identifiers. It survives removals,
/// so an id handed out once is never handed out again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct BalanceSheet {
    #[serde(rename = "balance_sheet")]
    #[schemars(description = "List of personal assets, liabilities, incomes and expenses")]
    items: Vec<FinancialItem>,

    #[serde(skip_serializing_if = "is_zero")]
    #[schemars(description = "Highest iid ever issued for this balance sheet. Leave out.")]
    last_iid: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl BalanceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a sheet, rejecting duplicate or out-of-range identifiers.
    pub fn from_items(items: Vec<FinancialItem>) -> Result<Self> {
        Self::with_last_iid(items, 0, &FieldPath::root().key("balance_sheet"))
    }

    pub(crate) fn with_last_iid(items: Vec<FinancialItem>, last_iid: u64, path: &FieldPath) -> Result<Self> {
        let mut seen: HashMap<u64, usize> = HashMap::new();
        if last_iid > MAX_IID {
            return Err(RecordError::invalid_field(
                &FieldPath::root().key("last_iid"),
                format!("must be between 0 and {}, got {}", MAX_IID, last_iid),
            ));
        }
        for (index, item) in items.iter().enumerate() {
            if let Some(iid) = item.iid() {
                if iid > MAX_IID {
                    return Err(RecordError::invalid_field(
                        &path.index(index).key("iid"),
                        format!("must be between 0 and {}, got {}", MAX_IID, iid),
                    ));
                }
                if let Some(first) = seen.insert(iid, index) {
                    return Err(RecordError::invalid_field(
                        &path.index(index).key("iid"),
                        format!("duplicate iid {} (already used by item {})", iid, first),
                    ));
                }
            }
        }
        let mut sheet = Self { items, last_iid };
        sheet.last_iid = sheet.last_iid.max(sheet.max_iid().unwrap_or(0));
        Ok(sheet)
    }

    pub(crate) fn from_reconciled(items: Vec<FinancialItem>, last_iid: u64) -> Self {
        Self { items, last_iid }
    }

    pub fn items(&self) -> &[FinancialItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<FinancialItem> {
        self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FinancialItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, iid: u64) -> Option<&FinancialItem> {
        self.items.iter().find(|item| item.iid() == Some(iid))
    }

    pub fn contains_iid(&self, iid: u64) -> bool {
        self.get(iid).is_some()
    }

    /// Largest iid currently present.
    pub fn max_iid(&self) -> Option<u64> {
        self.items.iter().filter_map(FinancialItem::iid).max()
    }

    pub fn last_iid(&self) -> u64 {
        self.last_iid.max(self.max_iid().unwrap_or(0))
    }

    /// The identifier the next new item will receive.
    pub fn next_iid(&self) -> u64 {
        self.last_iid() + 1
    }

    /// Retires an item. Its iid stays reserved.
    pub fn remove(&mut self, iid: u64) -> Option<FinancialItem> {
        self.last_iid = self.last_iid();
        let position = self.items.iter().position(|item| item.iid() == Some(iid))?;
        Some(self.items.remove(position))
    }

    /// Items by group in display order; empty groups are left out.
    pub fn grouped(&self) -> BTreeMap<ItemGroup, Vec<&FinancialItem>> {
        let mut groups: BTreeMap<ItemGroup, Vec<&FinancialItem>> = BTreeMap::new();
        for item in &self.items {
            groups.entry(item.group()).or_default().push(item);
        }
        groups
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(BalanceSheet)
    }

    pub fn schema_as_json() -> serde_json::Result<String> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }

    /// Schema in the inlined form structured-output LLM endpoints expect.
    pub fn llm_response_schema() -> serde_json::Result<Value> {
        clean_schema(Self::generate_json_schema())
    }
}

impl<'a> IntoIterator for &'a BalanceSheet {
    type Item = &'a FinancialItem;
    type IntoIter = std::slice::Iter<'a, FinancialItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Decodes `{"balance_sheet": [...], "last_iid": n}`. Unlike batch validation
/// this is all-or-nothing: a stored sheet is either valid or it is not.
pub fn decode_balance_sheet(raw: &Value) -> Result<BalanceSheet> {
    let root = FieldPath::root();
    let r = ObjectReader::strict(raw, &root, &[&["balance_sheet", "last_iid"]])?;
    let list_path = r.field_path("balance_sheet");

    let items = match r.get("balance_sheet") {
        None => Vec::new(),
        Some(Value::Array(raws)) => raws
            .iter()
            .enumerate()
            .map(|(index, item)| decode_item_at(item, &list_path.index(index)))
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(RecordError::invalid_field(
                &list_path,
                format!("expected an array, got {}", json_type(other)),
            ))
        }
    };

    let last_iid = r.optional_u64_in("last_iid", 0..=MAX_IID)?.unwrap_or(0);
    BalanceSheet::with_last_iid(items, last_iid, &list_path)
}

impl<'de> Deserialize<'de> for BalanceSheet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        decode_balance_sheet(&raw).map_err(serde::de::Error::custom)
    }
}

/// Everything known about one person: the single source of truth that
/// reconciliation updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PersonRecord {
    #[serde(default)]
    pub identity: IdentityProfile,
    #[serde(default)]
    pub balance: BalanceSheet,
}

impl PersonRecord {
    pub fn new(identity: IdentityProfile, balance: BalanceSheet) -> Self {
        Self { identity, balance }
    }

    /// Validates a batch of raw items and reconciles the survivors into this
    /// record's balance sheet. Under `all_or_nothing` a single rejected item
    /// leaves the record untouched and returns every error.
    pub fn apply_extraction(
        &mut self,
        raws: &[Value],
        options: &ReconcileOptions,
    ) -> std::result::Result<ChangeReport, Vec<RecordError>> {
        let reconciliation = reconcile_raw(&self.balance, raws, options)?;
        self.balance = reconciliation.sheet;
        Ok(reconciliation.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn sheet(raw: Value) -> BalanceSheet {
        decode_balance_sheet(&raw).unwrap()
    }

    #[test]
    fn test_decode_and_high_water_mark() {
        let s = sheet(json!({
            "balance_sheet": [
                {"type": "isa", "iid": 2},
                {"type": "credit_card", "iid": 7},
                {"type": "car"}
            ]
        }));
        assert_eq!(s.len(), 3);
        assert_eq!(s.max_iid(), Some(7));
        assert_eq!(s.next_iid(), 8);
        assert_eq!(s.get(2).unwrap().description(), "ISA");
    }

    #[test]
    fn test_duplicate_iid_rejected() {
        let err = decode_balance_sheet(&json!({
            "balance_sheet": [{"type": "isa", "iid": 2}, {"type": "gia", "iid": 2}]
        }))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingOrInvalidField);
        assert_eq!(err.path().to_string(), "balance_sheet[1].iid");
    }

    #[test]
    fn test_oversized_iid_rejected() {
        let err = decode_balance_sheet(&json!({
            "balance_sheet": [{"type": "isa", "iid": u64::MAX}]
        }))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingOrInvalidField);
        assert_eq!(err.path().to_string(), "balance_sheet[0].iid");

        let err = decode_balance_sheet(&json!({"balance_sheet": [], "last_iid": MAX_IID + 1})).unwrap_err();
        assert_eq!(err.path().to_string(), "last_iid");

        let mut item = crate::registry::decode_item(&json!({"type": "isa"})).unwrap();
        item.set_iid(Some(u64::MAX));
        let err = BalanceSheet::from_items(vec![item]).unwrap_err();
        assert_eq!(err.path().to_string(), "balance_sheet[0].iid");

        let at_limit = sheet(json!({"balance_sheet": [{"type": "isa", "iid": MAX_IID}]}));
        assert_eq!(at_limit.next_iid(), MAX_IID + 1);
    }

    #[test]
    fn test_removed_ids_are_not_reused() {
        let mut s = sheet(json!({"balance_sheet": [{"type": "isa", "iid": 1}, {"type": "gia", "iid": 2}]}));
        assert!(s.remove(2).is_some());
        assert_eq!(s.max_iid(), Some(1));
        assert_eq!(s.next_iid(), 3);

        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["last_iid"], 2);
        let reloaded: BalanceSheet = serde_json::from_value(json).unwrap();
        assert_eq!(reloaded.next_iid(), 3);
    }

    #[test]
    fn test_grouped_in_display_order() {
        let s = sheet(json!({
            "balance_sheet": [
                {"type": "credit_card"},
                {"type": "salary_income", "income": {"periodic_amount": 3000}},
                {"type": "isa"},
                {"type": "state_pension", "pension": {"periodic_amount": 900}}
            ]
        }));
        let groups: Vec<ItemGroup> = s.grouped().keys().copied().collect();
        assert_eq!(
            groups,
            vec![ItemGroup::Income, ItemGroup::Investment, ItemGroup::Debt, ItemGroup::Pension]
        );
    }

    #[test]
    fn test_person_record_round_trip() {
        let record: PersonRecord = serde_json::from_value(json!({
            "identity": {"occupation": "Nurse"},
            "balance": {"balance_sheet": [{"type": "isa", "iid": 1}]}
        }))
        .unwrap();
        assert_eq!(record.identity.occupation.as_deref(), Some("Nurse"));
        assert_eq!(record.balance.len(), 1);

        let again: PersonRecord =
            serde_json::from_value(serde_json::to_value(&record).unwrap()).unwrap();
        assert_eq!(again, record);
    }
}
