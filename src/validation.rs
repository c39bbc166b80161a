//! Strict decoding of untyped JSON into the typed record model.
//!
//! Every decoder in the crate goes through [`ObjectReader`], which enforces the
//! same discipline everywhere:
//!
//! - keys outside the declared field list fail with `UnknownField`;
//! - strings are trimmed, and blank strings count as absent;
//! - `null` counts as absent;
//! - missing required fields and wrongly shaped values fail with
//!   `MissingOrInvalidField`, qualified by their full path.
//!
//! Decoding is pure: the same input always yields the same value or the same error.

use crate::error::{FieldPath, RecordError, Result};
use crate::registry::{decode_item_at, FinancialItem};
use crate::values::CurrencyCode;
use log::{debug, warn};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Closed enumerations whose wire form is a snake_case tag.
pub trait Tagged: Sized + Copy + 'static {
    const VARIANTS: &'static [Self];

    fn tag(self) -> &'static str;

    fn from_tag(tag: &str) -> Option<Self> {
        Self::VARIANTS.iter().copied().find(|v| v.tag() == tag)
    }

    fn expected() -> String {
        Self::VARIANTS
            .iter()
            .map(|v| v.tag())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Defaults inherited from the enclosing record while decoding nested values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodeScope {
    /// Currency given to a `Money` value that omits its own.
    pub currency: CurrencyCode,
}

impl DecodeScope {
    pub fn with_currency(currency: CurrencyCode) -> Self {
        Self { currency }
    }
}

/// A value that can be strictly decoded from raw JSON.
pub trait Decode: Sized {
    fn decode(raw: &Value, path: &FieldPath, scope: &DecodeScope) -> Result<Self>;
}

pub struct ObjectReader<'a> {
    map: &'a Map<String, Value>,
    path: FieldPath,
}

impl<'a> ObjectReader<'a> {
    /// Fails with `MissingOrInvalidField` unless `raw` is a JSON object.
    pub fn new(raw: &'a Value, path: &FieldPath) -> Result<Self> {
        match raw {
            Value::Object(map) => Ok(Self {
                map,
                path: path.clone(),
            }),
            other => Err(RecordError::invalid_field(
                path,
                format!("expected an object, got {}", json_type(other)),
            )),
        }
    }

    /// Like [`ObjectReader::new`], and rejects any key not listed in one of `allowed`.
    pub fn strict(raw: &'a Value, path: &FieldPath, allowed: &[&[&str]]) -> Result<Self> {
        let reader = Self::new(raw, path)?;
        reader.deny_unknown(allowed)?;
        Ok(reader)
    }

    pub fn deny_unknown(&self, allowed: &[&[&str]]) -> Result<()> {
        for key in self.map.keys() {
            if !allowed.iter().any(|fields| fields.contains(&key.as_str())) {
                return Err(RecordError::UnknownField {
                    path: self.path.key(key.as_str()),
                    field: key.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn field_path(&self, key: &str) -> FieldPath {
        self.path.key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a String> {
        self.map.keys()
    }

    /// The raw value under `key`, treating `null` as absent.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(trimmed.to_string()))
                }
            }
            Some(other) => Err(RecordError::invalid_field(
                &self.field_path(key),
                format!("expected a string, got {}", json_type(other)),
            )),
        }
    }

    /// Trimmed string of at most `max_chars` characters.
    pub fn optional_str_max(&self, key: &str, max_chars: usize) -> Result<Option<String>> {
        let value = self.optional_str(key)?;
        if let Some(s) = &value {
            let len = s.chars().count();
            if len > max_chars {
                return Err(RecordError::invalid_field(
                    &self.field_path(key),
                    format!("must be at most {} characters, got {}", max_chars, len),
                ));
            }
        }
        Ok(value)
    }

    pub fn optional_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                RecordError::invalid_field(
                    &self.field_path(key),
                    format!("expected a non-negative integer, got {}", value),
                )
            }),
        }
    }

    pub fn optional_u64_in(&self, key: &str, range: RangeInclusive<u64>) -> Result<Option<u64>> {
        let value = self.optional_u64(key)?;
        if let Some(n) = value {
            if !range.contains(&n) {
                return Err(RecordError::invalid_field(
                    &self.field_path(key),
                    format!(
                        "must be between {} and {}, got {}",
                        range.start(),
                        range.end(),
                        n
                    ),
                ));
            }
        }
        Ok(value)
    }

    pub fn optional_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(RecordError::invalid_field(
                &self.field_path(key),
                format!("expected a boolean, got {}", json_type(other)),
            )),
        }
    }

    pub fn optional_decimal(&self, key: &str) -> Result<Option<Decimal>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => parse_decimal(value)
                .map(Some)
                .map_err(|reason| RecordError::invalid_field(&self.field_path(key), reason)),
        }
    }

    pub fn required_decimal(&self, key: &str) -> Result<Decimal> {
        self.optional_decimal(key)?
            .ok_or_else(|| RecordError::missing_field(&self.field_path(key)))
    }

    /// A tag from a closed enumeration; an unlisted tag is a shape error.
    pub fn optional_tag<T: Tagged>(&self, key: &str) -> Result<Option<T>> {
        match self.optional_str(key)? {
            None => Ok(None),
            Some(tag) => T::from_tag(&tag).map(Some).ok_or_else(|| {
                RecordError::invalid_field(
                    &self.field_path(key),
                    format!("'{}' is not one of: {}", tag, T::expected()),
                )
            }),
        }
    }

    pub fn optional<T: Decode>(&self, key: &str, scope: &DecodeScope) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => T::decode(value, &self.field_path(key), scope).map(Some),
        }
    }

    pub fn required<T: Decode>(&self, key: &str, scope: &DecodeScope) -> Result<T> {
        self.optional(key, scope)?
            .ok_or_else(|| RecordError::missing_field(&self.field_path(key)))
    }
}

/// Parses a JSON number (or a numeric string, as extractors often quote numbers)
/// into a `Decimal`. Thousands separators are tolerated in strings.
pub fn parse_decimal(value: &Value) -> std::result::Result<Decimal, String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Decimal::from(i));
            }
            if let Some(u) = n.as_u64() {
                return Ok(Decimal::from(u));
            }
            decimal_from_text(&n.to_string())
        }
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() {
                return Err("expected a number, got an empty string".to_string());
            }
            decimal_from_text(&cleaned)
        }
        other => Err(format!("expected a number, got {}", json_type(other))),
    }
}

fn decimal_from_text(text: &str) -> std::result::Result<Decimal, String> {
    if let Ok(d) = Decimal::from_str(text) {
        return Ok(d);
    }
    // Scientific notation goes through f64.
    f64::from_str(text)
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Decimal::from_f64)
        .ok_or_else(|| format!("'{}' is not a representable number", text))
}

pub fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Per-item outcome of validating a batch: successes keep their input index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub items: Vec<(usize, FinancialItem)>,
    pub errors: Vec<RecordError>,
}

impl ValidationReport {
    pub fn from_results(results: Vec<Result<FinancialItem>>) -> Self {
        let mut report = Self::default();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(item) => report.items.push((index, item)),
                Err(err) => report.errors.push(err),
            }
        }
        report
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_items(self) -> Vec<FinancialItem> {
        self.items.into_iter().map(|(_, item)| item).collect()
    }
}

/// Validates each raw item independently; one failure never blocks the others.
/// Errors are reported under `item[i]`.
pub fn validate_items(raws: &[Value]) -> Vec<Result<FinancialItem>> {
    let batch = FieldPath::root().key("item");
    raws.iter()
        .enumerate()
        .map(|(index, raw)| {
            let result = decode_item_at(raw, &batch.index(index));
            match &result {
                Ok(item) => debug!("item[{}] decoded as {}", index, item.kind().tag()),
                Err(err) => warn!("Rejected extracted item: {}", err),
            }
            result
        })
        .collect()
}

pub fn validate_batch(raws: &[Value]) -> ValidationReport {
    ValidationReport::from_results(validate_items(raws))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_strict_reader_rejects_unknown_keys() {
        let raw = json!({"a": 1, "zzz": 2});
        let err = ObjectReader::strict(&raw, &FieldPath::root(), &[&["a"]])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnknownField);
        assert_eq!(err.path().to_string(), "zzz");
    }

    #[test]
    fn test_strings_are_trimmed_and_blank_is_absent() {
        let raw = json!({"name": "  Barclays  ", "blank": "   ", "nothing": null});
        let reader = ObjectReader::new(&raw, &FieldPath::root()).unwrap();
        assert_eq!(reader.optional_str("name").unwrap().as_deref(), Some("Barclays"));
        assert_eq!(reader.optional_str("blank").unwrap(), None);
        assert_eq!(reader.optional_str("nothing").unwrap(), None);
    }

    #[test]
    fn test_length_limit_counts_characters() {
        let raw = json!({"d": "é".repeat(80), "e": "x".repeat(81)});
        let reader = ObjectReader::new(&raw, &FieldPath::root()).unwrap();
        assert!(reader.optional_str_max("d", 80).is_ok());
        let err = reader.optional_str_max("e", 80).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingOrInvalidField);
    }

    #[test]
    fn test_range_is_enforced() {
        let raw = json!({"age": 121, "neg": -1});
        let reader = ObjectReader::new(&raw, &FieldPath::root()).unwrap();
        assert!(reader.optional_u64_in("age", 0..=120).is_err());
        assert!(reader.optional_u64("neg").is_err());
    }

    #[test]
    fn test_parse_decimal_variants() {
        assert_eq!(parse_decimal(&json!(1500)).unwrap(), Decimal::from(1500));
        assert_eq!(parse_decimal(&json!("1,500.25")).unwrap(), Decimal::new(150025, 2));
        assert_eq!(parse_decimal(&json!(12.5)).unwrap(), Decimal::new(125, 1));
        assert!(parse_decimal(&json!("lots")).is_err());
        assert!(parse_decimal(&json!(true)).is_err());
    }

    #[test]
    fn test_batch_failures_are_independent() {
        let raws = vec![
            json!({"type": "isa"}),
            json!({"type": "spaceship"}),
            json!({"type": "credit_card", "balance": {"amount": -5}}),
            json!({"type": "gia"}),
        ];
        let report = validate_batch(&raws);
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.items[1].0, 3);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].path().to_string(), "item[1].type");
        assert_eq!(
            report.errors[1].to_string(),
            "item[2].balance: must be non-negative, got -5"
        );
    }
}
