use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// One step in a [`FieldPath`]: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of a value inside a raw record, rendered as `item[3].value.amount`.
///
/// The empty path (the record itself) renders as `$`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        Self(segments)
    }

    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// Prepends `prefix`, so a path produced while decoding a nested value can be
    /// reported relative to the enclosing record.
    #[must_use]
    pub fn under(&self, prefix: &FieldPath) -> Self {
        let mut segments = prefix.0.clone();
        segments.extend(self.0.iter().cloned());
        Self(segments)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{}", key)?,
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Fieldless discriminant of [`RecordError`], for callers that map errors to
/// user-facing messages without inspecting the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UnknownField,
    MissingOrInvalidField,
    UnknownItemKind,
    UnsupportedSchemaVersion,
    ReconciliationConflict,
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordError {
    /// A value object rejected its input (negative money, malformed currency,
    /// non-positive periodic amount, tag outside its enumerated set).
    #[error("{path}: {reason}")]
    Validation { path: FieldPath, reason: String },

    #[error("{path}: unknown field '{field}' is not part of the schema")]
    UnknownField { path: FieldPath, field: String },

    #[error("{path}: {reason}")]
    MissingOrInvalidField { path: FieldPath, reason: String },

    #[error("{path}: {}", describe_item_kind(.found))]
    UnknownItemKind {
        path: FieldPath,
        found: Option<String>,
    },

    #[error("{path}: unsupported schema version: {reason}")]
    UnsupportedSchemaVersion { path: FieldPath, reason: String },

    /// Reserved for field-level merge policies. Wholesale replacement by iid
    /// never produces it.
    #[error("{path}: reconciliation conflict on iid {iid}: {reason}")]
    ReconciliationConflict {
        path: FieldPath,
        iid: u64,
        reason: String,
    },
}

fn describe_item_kind(found: &Option<String>) -> String {
    match found {
        Some(tag) => format!("unknown item kind '{}'", tag),
        None => "missing item kind discriminator".to_string(),
    }
}

impl RecordError {
    pub fn validation(path: &FieldPath, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.clone(),
            reason: reason.into(),
        }
    }

    pub fn invalid_field(path: &FieldPath, reason: impl Into<String>) -> Self {
        Self::MissingOrInvalidField {
            path: path.clone(),
            reason: reason.into(),
        }
    }

    pub fn missing_field(path: &FieldPath) -> Self {
        Self::invalid_field(path, "required field is missing")
    }

    pub fn unsupported(path: &FieldPath, reason: impl Into<String>) -> Self {
        Self::UnsupportedSchemaVersion {
            path: path.clone(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::UnknownField { .. } => ErrorKind::UnknownField,
            Self::MissingOrInvalidField { .. } => ErrorKind::MissingOrInvalidField,
            Self::UnknownItemKind { .. } => ErrorKind::UnknownItemKind,
            Self::UnsupportedSchemaVersion { .. } => ErrorKind::UnsupportedSchemaVersion,
            Self::ReconciliationConflict { .. } => ErrorKind::ReconciliationConflict,
        }
    }

    pub fn path(&self) -> &FieldPath {
        match self {
            Self::Validation { path, .. }
            | Self::UnknownField { path, .. }
            | Self::MissingOrInvalidField { path, .. }
            | Self::UnknownItemKind { path, .. }
            | Self::UnsupportedSchemaVersion { path, .. }
            | Self::ReconciliationConflict { path, .. } => path,
        }
    }

    fn path_mut(&mut self) -> &mut FieldPath {
        match self {
            Self::Validation { path, .. }
            | Self::UnknownField { path, .. }
            | Self::MissingOrInvalidField { path, .. }
            | Self::UnknownItemKind { path, .. }
            | Self::UnsupportedSchemaVersion { path, .. }
            | Self::ReconciliationConflict { path, .. } => path,
        }
    }

    /// Re-roots the error under `prefix`.
    #[must_use]
    pub fn under(mut self, prefix: &FieldPath) -> Self {
        let path = self.path_mut();
        *path = path.under(prefix);
        self
    }
}

pub type Result<T> = std::result::Result<T, RecordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_rendering() {
        assert_eq!(FieldPath::root().to_string(), "$");
        let path = FieldPath::root().key("item").index(3).key("value");
        assert_eq!(path.to_string(), "item[3].value");
    }

    #[test]
    fn test_error_display_is_path_qualified() {
        let err = RecordError::validation(&FieldPath::root(), "must be non-negative")
            .under(&FieldPath::root().key("item").index(3).key("value"));
        assert_eq!(err.to_string(), "item[3].value: must be non-negative");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_error_serializes_with_kind_and_path() {
        let err = RecordError::UnknownItemKind {
            path: FieldPath::root().key("type"),
            found: Some("yacht".to_string()),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "unknown_item_kind");
        assert_eq!(json["path"], "type");
        assert_eq!(json["found"], "yacht");
        assert_eq!(err.to_string(), "type: unknown item kind 'yacht'");
    }
}
