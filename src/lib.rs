//! # Balance Sheet Records
//!
//! A library for turning semi-structured financial data (extracted from
//! documents via LLM) into a strictly typed personal balance sheet, and for
//! merging successive extractions into it without losing or duplicating items.
//!
//! ## Core Concepts
//!
//! - **Financial Items**: a closed set of kinds (salary, ISA, credit card, buy-to-let, ...)
//!   selected by a `type` discriminator. Each kind carries only its own payload fields.
//! - **Strict Validation**: unknown keys are errors, strings are trimmed, ranges are
//!   enforced, and every error carries the path of the offending field.
//! - **Reconciliation**: items keep a stable `iid` across extractions. Updates replace
//!   by `iid`; new items get ids above a high-water mark that never goes backwards.
//! - **Migration**: older record shapes are upgraded to the current model, with a
//!   warning for anything that has no current home.
//!
//! ## Example
//!
//! ```rust
//! use balance_sheet_records::*;
//! use serde_json::json;
//!
//! let record = PersonRecord::default();
//! let extraction = json!([
//!     {"type": "current_account", "value": {"amount": 1500, "currency": "GBP"}},
//!     {"type": "salary_income", "income": {"periodic_amount": 3200, "net_gross": "net"}}
//! ]);
//!
//! let processed =
//!     process_extraction(&record, &extraction, &ReconcileOptions::default()).unwrap();
//!
//! assert_eq!(processed.report.summary.added, 2);
//! let account = processed.record.balance.get(1).unwrap();
//! assert_eq!(account.description(), "Current Account");
//! ```

pub mod balance_sheet;
pub mod error;
pub mod migration;
pub mod profile;
pub mod reconciliation;
pub mod registry;
pub mod schema;
pub mod validation;
pub mod values;

pub use balance_sheet::{decode_balance_sheet, BalanceSheet, PersonRecord};
pub use error::{ErrorKind, FieldPath, PathSegment, RecordError, Result};
pub use migration::{
    detect_shape, migrate, migrate_item, upgrade, Migrated, MigrationWarning, SchemaShape,
    Upgraded,
};
pub use profile::{
    decode_profile, EmploymentStatus, Gender, HealthStatus, IdentityProfile, MaritalStatus,
    YesNoUnknown,
};
pub use reconciliation::{
    reconcile, reconcile_raw, reconcile_validated, ChangeAction, ChangeReport, ChangeSummary,
    ItemChange, ReconcileOptions, Reconciliation, Retention,
};
pub use registry::{
    decode_item, decode_item_str, FinancialItem, ItemGroup, ItemKind, KindSpec, PayloadShape,
    KIND_TABLE, MAX_DESCRIPTION_CHARS, MAX_IID,
};
pub use schema::*;
pub use validation::{validate_batch, validate_items, Tagged, ValidationReport};
pub use values::{CurrencyCode, Debt, Frequency, Money, NetGross, PeriodicCashFlow, DEFAULT_CURRENCY};

use log::{debug, info};
use serde::Serialize;
use serde_json::Value;

/// Outcome of applying one extraction to a person's record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedExtraction {
    /// The updated record. The caller's original is left as it was.
    pub record: PersonRecord,
    pub shape: SchemaShape,
    pub report: ChangeReport,
    pub warnings: Vec<MigrationWarning>,
}

pub struct ExtractionProcessor;

impl ExtractionProcessor {
    /// Upgrades `raw` from whatever shape it is in, overlays any profile fields
    /// onto the record's identity and reconciles the items into its balance sheet.
    ///
    /// Items are validated one by one; failures are reported in
    /// `report.rejected` unless `options.all_or_nothing` is set, in which case
    /// every error is returned instead. An unrecognised shape or an invalid
    /// profile always fails the whole extraction.
    pub fn process(
        record: &PersonRecord,
        raw: &Value,
        options: &ReconcileOptions,
    ) -> std::result::Result<ProcessedExtraction, Vec<RecordError>> {
        let upgraded = upgrade(raw).map_err(|e| vec![e])?;

        info!(
            "Processing {} extraction with {} items",
            upgraded.shape,
            upgraded.items.len()
        );

        let mut updated = record.clone();
        if let Some(fields) = &upgraded.profile {
            let newer =
                profile::decode_profile_at(fields, &FieldPath::root()).map_err(|e| vec![e])?;
            updated.identity.overlay(&newer);
            debug!("Profile fields overlaid onto the existing identity");
        }

        let validation = ValidationReport::from_results(upgraded.decode_items());
        let reconciliation = reconcile_validated(&updated.balance, validation, options)?;
        updated.balance = reconciliation.sheet;

        Ok(ProcessedExtraction {
            record: updated,
            shape: upgraded.shape,
            report: reconciliation.report,
            warnings: upgraded.warnings,
        })
    }
}

pub fn process_extraction(
    record: &PersonRecord,
    raw: &Value,
    options: &ReconcileOptions,
) -> std::result::Result<ProcessedExtraction, Vec<RecordError>> {
    ExtractionProcessor::process(record, raw, options)
}
