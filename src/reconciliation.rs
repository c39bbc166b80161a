use crate::balance_sheet::BalanceSheet;
use crate::error::{FieldPath, RecordError};
use crate::registry::{FinancialItem, ItemKind, MAX_IID};
use crate::validation::{validate_batch, Tagged, ValidationReport};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// What happens to items in the existing sheet that the incoming set does not mention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// The incoming set is a delta; untouched items stay as they are.
    #[default]
    KeepAbsent,
    /// The incoming set is the whole truth; untouched items are retired.
    DropAbsent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileOptions {
    pub retention: Retention,
    /// Abort the whole batch if any raw item fails validation.
    pub all_or_nothing: bool,
}

impl ReconcileOptions {
    pub fn full_replacement() -> Self {
        Self {
            retention: Retention::DropAbsent,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn all_or_nothing(mut self, enabled: bool) -> Self {
        self.all_or_nothing = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Added,
    Updated,
    Unchanged,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemChange {
    pub iid: Option<u64>,
    pub kind: ItemKind,
    pub action: ChangeAction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
}

impl ChangeSummary {
    fn record(&mut self, action: ChangeAction) {
        match action {
            ChangeAction::Added => self.added += 1,
            ChangeAction::Updated => self.updated += 1,
            ChangeAction::Unchanged => self.unchanged += 1,
            ChangeAction::Removed => self.removed += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeReport {
    pub summary: ChangeSummary,
    /// One entry per item of the old or new sheet, in result order, removals last.
    pub changes: Vec<ItemChange>,
    /// Items that failed validation, or could not be given an iid, and were left out.
    pub rejected: Vec<RecordError>,
}

impl ChangeReport {
    fn push(&mut self, iid: Option<u64>, kind: ItemKind, action: ChangeAction) {
        self.summary.record(action);
        self.changes.push(ItemChange { iid, kind, action });
    }
}

/// Hands out fresh identifiers up to [`MAX_IID`].
struct IidIssuer {
    next: u64,
}

impl IidIssuer {
    fn issue(&mut self) -> Option<u64> {
        if self.next > MAX_IID {
            return None;
        }
        let iid = self.next;
        self.next += 1;
        Some(iid)
    }

    fn last_issued(&self) -> u64 {
        self.next - 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub sheet: BalanceSheet,
    pub report: ChangeReport,
}

/// Merges validated items into `existing`, returning a new sheet.
///
/// - An incoming item whose `iid` exists in the sheet replaces that item
///   wholesale and keeps the iid. If several incoming items share the iid the
///   last one wins.
/// - Every other incoming item (no iid, or an iid the sheet does not know) is
///   appended with a fresh iid above the sheet's high-water mark.
/// - Existing items the incoming set does not mention are kept or retired per
///   `options.retention`. Kept items that still lack an iid are given one and
///   reported as updated.
///
/// Once [`MAX_IID`] has been issued, new items are rejected in the report
/// instead of being added.
///
/// The caller must serialize reconciliations of the same sheet; running two
/// against the same stale sheet would issue colliding ids.
pub fn reconcile(
    existing: &BalanceSheet,
    incoming: Vec<FinancialItem>,
    options: &ReconcileOptions,
) -> Reconciliation {
    let known: HashSet<u64> = existing.iter().filter_map(FinancialItem::iid).collect();

    let mut replacements: HashMap<u64, FinancialItem> = HashMap::new();
    let mut additions: Vec<FinancialItem> = Vec::new();
    for item in incoming {
        match item.iid() {
            Some(iid) if known.contains(&iid) => {
                if replacements.insert(iid, item).is_some() {
                    debug!("iid {} appears more than once in the incoming set; last wins", iid);
                }
            }
            Some(iid) => {
                debug!("iid {} is not in the sheet; treating the item as new", iid);
                additions.push(item);
            }
            None => additions.push(item),
        }
    }

    let mut issuer = IidIssuer {
        next: existing.next_iid(),
    };
    let mut report = ChangeReport::default();
    let mut items: Vec<FinancialItem> = Vec::with_capacity(existing.len() + additions.len());
    let mut retired: Vec<&FinancialItem> = Vec::new();

    for current in existing.iter() {
        let replacement = current.iid().and_then(|iid| replacements.remove(&iid));
        match replacement {
            Some(mut newer) => {
                newer.set_iid(current.iid());
                let action = if newer == *current {
                    ChangeAction::Unchanged
                } else {
                    ChangeAction::Updated
                };
                report.push(newer.iid(), newer.kind(), action);
                items.push(newer);
            }
            None if options.retention == Retention::DropAbsent => retired.push(current),
            None => {
                let mut kept = current.clone();
                let mut action = ChangeAction::Unchanged;
                if kept.iid().is_none() {
                    if let Some(iid) = issuer.issue() {
                        kept.set_iid(Some(iid));
                        action = ChangeAction::Updated;
                    }
                }
                report.push(kept.iid(), kept.kind(), action);
                items.push(kept);
            }
        }
    }

    for mut item in additions {
        match issuer.issue() {
            Some(iid) => {
                item.set_iid(Some(iid));
                report.push(item.iid(), item.kind(), ChangeAction::Added);
                items.push(item);
            }
            None => {
                warn!("No identifiers left above {}; {} item rejected", MAX_IID, item.kind().tag());
                report.rejected.push(RecordError::invalid_field(
                    &FieldPath::root().key("iid"),
                    format!("identifiers are exhausted at {}", MAX_IID),
                ));
            }
        }
    }

    for gone in retired {
        report.push(gone.iid(), gone.kind(), ChangeAction::Removed);
    }

    let summary = report.summary;
    info!(
        "Reconciled balance sheet: {} added, {} updated, {} unchanged, {} removed",
        summary.added, summary.updated, summary.unchanged, summary.removed
    );

    Reconciliation {
        sheet: BalanceSheet::from_reconciled(items, issuer.last_issued()),
        report,
    }
}

/// Validates raw items one by one, then reconciles the ones that passed.
pub fn reconcile_raw(
    existing: &BalanceSheet,
    raws: &[Value],
    options: &ReconcileOptions,
) -> std::result::Result<Reconciliation, Vec<RecordError>> {
    reconcile_validated(existing, validate_batch(raws), options)
}

/// Reconciles the successes of a validation pass.
///
/// With `all_or_nothing` any failure aborts and every error is returned; the
/// caller's sheet is untouched either way since reconciliation never mutates it.
pub fn reconcile_validated(
    existing: &BalanceSheet,
    validation: ValidationReport,
    options: &ReconcileOptions,
) -> std::result::Result<Reconciliation, Vec<RecordError>> {
    let attempted = validation.items.len() + validation.errors.len();
    if !validation.is_clean() {
        if options.all_or_nothing {
            warn!(
                "Rejecting batch of {} items: {} failed validation",
                attempted,
                validation.errors.len()
            );
            return Err(validation.errors);
        }
        warn!(
            "Reconciling {} of {} items; {} failed validation",
            validation.items.len(),
            attempted,
            validation.errors.len()
        );
    }

    let mut rejected = validation.errors.clone();
    let mut reconciliation = reconcile(existing, validation.into_items(), options);
    rejected.append(&mut reconciliation.report.rejected);
    reconciliation.report.rejected = rejected;
    Ok(reconciliation)
}
