use balance_sheet_records::*;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::fs::File;
use std::io::Write;

fn export_summary(sheet: &BalanceSheet, filename: &str) -> std::io::Result<()> {
    let mut file = File::create(std::env::temp_dir().join(filename))?;
    writeln!(file, "group,iid,type,description,currency")?;
    for (group, items) in sheet.grouped() {
        for item in items {
            writeln!(
                file,
                "{},{},{},{},{}",
                group.label(),
                item.iid().map(|iid| iid.to_string()).unwrap_or_default(),
                item.kind().tag(),
                item.description(),
                item.currency()
            )?;
        }
    }
    Ok(())
}

fn first_extraction() -> Value {
    json!([
        {
            "type": "salary_income",
            "description": "  Acme Ltd salary  ",
            "income": {"periodic_amount": "4,250", "frequency": "monthly", "net_gross": "gross"}
        },
        {
            "type": "main_residence",
            "value": {"amount": 425000},
            "loan": {
                "balance": {"amount": 210000},
                "repayment": {"periodic_amount": 1180}
            }
        },
        {"type": "isa", "description": "Stocks & Shares ISA", "value": {"amount": 18500.5}},
        {"type": "credit_card", "balance": {"amount": 640}},
        {"type": "workplace_pension", "value": {"amount": 96000}, "employer_contribution": {"periodic_amount": 410}}
    ])
}

#[test]
fn test_household_across_two_extractions() -> anyhow::Result<()> {
    let record = PersonRecord::default();

    let first = process_extraction(&record, &first_extraction(), &ReconcileOptions::default())
        .map_err(|errors| anyhow::anyhow!("{:?}", errors))?;
    assert_eq!(first.report.summary.added, 5);
    assert!(first.report.rejected.is_empty());

    let ids: Vec<Option<u64>> = first.record.balance.iter().map(FinancialItem::iid).collect();
    assert_eq!(ids, vec![Some(1), Some(2), Some(3), Some(4), Some(5)]);

    let salary = first.record.balance.get(1).unwrap().to_value()?;
    assert_eq!(salary["description"], "Acme Ltd salary");
    assert_eq!(salary["income"]["periodic_amount"], 4250);

    let isa = first.record.balance.get(3).unwrap().to_value()?;
    assert_eq!(isa["value"]["amount"], 18500.5);

    // The second pass reuses iids where it recognises items, pays off the
    // card, and finds a new savings account.
    let second_raw = json!([
        {"type": "isa", "iid": 3, "description": "Stocks & Shares ISA", "value": {"amount": 21000}},
        {"type": "credit_card", "iid": 4, "balance": {"amount": 0}},
        {"type": "savings_account", "iid": 99, "value": {"amount": 5000}}
    ]);
    let second = process_extraction(&first.record, &second_raw, &ReconcileOptions::default())
        .map_err(|errors| anyhow::anyhow!("{:?}", errors))?;

    assert_eq!(
        second.report.summary,
        ChangeSummary { added: 1, updated: 2, unchanged: 3, removed: 0 }
    );
    assert_eq!(second.record.balance.len(), 6);
    assert_eq!(second.record.balance.get(6).unwrap().kind(), ItemKind::SavingsAccount);
    assert!(!second.record.balance.contains_iid(99));

    export_summary(&second.record.balance, "test_household_summary.csv")?;

    println!("✓ Household reconciliation test passed - output: test_household_summary.csv");
    Ok(())
}

#[test]
fn test_full_replacement_retires_items_for_good() {
    let record = process_extraction(
        &PersonRecord::default(),
        &first_extraction(),
        &ReconcileOptions::default(),
    )
    .unwrap()
    .record;

    let replacement = json!([
        {"type": "salary_income", "iid": 1, "income": {"periodic_amount": 4400}},
        {"type": "main_residence", "iid": 2, "value": {"amount": 430000}}
    ]);
    let processed =
        process_extraction(&record, &replacement, &ReconcileOptions::full_replacement()).unwrap();

    assert_eq!(processed.report.summary.removed, 3);
    assert_eq!(processed.record.balance.len(), 2);
    let removed: Vec<u64> = processed
        .report
        .changes
        .iter()
        .filter(|change| change.action == ChangeAction::Removed)
        .filter_map(|change| change.iid)
        .collect();
    assert_eq!(removed, vec![3, 4, 5]);

    let persisted = serde_json::to_value(&processed.record).unwrap();
    let reloaded: PersonRecord = serde_json::from_value(persisted).unwrap();
    let next = process_extraction(
        &reloaded,
        &json!([{"type": "car", "value": {"amount": 7000}}]),
        &ReconcileOptions::default(),
    )
    .unwrap();
    assert_eq!(next.record.balance.get(6).unwrap().kind(), ItemKind::Car);

    println!("✓ Full replacement test passed");
}

#[test]
fn test_batch_errors_carry_field_paths() {
    let raws = vec![
        json!({"type": "gia", "value": {"amount": 100}}),
        json!({"type": "gia", "value": {"amount": 100, "currency": "gbp"}}),
        json!({"type": "gia", "valeu": {"amount": 100}}),
        json!({"type": "hedge_fund"}),
        json!({"type": "expenses", "expenditure": {"periodic_amount": 0}}),
        json!({"type": "student_loan", "repayment": {"periodic_amount": 90, "frequency": "fortnightly"}}),
        json!("not an object"),
    ];

    let report = validate_batch(&raws);
    assert_eq!(report.items.len(), 1);

    let found: Vec<(ErrorKind, String)> = report
        .errors
        .iter()
        .map(|err| (err.kind(), err.path().to_string()))
        .collect();
    assert_eq!(
        found,
        vec![
            (ErrorKind::Validation, "item[1].value.currency".to_string()),
            (ErrorKind::UnknownField, "item[2].valeu".to_string()),
            (ErrorKind::UnknownItemKind, "item[3].type".to_string()),
            (ErrorKind::Validation, "item[4].expenditure.periodic_amount".to_string()),
            (ErrorKind::Validation, "item[5].repayment.frequency".to_string()),
            (ErrorKind::MissingOrInvalidField, "item[6]".to_string()),
        ]
    );

    let rendered = serde_json::to_value(&report.errors[1]).unwrap();
    assert_eq!(rendered["kind"], "unknown_field");
    assert_eq!(rendered["path"], "item[2].valeu");
    assert_eq!(rendered["field"], "valeu");

    println!("✓ Batch error path test passed");
}

#[test]
fn test_money_and_currency_edges() {
    assert!(Money::gbp(Decimal::new(-1, 2)).is_err());
    assert!(Money::gbp(Decimal::ZERO).is_ok());
    assert!(CurrencyCode::parse("gb").is_err());
    assert_eq!(CurrencyCode::parse("GBP").unwrap().as_str(), "GBP");
}

#[test]
fn test_round_trip_of_normalised_items() -> anyhow::Result<()> {
    let inputs = vec![
        json!({
            "type": "buy_to_let",
            "iid": 12,
            "description": "Leeds flat",
            "currency": "GBP",
            "rental_income": {"periodic_amount": 875, "frequency": "monthly", "net_gross": "gross"},
            "value": {"amount": 190000, "currency": "GBP"},
            "loan": {"balance": {"amount": 120000, "currency": "GBP"}}
        }),
        json!({
            "type": "state_pension",
            "description": "State Pension",
            "currency": "GBP",
            "pension": {"periodic_amount": 11502.5, "frequency": "annually", "net_gross": "gross"}
        }),
        json!({
            "type": "life_insurance",
            "description": "Term assurance",
            "currency": "EUR",
            "cover": {"amount": 300000, "currency": "EUR"},
            "premium": {"periodic_amount": 32, "frequency": "monthly", "net_gross": "unknown"}
        }),
    ];

    for input in inputs {
        let item = decode_item(&input)?;
        assert_eq!(item.to_value()?, input);
    }
    Ok(())
}

#[test]
fn test_legacy_holdings_document() {
    let legacy = json!({
        "target_retirement_age": 60,
        "employment_status": "retried",
        "current_income": [
            {"description": "Pension drawdown", "inflow": true, "amount": 1800,
             "currency": "GBP", "frequency": "monthly", "is_gross": true}
        ],
        "current_expenses": [
            {"description": "Household", "inflow": false, "amount": 2100,
             "currency": "GBP", "frequency": "monthly", "is_gross": false}
        ],
        "pension_holdings": [
            {"description": "Aviva SIPP", "type": "sipp",
             "value": {"description": null, "amount": 310000, "currency": "GBP"},
             "contribution": null}
        ],
        "debt_holdings": [
            {"description": "Halifax mortgage", "type": "mortgage",
             "balance": {"description": null, "amount": 95000, "currency": "GBP"},
             "repayment": null}
        ]
    });

    let mut record = PersonRecord::default();
    record.identity.occupation = Some("Teacher".to_string());

    let processed =
        process_extraction(&record, &legacy, &ReconcileOptions::default()).unwrap();
    assert_eq!(processed.shape, SchemaShape::HoldingsSummary);
    assert_eq!(
        processed.record.identity.employment_status,
        Some(EmploymentStatus::Retired)
    );
    assert_eq!(processed.record.identity.occupation.as_deref(), Some("Teacher"));

    let kinds: Vec<ItemKind> = processed.record.balance.iter().map(FinancialItem::kind).collect();
    assert_eq!(
        kinds,
        vec![ItemKind::SalaryIncome, ItemKind::Expenses, ItemKind::Sipp, ItemKind::MainResidence]
    );

    let mortgage = processed.record.balance.get(4).unwrap().to_value().unwrap();
    assert_eq!(mortgage["loan"]["balance"]["amount"], 95000);

    let warned: Vec<String> = processed.warnings.iter().map(|w| w.path.to_string()).collect();
    assert_eq!(warned, vec!["debt_holdings[0].type", "debt_holdings[0]"]);

    println!("✓ Legacy holdings test passed");
}

#[test]
fn test_unknown_document_shape() {
    let errors = process_extraction(
        &PersonRecord::default(),
        &json!({"schema": "v7", "assets": []}),
        &ReconcileOptions::default(),
    )
    .unwrap_err();
    assert_eq!(errors[0].kind(), ErrorKind::UnsupportedSchemaVersion);
}

#[test]
fn test_options_load_from_json_config() {
    let options: ReconcileOptions =
        serde_json::from_str(r#"{"retention": "drop_absent", "all_or_nothing": true}"#).unwrap();
    assert_eq!(options, ReconcileOptions::full_replacement().all_or_nothing(true));
}

#[test]
fn test_schema_generation() {
    let schema_json = BalanceSheet::schema_as_json().unwrap();

    let mut file = File::create(std::env::temp_dir().join("balance_sheet_schema.json")).unwrap();
    file.write_all(schema_json.as_bytes()).unwrap();

    for tag in KIND_TABLE.iter().map(|spec| spec.tag) {
        assert!(schema_json.contains(tag), "schema is missing {}", tag);
    }
    assert!(schema_json.contains("employer_contribution"));

    let llm_schema = BalanceSheet::llm_response_schema().unwrap();
    assert!(!llm_schema.to_string().contains("$ref"));

    println!("✓ Schema generation test passed - output: balance_sheet_schema.json");
}
