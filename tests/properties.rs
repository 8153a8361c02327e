// Property-based tests for pipelines, matching and amount normalization.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::HashSet;

use proptest::prelude::*;
use reconciliation_core::pipeline::executor::execute;
use reconciliation_core::{
    match_tables, steps, FilterOperator, MatchOptions, Pipeline, Side, Step, Table, Value,
};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

fn config_64() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(64),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

fn columns() -> Vec<String> {
    vec!["id".to_string(), "amount".to_string(), "memo".to_string()]
}

/// Currency text in a few of the shapes real exports use
fn arb_amount_text() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => r"-?[0-9]{1,6}(\.[0-9]{1,2})?",
        1 => r"\$[0-9]{1,3}(,[0-9]{3})?\.[0-9]{2}",
        1 => r"\([0-9]{1,4}\.[0-9]{2}\)",
        1 => Just("".to_string()),
    ]
}

fn arb_key() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => r"TXN-[0-9]{1,2}",
        1 => Just("".to_string()),
    ]
}

fn arb_table(max_rows: usize) -> impl Strategy<Value = Table> {
    proptest::collection::vec((arb_key(), arb_amount_text(), r"[a-z ]{0,8}"), 0..max_rows)
        .prop_map(|rows| {
            let rows = rows
                .into_iter()
                .map(|(id, amount, memo)| {
                    let id = if id.is_empty() { Value::Null } else { Value::text(id) };
                    vec![id, Value::text(amount), Value::text(memo)]
                })
                .collect();
            Table::new(columns(), rows).unwrap()
        })
}

/// Steps that are valid on a fresh table from `arb_table`
fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(steps::normalize_amount("amount")),
        Just(steps::rename("memo", "description")),
        Just(steps::filter("memo", FilterOperator::IsEmpty, None)),
        Just(steps::filter("id", FilterOperator::Contains, Some("1"))),
        Just(steps::merge(&["id", "memo"], "label", "/")),
        Just(steps::split("id", "-", &["prefix", "number"])),
        Just(Step::TrimWhitespace(
            reconciliation_core::pipeline::step::TrimWhitespace { columns: vec![] }
        )),
    ]
}

fn arb_steps() -> impl Strategy<Value = Vec<Step>> {
    proptest::collection::vec(arb_step(), 0..6).prop_map(|steps| {
        // one step per kind keeps the generated column names unique
        let mut seen = HashSet::new();
        steps.into_iter().filter(|s| seen.insert(s.kind())).collect()
    })
}

fn run(table: Table, steps: &[Step]) -> Option<Pipeline> {
    let mut pipeline = Pipeline::new(Side::Left, table);
    for step in steps {
        pipeline.add_step(step.clone()).ok()?;
    }
    pipeline.run().ok()?;
    Some(pipeline)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn execute_is_idempotent(table in arb_table(20), step in arb_step()) {
        let first = execute(&step, &table);
        let second = execute(&step, &table);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn partitions_cover_every_row_once(left in arb_table(25), right in arb_table(25)) {
        let keys = vec!["id".to_string()];
        let result = match_tables(&left, &right, &keys, &MatchOptions::default()).unwrap();

        prop_assert!(result.is_complete());
        prop_assert_eq!(
            result.matched().len() + result.missing_from_right().len(),
            left.row_count()
        );
        prop_assert_eq!(
            result.matched().len() + result.missing_from_left().len(),
            right.row_count()
        );
    }

    #[test]
    fn normalized_amount_matches_plain_decimal(
        units in 0u32..100_000,
        cents in 0u32..100,
    ) {
        let plain = format!("{}.{:02}", units, cents);
        let dollars = format!("${}.{:02}", units, cents);
        let short = if cents == 0 { format!("{}", units) } else { plain.clone() };

        let table = Table::new(
            vec!["amount".to_string()],
            vec![
                vec![Value::text(plain.clone())],
                vec![Value::text(dollars)],
                vec![Value::text(short)],
            ],
        )
        .unwrap();
        let out = execute(&steps::normalize_amount("amount"), &table).unwrap().table;
        let expected = Value::number(&plain);

        for row in 0..3 {
            prop_assert_eq!(out.value(row, "amount"), Some(&expected));
        }
    }
}

proptest! {
    #![proptest_config(config_64())]

    #[test]
    fn revert_matches_rerun_prefix(table in arb_table(15), steps in arb_steps()) {
        let Some(mut full) = run(table.clone(), &steps) else {
            return Ok(());
        };

        for k in 0..=steps.len() {
            let Some(partial) = run(table.clone(), &steps[..k]) else {
                return Err(TestCaseError::fail(format!("prefix {} failed", k)));
            };
            let reverted = full.revert_to(k).unwrap();
            prop_assert_eq!(&*reverted, partial.table());
        }
    }
}
