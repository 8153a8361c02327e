//! Basic reconciliation example

use reconciliation_core::utils::{MemorySink, MemorySource};
use reconciliation_core::{Reconciler, Value};

const CONFIG: &str = r#"
name = "Processor settlement vs ledger"
key_columns = ["transaction_id"]
compare_fields = ["amount"]
fee_threshold = "10.00"

[[left.steps]]
kind = "normalize-amount"
column = "amount"

[[right.steps]]
kind = "rename-column"
from = "id"
to = "transaction_id"

[[right.steps]]
kind = "normalize-amount"
column = "net"
format = "european"

[[right.steps]]
kind = "rename-column"
from = "net"
to = "amount"
"#;

fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🧾 Reconciliation Core - Basic Reconciliation Example\n");

    // Stand-in for the file parser
    let source = MemorySource::new();
    source.insert_rows(
        "ledger",
        cols(&["transaction_id", "amount"]),
        vec![
            vec![Value::text("TXN-1"), Value::text("$127.50")],
            vec![Value::text("TXN-2"), Value::text("$1,250.00")],
            vec![Value::text("TXN-3"), Value::text("(15.00)")],
            vec![Value::text("TXN-3"), Value::text("$8.00")],
        ],
    )?;
    source.insert_rows(
        "settlement",
        cols(&["id", "net"]),
        vec![
            vec![Value::text("TXN-1"), Value::text("124,32")],
            vec![Value::text("TXN-2"), Value::text("1.200,00")],
            vec![Value::text("TXN-3"), Value::text("-15,00")],
            vec![Value::text("TXN-4"), Value::text("45,20")],
        ],
    )?;

    // 1. Build one pipeline per side from the configuration
    let reconciler = Reconciler::from_toml(CONFIG)?;
    let (mut left, mut right) = reconciler
        .load_pipelines(&source, "ledger", "settlement")
        .await?;

    println!("⚙️  Running pipelines...");
    reconciler.run_pipelines(&mut left, &mut right)?;
    for pipeline in [&left, &right] {
        println!(
            "  ✓ {} side: {} steps, {} rows",
            pipeline.side(),
            pipeline.history().cursor(),
            pipeline.table().row_count()
        );
    }
    println!();

    // 2. Match and classify
    let result = reconciler.reconcile(&left, &right)?;
    let summary = result.summary();
    println!("📊 Summary");
    println!("  Matched:            {}", summary.matched);
    println!("  Missing from right: {}", summary.missing_from_right);
    println!("  Missing from left:  {}", summary.missing_from_left);
    println!("  Ambiguous keys:     {}", summary.ambiguous_keys);
    println!();

    println!("🔍 Discrepancies");
    for d in result.discrepancies() {
        let delta = d
            .delta
            .as_ref()
            .map(|delta| delta.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {}: {} vs {} (delta {}) => {}",
            d.key, d.field, d.left, d.right, delta, d.classification
        );
    }
    for warning in result.matches().warnings() {
        println!(
            "  ⚠️  key {} appears {} times on the left and {} on the right",
            warning.key, warning.left_count, warning.right_count
        );
    }
    println!();

    // 3. Peek at the right side before its final rename
    let before_rename = right.preview(2)?;
    println!(
        "↩️  Right side before the final rename has columns: {:?}",
        before_rename.column_names()
    );

    // 4. Hand the report to the renderer
    let mut sink = MemorySink::new();
    let report = reconciler.publish(&result, &mut sink).await?;
    println!("\n📤 Published report {} ({} reports stored)", report.run_id, sink.len()?);

    Ok(())
}
