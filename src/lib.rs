//! # Reconciliation Core
//!
//! A reconciliation library that normalizes two financial datasets (typically a
//! ledger export and a payment-processor settlement file), joins them on key
//! columns and classifies the differences.
//!
//! ## Features
//!
//! - **Step pipelines**: Rename, filter, normalize amounts, derive, split and merge columns
//! - **History**: Every step result is kept; revert, redo and preview are snapshot lookups
//! - **Matching**: Single-pass hash join with first-appearance pairing of duplicate keys
//! - **Classification**: Ordered, configurable rules over signed deltas
//! - **Fixed-point amounts**: All money is `BigDecimal`, never binary floating point
//! - **Collaborator seams**: Ingestion and reporting plug in through async traits
//!
//! ## Quick Start
//!
//! ```rust
//! use reconciliation_core::{Reconciler, Table, Value};
//!
//! let config = r#"
//! key_columns = ["id"]
//!
//! [[left.steps]]
//! kind = "normalize-amount"
//! column = "amount"
//!
//! [[right.steps]]
//! kind = "normalize-amount"
//! column = "amount"
//! "#;
//!
//! let reconciler = Reconciler::from_toml(config).unwrap();
//! let columns = vec!["id".to_string(), "amount".to_string()];
//! let ledger = Table::new(
//!     columns.clone(),
//!     vec![vec![Value::text("TXN-1"), Value::text("$127.50")]],
//! )
//! .unwrap();
//! let settlement = Table::new(
//!     columns,
//!     vec![vec![Value::text("TXN-1"), Value::text("124.32")]],
//! )
//! .unwrap();
//!
//! let (mut left, mut right) = reconciler.build_pipelines(ledger, settlement).unwrap();
//! reconciler.run_pipelines(&mut left, &mut right).unwrap();
//!
//! let result = reconciler.reconcile(&left, &right).unwrap();
//! assert_eq!(result.discrepancies()[0].classification, "Processing Fee Error");
//! ```

pub mod pipeline;
pub mod reconciliation;
pub mod table;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use pipeline::{
    CancellationFlag, ExecutionOptions, FilterOperator, HistoryEntry, HistoryLog, Pipeline,
    PipelineStatus, Step, StepFailure, StepOutput,
};
pub use reconciliation::*;
pub use table::{Column, Row, Table};
pub use traits::*;
pub use types::*;
pub use utils::AmountFormat;

// Re-export step builders for convenience
pub use pipeline::step::steps;
