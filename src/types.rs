//! Core types and data structures for the reconciliation engine

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single typed cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Missing or empty cell
    Null,
    /// Free text
    Text(String),
    /// Fixed-point decimal; equality is numeric (`10.0 == 10.00`)
    Number(BigDecimal),
    /// Calendar date
    Date(NaiveDate),
}

impl Value {
    /// Build a text value
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    /// Build a number value from a decimal literal such as `"127.50"`,
    /// or `None` when the literal is not a plain decimal
    pub fn try_number(literal: &str) -> Option<Self> {
        BigDecimal::from_str(literal.trim()).ok().map(Value::Number)
    }

    /// Like [`Value::try_number`], but a malformed literal becomes `Value::Null`
    /// the same way an unreadable cell does. Use `try_number` to tell them apart.
    pub fn number(literal: &str) -> Self {
        Self::try_number(literal).unwrap_or(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, or text made only of whitespace
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_number(&self) -> Option<&BigDecimal> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Coerce to a decimal: numbers as-is, text when it is a plain decimal literal
    pub fn to_number(&self) -> Option<BigDecimal> {
        match self {
            Value::Number(n) => Some(n.clone()),
            Value::Text(s) => BigDecimal::from_str(s.trim()).ok(),
            _ => None,
        }
    }

    /// Canonical text rendering used for keys and concatenation.
    /// Null renders as the empty string, numbers drop trailing fractional zeros.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Number(n) => canonical_number(n),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    /// Short type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Text(_) => "text",
            Value::Number(_) => "number",
            Value::Date(_) => "date",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<BigDecimal> for Value {
    fn from(value: BigDecimal) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(BigDecimal::from(value))
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

/// Render a decimal without trailing fractional zeros, so `10.00` and `10` agree.
/// Never uses exponent notation, however small or large the magnitude.
pub fn canonical_number(n: &BigDecimal) -> String {
    let rendered = n.normalized().to_plain_string();
    if rendered == "-0" {
        return "0".to_string();
    }
    rendered
}

/// Which uploaded dataset a pipeline processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Business system ledger export
    Left,
    /// Payment-processor settlement file
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Categories of non-fatal findings reported alongside results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A row was removed because its value could not be coerced
    RowDropped,
    /// A row could not be joined because a key column was empty
    NullKey,
}

/// A non-fatal finding produced by a step or by the matching engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Row index in the table the diagnostic refers to
    pub row: Option<usize>,
    pub column: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            row: None,
            column: None,
            message: message.into(),
        }
    }

    pub fn at_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }

    pub fn in_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

/// Errors produced while executing a single step
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Type error: {0}")]
    Type(String),
    #[error("Step config error: {0}")]
    Config(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Step cancelled after {rows_processed} rows")]
    Cancelled { rows_processed: usize },
}

/// Result type for step execution
pub type StepResult<T> = Result<T, StepError>;

/// Errors that can occur in the reconciliation engine
#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("Step {index} failed: {source}")]
    StepFailed {
        /// History position the step would have occupied (1-based)
        index: usize,
        #[source]
        source: StepError,
    },
    #[error("Invalid step configuration: {0}")]
    InvalidStep(#[source] StepError),
    #[error("History index {index} out of range (valid: 0..={max})")]
    OutOfRange { index: usize, max: usize },
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Join error: no key columns configured")]
    NoKeyColumns,
    #[error("Join error: key column '{column}' missing from {side} table")]
    MissingKeyColumn { side: Side, column: String },
    #[error("Compare error: field '{field}' missing from {side} table")]
    MissingCompareField { side: Side, field: String },
    #[error("Join error: key '{key}' is ambiguous ({left_count} left rows, {right_count} right rows)")]
    AmbiguousKey {
        key: String,
        left_count: usize,
        right_count: usize,
    },
    #[error("Pipeline '{side}' is not ready for matching (status: {status})")]
    PipelineNotReady { side: Side, status: String },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Execution error: {0}")]
    Execution(String),
}

/// Result type for engine operations
pub type ReconResult<T> = Result<T, ReconError>;
