//! Step execution.
//!
//! Applies one step to a table and returns a new table plus the diagnostics
//! the step produced. Row work runs in batches; the cancellation flag is
//! checked before each batch so a long step can be aborted without leaving a
//! partial result behind.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::pipeline::expression;
use crate::pipeline::step::*;
use crate::table::{Column, Table};
use crate::types::*;
use crate::utils::parse_amount;

/// Rows processed between cancellation checks unless configured otherwise
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Shared flag a caller flips to abort a running step
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// Knobs controlling how a step walks its rows
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub batch_size: usize,
    pub cancel: CancellationFlag,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: CancellationFlag::new(),
        }
    }
}

impl ExecutionOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn check_cancelled(&self, rows_processed: usize) -> StepResult<()> {
        if self.cancel.is_cancelled() {
            tracing::warn!(rows_processed, "Step cancelled between batches");
            return Err(StepError::Cancelled { rows_processed });
        }
        Ok(())
    }
}

/// A step's result: the new table and any row-level findings
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub table: Table,
    pub diagnostics: Vec<Diagnostic>,
}

impl StepOutput {
    fn new(table: Table) -> Self {
        Self {
            table,
            diagnostics: Vec::new(),
        }
    }
}

/// Execute a step with default options
pub fn execute(step: &Step, input: &Table) -> StepResult<StepOutput> {
    execute_with(step, input, &ExecutionOptions::default())
}

/// Execute a step against `input`, producing a new table
pub fn execute_with(
    step: &Step,
    input: &Table,
    options: &ExecutionOptions,
) -> StepResult<StepOutput> {
    step.validate()?;

    tracing::debug!(
        step = %step,
        rows = input.row_count(),
        batch_size = options.batch_size,
        "Executing step"
    );

    let output = match step {
        Step::RenameColumn(c) => Ok(StepOutput::new(input.with_renamed(&c.from, &c.to)?)),
        Step::FilterRows(c) => filter_rows(c, input, options),
        Step::NormalizeAmount(c) => normalize_amount_column(c, input, options),
        Step::DeriveColumn(c) => derive_column(c, input, options),
        Step::SplitColumn(c) => split_column(c, input, options),
        Step::MergeColumns(c) => merge_columns(c, input, options),
        Step::DropColumns(c) => Ok(StepOutput::new(input.without_columns(&c.columns)?)),
        Step::TrimWhitespace(c) => trim_whitespace(c, input, options),
        Step::ParseDate(c) => parse_date(c, input, options),
    }?;

    if !output.diagnostics.is_empty() {
        tracing::warn!(
            step = %step,
            diagnostics = output.diagnostics.len(),
            "Step produced diagnostics"
        );
    }

    Ok(output)
}

/// Run `f` over every row index, checking for cancellation between batches
fn for_each_row(
    rows: usize,
    options: &ExecutionOptions,
    mut f: impl FnMut(usize) -> StepResult<()>,
) -> StepResult<()> {
    let batch_size = options.batch_size.max(1);
    let mut start = 0;
    while start < rows {
        options.check_cancelled(start)?;
        let end = rows.min(start + batch_size);
        for row in start..end {
            f(row)?;
        }
        start = end;
    }
    Ok(())
}

fn map_rows(
    rows: usize,
    options: &ExecutionOptions,
    mut f: impl FnMut(usize) -> StepResult<Value>,
) -> StepResult<Vec<Value>> {
    let mut out = Vec::with_capacity(rows);
    for_each_row(rows, options, |row| {
        out.push(f(row)?);
        Ok(())
    })?;
    Ok(out)
}

fn filter_rows(
    config: &FilterRows,
    input: &Table,
    options: &ExecutionOptions,
) -> StepResult<StepOutput> {
    let values = input.require_column(&config.column)?.values();
    let ordered = match config.operator {
        FilterOperator::Gt | FilterOperator::Lt => Some(config.ordered_operand()?),
        _ => None,
    };

    let mut keep = Vec::with_capacity(input.row_count());
    let mut diagnostics = Vec::new();

    for_each_row(input.row_count(), options, |row| {
        let cell = &values[row];
        let verdict = match config.operator {
            FilterOperator::IsEmpty => Ok(cell.is_empty()),
            FilterOperator::Contains => {
                let needle = config.operand()?;
                Ok(!cell.is_null() && cell.render().contains(needle))
            }
            FilterOperator::Eq => Ok(loosely_equal(cell, config.operand()?)),
            FilterOperator::Ne => Ok(!loosely_equal(cell, config.operand()?)),
            FilterOperator::Gt | FilterOperator::Lt => {
                let operand = ordered.as_ref().ok_or_else(|| {
                    StepError::Execution("missing ordered operand".to_string())
                })?;
                compare_ordered(cell, operand).map(|ordering| match config.operator {
                    FilterOperator::Gt => ordering == Ordering::Greater,
                    _ => ordering == Ordering::Less,
                })
            }
        };

        match verdict {
            Ok(true) => keep.push(row),
            Ok(false) => {}
            Err(reason) => diagnostics.push(
                Diagnostic::new(DiagnosticKind::RowDropped, reason)
                    .at_row(row)
                    .in_column(config.column.as_str()),
            ),
        }
        Ok(())
    })?;

    let table = if keep.len() == input.row_count() {
        input.clone()
    } else {
        input.select_rows(&keep)
    };

    Ok(StepOutput { table, diagnostics })
}

/// `eq`/`ne` semantics: numeric when both sides are numbers, else canonical text
fn loosely_equal(cell: &Value, operand: &str) -> bool {
    if let (Some(a), Ok(b)) = (cell.to_number(), BigDecimal::from_str(operand.trim())) {
        return a == b;
    }
    if let (Some(a), Ok(b)) = (
        cell.as_date(),
        NaiveDate::parse_from_str(operand.trim(), DATE_OPERAND_FORMAT),
    ) {
        return a == b;
    }
    cell.render() == operand
}

/// Order a cell against a `gt`/`lt` operand; `Err` explains why the row is dropped
fn compare_ordered(cell: &Value, operand: &OrderedOperand) -> Result<Ordering, String> {
    match operand {
        OrderedOperand::Number(n) => cell
            .to_number()
            .map(|v| v.cmp(n))
            .ok_or_else(|| format!("cannot compare {} value '{}' with a number", cell.type_name(), cell)),
        OrderedOperand::Date(d) => {
            let date = match cell {
                Value::Date(date) => Some(*date),
                Value::Text(s) => NaiveDate::parse_from_str(s.trim(), DATE_OPERAND_FORMAT).ok(),
                _ => None,
            };
            date.map(|v| v.cmp(d))
                .ok_or_else(|| format!("cannot compare {} value '{}' with a date", cell.type_name(), cell))
        }
    }
}

fn normalize_amount_column(
    config: &NormalizeAmount,
    input: &Table,
    options: &ExecutionOptions,
) -> StepResult<StepOutput> {
    let values = input.require_column(&config.column)?.values();
    let rescale = |n: BigDecimal| match config.scale {
        Some(scale) => n.round(scale),
        None => n,
    };

    let normalized = map_rows(input.row_count(), options, |row| match &values[row] {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => Ok(Value::Number(rescale(n.clone()))),
        Value::Text(s) => match parse_amount(s, config.format) {
            Ok(Some(n)) => Ok(Value::Number(rescale(n))),
            Ok(None) => Ok(Value::Null),
            Err(reason) => Err(StepError::Type(format!(
                "row {} column '{}': {}",
                row, config.column, reason
            ))),
        },
        Value::Date(d) => Err(StepError::Type(format!(
            "row {} column '{}': date {} is not an amount",
            row, config.column, d
        ))),
    })?;

    Ok(StepOutput::new(input.with_replaced(&config.column, normalized)?))
}

fn derive_column(
    config: &DeriveColumn,
    input: &Table,
    options: &ExecutionOptions,
) -> StepResult<StepOutput> {
    if input.has_column(&config.name) {
        return Err(StepError::Schema(format!(
            "column '{}' already exists",
            config.name
        )));
    }

    let expr = expression::parse(&config.expression)
        .map_err(|e| StepError::Config(format!("derive-column: {}", e)))?;
    if let Some(missing) = expr.columns().into_iter().find(|c| !input.has_column(c)) {
        return Err(StepError::Config(format!(
            "derive-column '{}' references missing column '{}'",
            config.name, missing
        )));
    }

    let values = map_rows(input.row_count(), options, |row| expr.evaluate(input, row))?;
    Ok(StepOutput::new(input.with_column(&config.name, values)?))
}

fn split_column(
    config: &SplitColumn,
    input: &Table,
    options: &ExecutionOptions,
) -> StepResult<StepOutput> {
    let values = input.require_column(&config.column)?.values();
    let parts = config.into.len();
    let mut outputs: Vec<Vec<Value>> = vec![Vec::with_capacity(input.row_count()); parts];

    for_each_row(input.row_count(), options, |row| {
        let cell = &values[row];
        if cell.is_null() {
            outputs.iter_mut().for_each(|out| out.push(Value::Null));
            return Ok(());
        }

        let rendered = cell.render();
        let mut pieces = rendered.splitn(parts, config.delimiter.as_str());
        for out in outputs.iter_mut() {
            out.push(pieces.next().map(Value::text).unwrap_or(Value::Null));
        }
        Ok(())
    })?;

    let mut table = if config.keep_source {
        input.clone()
    } else {
        input.without_columns(std::slice::from_ref(&config.column))?
    };
    for (name, values) in config.into.iter().zip(outputs) {
        table = table.with_column(name, values)?;
    }

    Ok(StepOutput::new(table))
}

fn merge_columns(
    config: &MergeColumns,
    input: &Table,
    options: &ExecutionOptions,
) -> StepResult<StepOutput> {
    let sources: Vec<&Column> = config
        .columns
        .iter()
        .map(|name| input.require_column(name))
        .collect::<StepResult<_>>()?;

    let merged = map_rows(input.row_count(), options, |row| {
        let parts: Vec<String> = sources
            .iter()
            .map(|c| &c.values()[row])
            .filter(|v| !v.is_null())
            .map(Value::render)
            .collect();
        Ok(if parts.is_empty() {
            Value::Null
        } else {
            Value::Text(parts.join(&config.separator))
        })
    })?;

    let table = if config.drop_sources {
        input.without_columns(&config.columns)?
    } else {
        input.clone()
    };

    Ok(StepOutput::new(table.with_column(&config.into, merged)?))
}

fn trim_whitespace(
    config: &TrimWhitespace,
    input: &Table,
    options: &ExecutionOptions,
) -> StepResult<StepOutput> {
    let targets: Vec<String> = if config.columns.is_empty() {
        input.column_names().into_iter().map(str::to_string).collect()
    } else {
        for name in &config.columns {
            input.require_column(name)?;
        }
        config.columns.clone()
    };

    let mut table = input.clone();
    for name in &targets {
        let values = input.require_column(name)?.values();
        if !values
            .iter()
            .any(|v| matches!(v, Value::Text(s) if s.trim().len() != s.len()))
        {
            continue;
        }

        let trimmed = map_rows(input.row_count(), options, |row| {
            Ok(match &values[row] {
                Value::Text(s) => Value::Text(s.trim().to_string()),
                other => other.clone(),
            })
        })?;
        table = table.with_replaced(name, trimmed)?;
    }

    Ok(StepOutput::new(table))
}

fn parse_date(
    config: &ParseDate,
    input: &Table,
    options: &ExecutionOptions,
) -> StepResult<StepOutput> {
    let values = input.require_column(&config.column)?.values();

    let parsed = map_rows(input.row_count(), options, |row| match &values[row] {
        Value::Null => Ok(Value::Null),
        Value::Date(d) => Ok(Value::Date(*d)),
        Value::Text(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::Text(s) => NaiveDate::parse_from_str(s.trim(), &config.format)
            .map(Value::Date)
            .map_err(|_| {
                StepError::Type(format!(
                    "row {} column '{}': '{}' does not match date format '{}'",
                    row, config.column, s, config.format
                ))
            }),
        Value::Number(n) => Err(StepError::Type(format!(
            "row {} column '{}': number {} is not a date",
            row, config.column, n
        ))),
    })?;

    Ok(StepOutput::new(input.with_replaced(&config.column, parsed)?))
}
