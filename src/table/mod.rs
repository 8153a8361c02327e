//! Immutable columnar table used as the unit of every pipeline snapshot
//!
//! A [`Table`] never changes after construction. Every transformation returns a
//! new table; columns the transformation did not touch share their storage with
//! the input table through an `Arc`, so a long history of snapshots only pays
//! for the columns each step actually rewrote.

use std::collections::HashSet;
use std::sync::Arc;

use crate::types::*;

/// A named column of values
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    values: Arc<Vec<Value>>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values: Arc::new(values),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: Arc::clone(&self.values),
        }
    }
}

/// Ordered columns plus ordered rows; every row has a value for every column
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    /// Build a table from column names and row-major values
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> StepResult<Self> {
        validate_column_names(&columns)?;

        let mut data: Vec<Vec<Value>> = columns
            .iter()
            .map(|_| Vec::with_capacity(rows.len()))
            .collect();
        let row_count = rows.len();

        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(StepError::Schema(format!(
                    "row {} has {} values but the table declares {} columns",
                    index,
                    row.len(),
                    columns.len()
                )));
            }
            for (slot, value) in data.iter_mut().zip(row) {
                slot.push(value);
            }
        }

        Ok(Self {
            columns: columns
                .into_iter()
                .zip(data)
                .map(|(name, values)| Column::new(name, values))
                .collect(),
            row_count,
        })
    }

    /// Build a table from column-major data
    pub fn from_columns(columns: Vec<(String, Vec<Value>)>) -> StepResult<Self> {
        let names: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();
        validate_column_names(&names)?;

        let row_count = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        if let Some((name, values)) = columns.iter().find(|(_, v)| v.len() != row_count) {
            return Err(StepError::Schema(format!(
                "column '{}' has {} values, expected {}",
                name,
                values.len(),
                row_count
            )));
        }

        Ok(Self {
            columns: columns
                .into_iter()
                .map(|(name, values)| Column::new(name, values))
                .collect(),
            row_count,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column, failing with a schema error when it is absent
    pub fn require_column(&self, name: &str) -> StepResult<&Column> {
        self.column(name)
            .ok_or_else(|| StepError::Schema(format!("column '{}' not found", name)))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        self.column(column).and_then(|c| c.values.get(row))
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        (index < self.row_count).then_some(Row { table: self, index })
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        (0..self.row_count).map(move |index| Row { table: self, index })
    }

    /// True when both tables hold the very same storage for `column`
    pub fn shares_column(&self, other: &Table, column: &str) -> bool {
        match (self.column(column), other.column(column)) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a.values, &b.values),
            _ => false,
        }
    }

    /// New table with column `from` renamed to `to`; storage is shared
    pub fn with_renamed(&self, from: &str, to: &str) -> StepResult<Table> {
        self.require_column(from)?;
        if from != to && self.has_column(to) {
            return Err(StepError::Schema(format!("column '{}' already exists", to)));
        }

        Ok(Table {
            columns: self
                .columns
                .iter()
                .map(|c| if c.name == from { c.renamed(to) } else { c.clone() })
                .collect(),
            row_count: self.row_count,
        })
    }

    /// New table with an extra column appended at the end
    pub fn with_column(&self, name: &str, values: Vec<Value>) -> StepResult<Table> {
        if self.has_column(name) {
            return Err(StepError::Schema(format!("column '{}' already exists", name)));
        }
        self.check_length(name, values.len())?;

        let mut columns = self.columns.clone();
        columns.push(Column::new(name, values));
        Ok(Table {
            columns,
            row_count: self.row_count,
        })
    }

    /// New table with the values of an existing column replaced in place
    pub fn with_replaced(&self, name: &str, values: Vec<Value>) -> StepResult<Table> {
        let index = self
            .column_index(name)
            .ok_or_else(|| StepError::Schema(format!("column '{}' not found", name)))?;
        self.check_length(name, values.len())?;

        let mut columns = self.columns.clone();
        columns[index] = Column::new(name, values);
        Ok(Table {
            columns,
            row_count: self.row_count,
        })
    }

    /// New table without the named columns
    pub fn without_columns(&self, names: &[String]) -> StepResult<Table> {
        for name in names {
            self.require_column(name)?;
        }

        Ok(Table {
            columns: self
                .columns
                .iter()
                .filter(|c| !names.contains(&c.name))
                .cloned()
                .collect(),
            row_count: self.row_count,
        })
    }

    /// New table keeping only the given row indices, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .map(|c| {
                    Column::new(
                        c.name.clone(),
                        indices
                            .iter()
                            .filter_map(|&i| c.values.get(i).cloned())
                            .collect(),
                    )
                })
                .collect(),
            row_count: indices.iter().filter(|&&i| i < self.row_count).count(),
        }
    }

    fn check_length(&self, name: &str, len: usize) -> StepResult<()> {
        if len != self.row_count {
            return Err(StepError::Execution(format!(
                "column '{}' produced {} values for {} rows",
                name, len, self.row_count
            )));
        }
        Ok(())
    }
}

/// Borrowed view of a single row
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> Row<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.table.value(self.index, column)
    }

    /// `(column, value)` pairs in column order
    pub fn values(&self) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        let index = self.index;
        self.table
            .columns
            .iter()
            .map(move |c| (c.name(), &c.values[index]))
    }

    pub fn to_pairs(&self) -> Vec<(String, Value)> {
        self.values()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }
}

fn validate_column_names(names: &[String]) -> StepResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        crate::utils::validate_column_name(name).map_err(StepError::Schema)?;
        if !seen.insert(name.as_str()) {
            return Err(StepError::Schema(format!("duplicate column '{}'", name)));
        }
    }
    Ok(())
}
