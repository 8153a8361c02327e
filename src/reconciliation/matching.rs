//! Key-based join that partitions two tables into matched and missing rows

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::table::{Row, Table};
use crate::types::*;
use crate::utils::validate_key_columns;

/// Separator between the rendered parts of a composite key
const KEY_SEPARATOR: char = '\u{1f}';

/// Options for the matching pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Abort on the first duplicated key instead of warning
    pub fail_on_ambiguous: bool,
}

/// A left row and a right row sharing a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub key: String,
    pub left_row: usize,
    pub right_row: usize,
}

/// A row without a counterpart on the other side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedRow {
    /// `None` when a key column was empty
    pub key: Option<String>,
    pub row: usize,
}

/// A key that appears more than once on at least one side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguousKeyWarning {
    pub key: String,
    pub left_count: usize,
    pub right_count: usize,
}

/// Outcome of matching two tables; borrows both tables
#[derive(Debug, Clone)]
pub struct MatchResult<'a> {
    left: &'a Table,
    right: &'a Table,
    key_columns: Vec<String>,
    matched: Vec<MatchedPair>,
    missing_from_right: Vec<UnmatchedRow>,
    missing_from_left: Vec<UnmatchedRow>,
    warnings: Vec<AmbiguousKeyWarning>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> MatchResult<'a> {
    pub fn left(&self) -> &'a Table {
        self.left
    }

    pub fn right(&self) -> &'a Table {
        self.right
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn matched(&self) -> &[MatchedPair] {
        &self.matched
    }

    /// Left rows with no right counterpart
    pub fn missing_from_right(&self) -> &[UnmatchedRow] {
        &self.missing_from_right
    }

    /// Right rows with no left counterpart
    pub fn missing_from_left(&self) -> &[UnmatchedRow] {
        &self.missing_from_left
    }

    pub fn warnings(&self) -> &[AmbiguousKeyWarning] {
        &self.warnings
    }

    /// Rows excluded from the join because a key column was empty
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn left_row(&self, pair: &MatchedPair) -> Option<Row<'a>> {
        self.left.row(pair.left_row)
    }

    pub fn right_row(&self, pair: &MatchedPair) -> Option<Row<'a>> {
        self.right.row(pair.right_row)
    }

    /// Every row of both tables lands in exactly one partition
    pub fn is_complete(&self) -> bool {
        let mut left_seen = vec![false; self.left.row_count()];
        let mut right_seen = vec![false; self.right.row_count()];

        let lefts = self
            .matched
            .iter()
            .map(|p| p.left_row)
            .chain(self.missing_from_right.iter().map(|u| u.row));
        let rights = self
            .matched
            .iter()
            .map(|p| p.right_row)
            .chain(self.missing_from_left.iter().map(|u| u.row));

        mark_once(&mut left_seen, lefts)
            && mark_once(&mut right_seen, rights)
            && left_seen.iter().all(|seen| *seen)
            && right_seen.iter().all(|seen| *seen)
    }
}

fn mark_once(seen: &mut [bool], rows: impl Iterator<Item = usize>) -> bool {
    for row in rows {
        match seen.get_mut(row) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

/// Canonical join key for one row, or the first empty key column
fn row_key<'t>(table: &Table, row: usize, key_columns: &'t [String]) -> Result<String, &'t str> {
    let mut key = String::new();
    for (i, column) in key_columns.iter().enumerate() {
        let rendered = table
            .value(row, column)
            .map(|v| v.render().trim().to_string())
            .unwrap_or_default();
        if rendered.is_empty() {
            return Err(column.as_str());
        }
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(&rendered);
    }
    Ok(key)
}

/// Render a composite key for display
pub fn display_key(key: &str) -> String {
    key.replace(KEY_SEPARATOR, " | ")
}

fn null_key_diagnostic(side: Side, row: usize, column: &str) -> Diagnostic {
    Diagnostic::new(
        DiagnosticKind::NullKey,
        format!("{} row {} has no value in key column '{}'", side, row, column),
    )
    .at_row(row)
    .in_column(column)
}

fn check_key_columns(table: &Table, side: Side, key_columns: &[String]) -> ReconResult<()> {
    for column in key_columns {
        if !table.has_column(column) {
            return Err(ReconError::MissingKeyColumn {
                side,
                column: column.clone(),
            });
        }
    }
    Ok(())
}

/// Join `left` and `right` on `key_columns` in a single hash pass.
///
/// Duplicate keys pair in order of first appearance; the surplus on either
/// side falls into that side's missing partition.
pub fn match_tables<'a>(
    left: &'a Table,
    right: &'a Table,
    key_columns: &[String],
    options: &MatchOptions,
) -> ReconResult<MatchResult<'a>> {
    validate_key_columns(key_columns)?;
    check_key_columns(left, Side::Left, key_columns)?;
    check_key_columns(right, Side::Right, key_columns)?;

    let mut diagnostics = Vec::new();
    let mut key_order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut index: HashMap<String, VecDeque<usize>> = HashMap::new();
    let mut left_keys: Vec<Option<String>> = Vec::with_capacity(left.row_count());

    for row in 0..left.row_count() {
        match row_key(left, row, key_columns) {
            Ok(key) => {
                let entry = counts.entry(key.clone()).or_insert_with(|| {
                    key_order.push(key.clone());
                    (0, 0)
                });
                entry.0 += 1;
                index.entry(key.clone()).or_default().push_back(row);
                left_keys.push(Some(key));
            }
            Err(column) => {
                diagnostics.push(null_key_diagnostic(Side::Left, row, column));
                left_keys.push(None);
            }
        }
    }

    let mut matched = Vec::new();
    let mut missing_from_left = Vec::new();
    let mut left_matched = vec![false; left.row_count()];

    for row in 0..right.row_count() {
        let key = match row_key(right, row, key_columns) {
            Ok(key) => key,
            Err(column) => {
                diagnostics.push(null_key_diagnostic(Side::Right, row, column));
                missing_from_left.push(UnmatchedRow { key: None, row });
                continue;
            }
        };

        let entry = counts.entry(key.clone()).or_insert_with(|| {
            key_order.push(key.clone());
            (0, 0)
        });
        entry.1 += 1;

        match index.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(left_row) => {
                left_matched[left_row] = true;
                matched.push(MatchedPair {
                    key,
                    left_row,
                    right_row: row,
                });
            }
            None => missing_from_left.push(UnmatchedRow {
                key: Some(key),
                row,
            }),
        }
    }

    let missing_from_right: Vec<UnmatchedRow> = left_keys
        .into_iter()
        .enumerate()
        .filter(|(row, _)| !left_matched[*row])
        .map(|(row, key)| UnmatchedRow { key, row })
        .collect();

    let warnings: Vec<AmbiguousKeyWarning> = key_order
        .into_iter()
        .filter_map(|key| {
            let (left_count, right_count) = counts.get(&key).copied().unwrap_or_default();
            (left_count > 1 || right_count > 1).then_some(AmbiguousKeyWarning {
                key,
                left_count,
                right_count,
            })
        })
        .collect();

    for warning in &warnings {
        if options.fail_on_ambiguous {
            return Err(ReconError::AmbiguousKey {
                key: display_key(&warning.key),
                left_count: warning.left_count,
                right_count: warning.right_count,
            });
        }
        tracing::warn!(
            key = %display_key(&warning.key),
            left_count = warning.left_count,
            right_count = warning.right_count,
            "Ambiguous join key; pairing by first appearance"
        );
    }
    if !diagnostics.is_empty() {
        tracing::warn!(rows = diagnostics.len(), "Rows with empty key columns left unmatched");
    }

    tracing::debug!(
        matched = matched.len(),
        missing_from_right = missing_from_right.len(),
        missing_from_left = missing_from_left.len(),
        "Matched tables"
    );

    Ok(MatchResult {
        left,
        right,
        key_columns: key_columns.to_vec(),
        matched,
        missing_from_right,
        missing_from_left,
        warnings,
        diagnostics,
    })
}
