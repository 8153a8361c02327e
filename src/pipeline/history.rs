//! Append-only snapshot history with a movable cursor.
//!
//! Entry 0 always holds the ingested table. Reverting only moves the cursor;
//! the entries after it stay available for redo until a new step is executed
//! from the reverted position, at which point they are discarded.

use chrono::NaiveDateTime;
use std::sync::Arc;

use crate::pipeline::executor::{execute_with, ExecutionOptions, StepOutput};
use crate::pipeline::step::Step;
use crate::table::Table;
use crate::types::*;

/// One committed version of the table
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    step: Option<Step>,
    table: Arc<Table>,
    diagnostics: Vec<Diagnostic>,
    created_at: NaiveDateTime,
}

impl HistoryEntry {
    fn new(step: Option<Step>, table: Table, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            step,
            table: Arc::new(table),
            diagnostics,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Step that produced this entry; `None` for the ingested table
    pub fn step(&self) -> Option<&Step> {
        self.step.as_ref()
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }
}

#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    cursor: usize,
}

impl HistoryLog {
    /// Start a history whose entry 0 is the ingested table
    pub fn new(initial: Table) -> Self {
        Self {
            entries: vec![HistoryEntry::new(None, initial, Vec::new())],
            cursor: 0,
        }
    }

    /// Number of entries, including the ingested table
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// A history always holds at least the ingested table
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Index of the last entry, active or not
    pub fn tail(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_at_tail(&self) -> bool {
        self.cursor == self.tail()
    }

    /// Entries after the cursor that `redo` can restore
    pub fn redo_available(&self) -> usize {
        self.tail() - self.cursor
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> ReconResult<&HistoryEntry> {
        self.entries.get(index).ok_or(ReconError::OutOfRange {
            index,
            max: self.tail(),
        })
    }

    pub fn current_entry(&self) -> &HistoryEntry {
        &self.entries[self.cursor]
    }

    pub fn current(&self) -> Arc<Table> {
        Arc::clone(&self.current_entry().table)
    }

    pub fn original(&self) -> Arc<Table> {
        Arc::clone(&self.entries[0].table)
    }

    /// Steps from entry 1 up to and including the cursor
    pub fn active_steps(&self) -> Vec<&Step> {
        self.entries[1..=self.cursor]
            .iter()
            .filter_map(HistoryEntry::step)
            .collect()
    }

    /// Run `step` against the current table and commit the result.
    ///
    /// On failure nothing is appended and the cursor does not move.
    pub fn execute_step(
        &mut self,
        step: Step,
        options: &ExecutionOptions,
    ) -> ReconResult<Arc<Table>> {
        let index = self.cursor + 1;
        let output = execute_with(&step, &self.current_entry().table, options)
            .map_err(|source| ReconError::StepFailed { index, source })?;
        Ok(self.commit(step, output))
    }

    /// Append a finished step, discarding any redo-able tail first
    pub(crate) fn commit(&mut self, step: Step, output: StepOutput) -> Arc<Table> {
        if !self.is_at_tail() {
            tracing::debug!(
                discarded = self.redo_available(),
                cursor = self.cursor,
                "Truncating inactive history entries"
            );
            self.entries.truncate(self.cursor + 1);
        }

        self.entries
            .push(HistoryEntry::new(Some(step), output.table, output.diagnostics));
        self.cursor = self.tail();
        self.current()
    }

    /// Move the cursor to `index` without recomputing anything
    pub fn revert_to(&mut self, index: usize) -> ReconResult<Arc<Table>> {
        self.entry(index)?;
        self.cursor = index;
        Ok(self.current())
    }

    /// Move the cursor forward one entry
    pub fn redo(&mut self) -> ReconResult<Arc<Table>> {
        self.revert_to(self.cursor + 1)
    }

    /// Read any snapshot without moving the cursor
    pub fn preview(&self, index: usize) -> ReconResult<Arc<Table>> {
        Ok(Arc::clone(&self.entry(index)?.table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::step::steps::*;

    fn table() -> Table {
        Table::new(
            vec!["id".to_string(), "amount".to_string()],
            vec![vec![Value::text("TXN-1"), Value::text("$10.00")]],
        )
        .unwrap()
    }

    fn run(log: &mut HistoryLog, step: Step) -> Arc<Table> {
        log.execute_step(step, &ExecutionOptions::default()).unwrap()
    }

    #[test]
    fn test_execute_appends_and_advances() {
        let mut log = HistoryLog::new(table());
        run(&mut log, normalize_amount("amount"));
        run(&mut log, rename("amount", "gross"));
        assert_eq!(log.len(), 3);
        assert_eq!(log.cursor(), 2);
        assert_eq!(log.active_steps().len(), 2);
        assert_eq!(*log.original(), table());
    }

    #[test]
    fn test_revert_and_redo() {
        let mut log = HistoryLog::new(table());
        run(&mut log, normalize_amount("amount"));
        let renamed = run(&mut log, rename("amount", "gross"));

        let reverted = log.revert_to(1).unwrap();
        assert!(reverted.has_column("amount"));
        assert_eq!(log.redo_available(), 1);
        assert_eq!(log.len(), 3);

        let redone = log.redo().unwrap();
        assert!(Arc::ptr_eq(&redone, &renamed));
        assert!(matches!(log.redo(), Err(ReconError::OutOfRange { index: 3, max: 2 })));
    }

    #[test]
    fn test_execute_after_revert_truncates_tail() {
        let mut log = HistoryLog::new(table());
        run(&mut log, normalize_amount("amount"));
        run(&mut log, rename("amount", "gross"));
        log.revert_to(0).unwrap();

        run(&mut log, rename("amount", "raw_amount"));
        assert_eq!(log.len(), 2);
        assert_eq!(log.redo_available(), 0);
        assert!(log.current().has_column("raw_amount"));
    }

    #[test]
    fn test_failed_step_leaves_log_untouched() {
        let mut log = HistoryLog::new(table());
        run(&mut log, normalize_amount("amount"));

        let err = log
            .execute_step(rename("missing", "x"), &ExecutionOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ReconError::StepFailed { index: 2, source: StepError::Schema(_) }
        ));
        assert_eq!(log.len(), 2);
        assert_eq!(log.cursor(), 1);
    }

    #[test]
    fn test_preview_does_not_move_cursor() {
        let mut log = HistoryLog::new(table());
        run(&mut log, normalize_amount("amount"));
        let original = log.preview(0).unwrap();
        assert_eq!(*original, table());
        assert_eq!(log.cursor(), 1);
        assert!(matches!(log.preview(9), Err(ReconError::OutOfRange { .. })));
    }
}
