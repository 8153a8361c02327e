//! Pipeline orchestrator that owns one side's history and pending steps

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::pipeline::executor::{execute_with, CancellationFlag, ExecutionOptions, StepOutput};
use crate::pipeline::history::HistoryLog;
use crate::pipeline::step::Step;
use crate::table::Table;
use crate::traits::*;
use crate::types::*;
use crate::utils::validate_batch_size;

/// Lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Steps may be configured; nothing has run since the last change
    Idle,
    /// A step is in flight
    Executing,
    /// Every pending step has run and the cursor is at the tail
    Executed,
    /// The cursor was moved back; later entries are redo-able
    Reverted,
    /// A step failed; the cursor stays at the last successful entry
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStatus::Idle => "idle",
            PipelineStatus::Executing => "executing",
            PipelineStatus::Executed => "executed",
            PipelineStatus::Reverted => "reverted",
            PipelineStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// The step that stopped the last `run`
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    /// History position the step would have occupied
    pub index: usize,
    pub step: Step,
    pub error: StepError,
}

/// Ordered step sequence plus its history for one dataset side
#[derive(Debug, Clone)]
pub struct Pipeline {
    id: Uuid,
    side: Side,
    history: HistoryLog,
    pending: Vec<Step>,
    key_columns: Vec<String>,
    status: PipelineStatus,
    last_error: Option<StepFailure>,
    options: ExecutionOptions,
}

impl Pipeline {
    /// Create a pipeline over an ingested table
    pub fn new(side: Side, table: Table) -> Self {
        Self {
            id: Uuid::new_v4(),
            side,
            history: HistoryLog::new(table),
            pending: Vec::new(),
            key_columns: Vec::new(),
            status: PipelineStatus::Idle,
            last_error: None,
            options: ExecutionOptions::default(),
        }
    }

    /// Pull the initial table from an ingestion collaborator
    pub async fn load<S: TableSource + ?Sized>(
        source: &S,
        name: &str,
        side: Side,
    ) -> ReconResult<Self> {
        let table = source.load_table(name).await?;
        tracing::info!(
            side = %side,
            table = name,
            rows = table.row_count(),
            columns = table.column_count(),
            "Loaded table"
        );
        Ok(Self::new(side, table))
    }

    /// Declare the key columns used when this side is matched
    pub fn with_key_columns(mut self, key_columns: Vec<String>) -> Self {
        self.key_columns = key_columns;
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> ReconResult<Self> {
        validate_batch_size(options.batch_size)?;
        self.options = options;
        Ok(self)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Handle another thread can use to stop a running step between batches
    pub fn cancellation(&self) -> CancellationFlag {
        self.options.cancel.clone()
    }

    pub fn last_error(&self) -> Option<&StepFailure> {
        self.last_error.as_ref()
    }

    /// Queue a step; its configuration is checked now, not at run time
    pub fn add_step(&mut self, step: Step) -> ReconResult<()> {
        step.validate().map_err(ReconError::InvalidStep)?;
        self.pending.push(step);
        self.status = PipelineStatus::Idle;
        Ok(())
    }

    pub fn pending_steps(&self) -> &[Step] {
        &self.pending
    }

    /// Swap a queued step, typically the one that just failed
    pub fn replace_pending_step(&mut self, index: usize, step: Step) -> ReconResult<()> {
        step.validate().map_err(ReconError::InvalidStep)?;
        let max = self.pending.len().saturating_sub(1);
        let slot = self
            .pending
            .get_mut(index)
            .ok_or(ReconError::OutOfRange { index, max })?;
        *slot = step;
        self.status = PipelineStatus::Idle;
        Ok(())
    }

    pub fn remove_pending_step(&mut self, index: usize) -> ReconResult<Step> {
        if index >= self.pending.len() {
            return Err(ReconError::OutOfRange {
                index,
                max: self.pending.len().saturating_sub(1),
            });
        }
        self.status = PipelineStatus::Idle;
        Ok(self.pending.remove(index))
    }

    /// Execute every pending step in order, stopping at the first failure.
    ///
    /// A failed step stays at the front of the queue so the caller can
    /// replace it and call `run` again.
    pub fn run(&mut self) -> ReconResult<Arc<Table>> {
        self.last_error = None;

        while let Some(step) = self.pending.first().cloned() {
            self.status = PipelineStatus::Executing;
            tracing::debug!(
                pipeline = %self.id,
                side = %self.side,
                index = self.history.cursor() + 1,
                step = %step,
                "Running pipeline step"
            );

            match self.history.execute_step(step.clone(), &self.options) {
                Ok(_) => {
                    self.pending.remove(0);
                }
                Err(err) => {
                    if let ReconError::StepFailed { index, source } = &err {
                        self.last_error = Some(StepFailure {
                            index: *index,
                            step,
                            error: source.clone(),
                        });
                    }
                    self.status = PipelineStatus::Failed;
                    tracing::error!(
                        pipeline = %self.id,
                        side = %self.side,
                        error = %err,
                        "Pipeline stopped"
                    );
                    return Err(err);
                }
            }
        }

        self.status = self.settled_status();
        tracing::info!(
            pipeline = %self.id,
            side = %self.side,
            cursor = self.history.cursor(),
            rows = self.table().row_count(),
            status = %self.status,
            "Pipeline run finished"
        );
        Ok(self.current_table())
    }

    /// Snapshot at the cursor
    pub fn current_table(&self) -> Arc<Table> {
        self.history.current()
    }

    /// Borrow the snapshot at the cursor for the lifetime of `self`
    pub fn table(&self) -> &Table {
        self.history.current_entry().table().as_ref()
    }

    /// Diagnostics recorded by the step that produced the current snapshot
    pub fn current_diagnostics(&self) -> &[Diagnostic] {
        self.history.current_entry().diagnostics()
    }

    pub fn revert_to(&mut self, index: usize) -> ReconResult<Arc<Table>> {
        let table = self.history.revert_to(index)?;
        self.status = self.settled_status();
        tracing::debug!(pipeline = %self.id, side = %self.side, cursor = index, "Reverted pipeline");
        Ok(table)
    }

    pub fn redo(&mut self) -> ReconResult<Arc<Table>> {
        let table = self.history.redo()?;
        self.status = self.settled_status();
        Ok(table)
    }

    pub fn preview(&self, index: usize) -> ReconResult<Arc<Table>> {
        self.history.preview(index)
    }

    /// Try a step against the current snapshot without committing it
    pub fn preview_step(&self, step: &Step) -> ReconResult<StepOutput> {
        execute_with(step, self.table(), &self.options).map_err(|source| ReconError::StepFailed {
            index: self.history.cursor() + 1,
            source,
        })
    }

    /// Whether the current snapshot can be handed to the matching engine
    pub fn is_ready_for_join(&self) -> bool {
        self.status == PipelineStatus::Executed
    }

    fn settled_status(&self) -> PipelineStatus {
        if !self.history.is_at_tail() {
            PipelineStatus::Reverted
        } else if self.pending.is_empty() {
            PipelineStatus::Executed
        } else {
            PipelineStatus::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::step::steps::*;
    use crate::pipeline::step::FilterOperator;

    fn settlement() -> Table {
        Table::new(
            vec!["id".to_string(), "amount".to_string()],
            vec![
                vec![Value::text("TXN-1"), Value::text("$127.50")],
                vec![Value::text("TXN-2"), Value::text("(45.20)")],
                vec![Value::text("TXN-3"), Value::text("1,000.00")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_new_pipeline_is_idle() {
        let pipeline = Pipeline::new(Side::Left, settlement());
        assert_eq!(pipeline.status(), PipelineStatus::Idle);
        assert_eq!(pipeline.history().len(), 1);
        assert!(!pipeline.is_ready_for_join());
    }

    #[test]
    fn test_run_executes_pending_in_order() {
        let mut pipeline = Pipeline::new(Side::Left, settlement());
        pipeline.add_step(normalize_amount("amount")).unwrap();
        pipeline
            .add_step(filter("amount", FilterOperator::Gt, Some("0")))
            .unwrap();

        let table = pipeline.run().unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Executed);
        assert_eq!(table.row_count(), 2);
        assert!(pipeline.pending_steps().is_empty());
        assert_eq!(pipeline.history().len(), 3);
        assert!(pipeline.current_diagnostics().is_empty());
    }

    #[test]
    fn test_invalid_step_rejected_before_queueing() {
        let mut pipeline = Pipeline::new(Side::Left, settlement());
        let err = pipeline.add_step(rename("amount", "")).unwrap_err();
        assert!(matches!(err, ReconError::InvalidStep(StepError::Config(_))));
        assert!(pipeline.pending_steps().is_empty());
    }

    #[test]
    fn test_failure_is_resumable() {
        let mut pipeline = Pipeline::new(Side::Right, settlement());
        pipeline.add_step(normalize_amount("amount")).unwrap();
        pipeline.add_step(rename("missing", "x")).unwrap();
        pipeline.add_step(rename("amount", "net")).unwrap();

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, ReconError::StepFailed { index: 2, .. }));
        assert_eq!(pipeline.status(), PipelineStatus::Failed);
        assert_eq!(pipeline.history().cursor(), 1);
        assert_eq!(pipeline.pending_steps().len(), 2);

        let failure = pipeline.last_error().unwrap();
        assert_eq!(failure.index, 2);
        assert!(matches!(failure.error, StepError::Schema(_)));

        pipeline.replace_pending_step(0, rename("id", "txn_id")).unwrap();
        let table = pipeline.run().unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Executed);
        assert!(table.has_column("txn_id"));
        assert!(table.has_column("net"));
        assert!(pipeline.last_error().is_none());
    }

    #[test]
    fn test_revert_and_redo_status() {
        let mut pipeline = Pipeline::new(Side::Left, settlement());
        pipeline.add_step(normalize_amount("amount")).unwrap();
        pipeline.add_step(rename("amount", "net")).unwrap();
        pipeline.run().unwrap();

        let original = pipeline.revert_to(0).unwrap();
        assert_eq!(*original, settlement());
        assert_eq!(pipeline.status(), PipelineStatus::Reverted);
        assert!(!pipeline.is_ready_for_join());

        pipeline.redo().unwrap();
        pipeline.redo().unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Executed);
        assert!(matches!(pipeline.revert_to(7), Err(ReconError::OutOfRange { .. })));
    }

    #[test]
    fn test_preview_step_does_not_commit() {
        let pipeline = Pipeline::new(Side::Left, settlement());
        let out = pipeline.preview_step(&normalize_amount("amount")).unwrap();
        assert_eq!(out.table.value(1, "amount"), Some(&Value::number("-45.20")));
        assert_eq!(pipeline.history().len(), 1);
    }

    #[test]
    fn test_cancelled_run_commits_nothing() {
        let mut pipeline = Pipeline::new(Side::Left, settlement())
            .with_options(ExecutionOptions::default().with_batch_size(1))
            .unwrap();
        pipeline.add_step(normalize_amount("amount")).unwrap();
        pipeline.cancellation().cancel();

        let err = pipeline.run().unwrap_err();
        assert!(matches!(
            err,
            ReconError::StepFailed { source: StepError::Cancelled { .. }, .. }
        ));
        assert_eq!(pipeline.history().len(), 1);
        assert_eq!(pipeline.status(), PipelineStatus::Failed);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let result = Pipeline::new(Side::Left, settlement())
            .with_options(ExecutionOptions::default().with_batch_size(0));
        assert!(matches!(result, Err(ReconError::Config(_))));
    }

    #[tokio::test]
    async fn test_load_from_source() {
        let source = crate::utils::MemorySource::new();
        source.insert("bank", settlement()).unwrap();

        let pipeline = Pipeline::load(&source, "bank", Side::Left).await.unwrap();
        assert_eq!(pipeline.table().row_count(), 3);
        assert!(Pipeline::load(&source, "nope", Side::Left).await.is_err());
    }
}
