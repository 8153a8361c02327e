//! Reconciler: drives both pipelines, matches their final tables and
//! classifies the differences

use std::sync::Arc;

use crate::pipeline::core::Pipeline;
use crate::reconciliation::classifier::{check_compare_fields, classify, Discrepancy, RuleSet};
use crate::reconciliation::config::ReconConfig;
use crate::reconciliation::matching::{match_tables, MatchResult};
use crate::reconciliation::report::{ReconSummary, ReconciliationReport};
use crate::table::Table;
use crate::traits::*;
use crate::types::*;

/// Results of one reconciliation, borrowing the two final tables
#[derive(Debug, Clone)]
pub struct Reconciliation<'a> {
    name: String,
    matches: MatchResult<'a>,
    discrepancies: Vec<Discrepancy>,
    summary: ReconSummary,
}

impl<'a> Reconciliation<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self) -> &MatchResult<'a> {
        &self.matches
    }

    pub fn discrepancies(&self) -> &[Discrepancy] {
        &self.discrepancies
    }

    pub fn summary(&self) -> &ReconSummary {
        &self.summary
    }

    /// Copy everything the reporting collaborator needs into an owned report
    pub fn to_report(&self) -> ReconciliationReport {
        ReconciliationReport::new(&self.name, &self.matches, &self.discrepancies, &self.summary)
    }
}

/// Runs a configured reconciliation
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: ReconConfig,
    rules: RuleSet,
}

impl Reconciler {
    /// Create a reconciler after validating `config`
    pub fn new(config: ReconConfig) -> ReconResult<Self> {
        config.validate()?;
        let rules = config.rule_set();
        Ok(Self { config, rules })
    }

    pub fn from_toml(text: &str) -> ReconResult<Self> {
        Self::new(ReconConfig::from_toml(text)?)
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Seed a pipeline with this side's configured steps
    pub fn build_pipeline(&self, side: Side, table: Table) -> ReconResult<Pipeline> {
        let mut pipeline = Pipeline::new(side, table)
            .with_key_columns(self.config.key_columns.clone())
            .with_options(self.config.execution_options())?;
        for step in self.config.steps(side) {
            pipeline.add_step(step.clone())?;
        }
        Ok(pipeline)
    }

    pub fn build_pipelines(&self, left: Table, right: Table) -> ReconResult<(Pipeline, Pipeline)> {
        Ok((
            self.build_pipeline(Side::Left, left)?,
            self.build_pipeline(Side::Right, right)?,
        ))
    }

    /// Load both tables from an ingestion collaborator and build their pipelines
    pub async fn load_pipelines<S: TableSource + ?Sized>(
        &self,
        source: &S,
        left_name: &str,
        right_name: &str,
    ) -> ReconResult<(Pipeline, Pipeline)> {
        let left = source.load_table(left_name).await?;
        let right = source.load_table(right_name).await?;
        self.build_pipelines(left, right)
    }

    /// Run both pipelines on their own threads; they share no mutable state.
    ///
    /// Both runs complete before any error is returned, left first.
    pub fn run_pipelines(
        &self,
        left: &mut Pipeline,
        right: &mut Pipeline,
    ) -> ReconResult<(Arc<Table>, Arc<Table>)> {
        let (left_result, right_result) = std::thread::scope(|scope| {
            let left_handle = scope.spawn(move || left.run());
            let right_handle = scope.spawn(move || right.run());
            (left_handle.join(), right_handle.join())
        });

        let left_table = left_result
            .map_err(|_| ReconError::Execution("left pipeline thread panicked".to_string()))??;
        let right_table = right_result
            .map_err(|_| ReconError::Execution("right pipeline thread panicked".to_string()))??;
        Ok((left_table, right_table))
    }

    /// Match and classify two executed pipelines
    pub fn reconcile<'a>(
        &self,
        left: &'a Pipeline,
        right: &'a Pipeline,
    ) -> ReconResult<Reconciliation<'a>> {
        for pipeline in [left, right] {
            if !pipeline.is_ready_for_join() {
                return Err(ReconError::PipelineNotReady {
                    side: pipeline.side(),
                    status: pipeline.status().to_string(),
                });
            }
        }
        self.reconcile_tables(left.table(), right.table())
    }

    /// Match and classify two tables directly, bypassing pipeline state
    pub fn reconcile_tables<'a>(
        &self,
        left: &'a Table,
        right: &'a Table,
    ) -> ReconResult<Reconciliation<'a>> {
        check_compare_fields(left, right, &self.config.compare_fields)?;
        let matches = match_tables(
            left,
            right,
            &self.config.key_columns,
            &self.config.match_options(),
        )?;
        let discrepancies = classify(&matches, &self.config.compare_fields, &self.rules);
        let summary = ReconSummary::from_results(&matches, &discrepancies);

        tracing::info!(
            name = %self.config.name,
            matched = summary.matched,
            missing_from_right = summary.missing_from_right,
            missing_from_left = summary.missing_from_left,
            ambiguous_keys = summary.ambiguous_keys,
            discrepancies = summary.discrepancies,
            "Reconciliation complete"
        );

        Ok(Reconciliation {
            name: self.config.name.clone(),
            matches,
            discrepancies,
            summary,
        })
    }

    /// Hand a finished reconciliation to the reporting collaborator
    pub async fn publish<S: ReportSink + ?Sized>(
        &self,
        reconciliation: &Reconciliation<'_>,
        sink: &mut S,
    ) -> ReconResult<ReconciliationReport> {
        let report = reconciliation.to_report();
        sink.publish(&report).await?;
        tracing::info!(run_id = %report.run_id, name = %report.name, "Published report");
        Ok(report)
    }
}
