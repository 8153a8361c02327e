//! Traits for the collaborators surrounding the engine
//!
//! File parsing and report rendering live outside this crate. The engine only
//! sees them through these seams, so any parser or renderer can be plugged in
//! by implementing the matching trait.

use async_trait::async_trait;

use crate::reconciliation::ReconciliationReport;
use crate::table::Table;
use crate::types::*;

/// Ingestion collaborator: yields a structured table for an uploaded file
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Load the table registered under `name`
    async fn load_table(&self, name: &str) -> ReconResult<Table>;

    /// Names of the tables this source can provide
    async fn table_names(&self) -> ReconResult<Vec<String>>;
}

/// Reporting collaborator: consumes finished reconciliation results
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Hand a finished report to the renderer/exporter
    async fn publish(&mut self, report: &ReconciliationReport) -> ReconResult<()>;
}
