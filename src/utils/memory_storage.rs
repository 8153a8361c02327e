//! In-memory collaborators for testing and embedding

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::reconciliation::ReconciliationReport;
use crate::table::Table;
use crate::traits::*;
use crate::types::*;

fn poisoned<T>(_: T) -> ReconError {
    ReconError::Storage("in-memory store lock poisoned".to_string())
}

/// In-memory table source standing in for a file parser
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl MemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready-made table
    pub fn insert(&self, name: impl Into<String>, table: Table) -> ReconResult<()> {
        self.tables
            .write()
            .map_err(poisoned)?
            .insert(name.into(), table);
        Ok(())
    }

    /// Register a table from column names and row-major values
    pub fn insert_rows(
        &self,
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> ReconResult<()> {
        let table = Table::new(columns, rows).map_err(|e| ReconError::Schema(e.to_string()))?;
        self.insert(name, table)
    }

    /// Remove every registered table
    pub fn clear(&self) -> ReconResult<()> {
        self.tables.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

#[async_trait]
impl TableSource for MemorySource {
    async fn load_table(&self, name: &str) -> ReconResult<Table> {
        self.tables
            .read()
            .map_err(poisoned)?
            .get(name)
            .cloned()
            .ok_or_else(|| ReconError::Storage(format!("table '{}' not found", name)))
    }

    async fn table_names(&self) -> ReconResult<Vec<String>> {
        let mut names: Vec<String> = self.tables.read().map_err(poisoned)?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// In-memory report sink that keeps every published report
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    reports: Arc<RwLock<Vec<ReconciliationReport>>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports published so far, oldest first
    pub fn reports(&self) -> ReconResult<Vec<ReconciliationReport>> {
        Ok(self.reports.read().map_err(poisoned)?.clone())
    }

    pub fn len(&self) -> ReconResult<usize> {
        Ok(self.reports.read().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> ReconResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    async fn publish(&mut self, report: &ReconciliationReport) -> ReconResult<()> {
        self.reports.write().map_err(poisoned)?.push(report.clone());
        Ok(())
    }
}
