//! Owned, serializable results handed to the reporting collaborator

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::reconciliation::classifier::Discrepancy;
use crate::reconciliation::matching::{
    display_key, AmbiguousKeyWarning, MatchResult, MatchedPair, UnmatchedRow,
};
use crate::table::Table;
use crate::types::*;

/// Headline numbers for one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconSummary {
    pub left_rows: usize,
    pub right_rows: usize,
    pub matched: usize,
    pub missing_from_right: usize,
    pub missing_from_left: usize,
    pub ambiguous_keys: usize,
    pub discrepancies: usize,
    /// Discrepancy count per classification label
    pub label_counts: BTreeMap<String, usize>,
    /// Sum of numeric deltas per compared field
    pub net_delta: BTreeMap<String, BigDecimal>,
}

impl ReconSummary {
    pub fn from_results(matches: &MatchResult<'_>, discrepancies: &[Discrepancy]) -> Self {
        let mut label_counts = BTreeMap::new();
        let mut net_delta: BTreeMap<String, BigDecimal> = BTreeMap::new();

        for d in discrepancies {
            *label_counts.entry(d.classification.clone()).or_insert(0) += 1;
            if let Some(delta) = &d.delta {
                let total = net_delta
                    .entry(d.field.clone())
                    .or_insert_with(|| BigDecimal::from(0));
                *total = &*total + delta;
            }
        }

        Self {
            left_rows: matches.left().row_count(),
            right_rows: matches.right().row_count(),
            matched: matches.matched().len(),
            missing_from_right: matches.missing_from_right().len(),
            missing_from_left: matches.missing_from_left().len(),
            ambiguous_keys: matches.warnings().len(),
            discrepancies: discrepancies.len(),
            label_counts,
            net_delta,
        }
    }

    /// Nothing missing on either side and no differences
    pub fn is_clean(&self) -> bool {
        self.missing_from_right == 0 && self.missing_from_left == 0 && self.discrepancies == 0
    }
}

/// A row copied out of a final table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub row: usize,
    pub key: Option<String>,
    pub values: Vec<(String, Value)>,
}

impl ReportRow {
    pub(crate) fn from_unmatched(table: &Table, unmatched: &UnmatchedRow) -> Self {
        Self {
            row: unmatched.row,
            key: unmatched.key.as_deref().map(display_key),
            values: table
                .row(unmatched.row)
                .map(|r| r.to_pairs())
                .unwrap_or_default(),
        }
    }
}

/// Self-contained result of a run; outlives the pipelines it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub run_id: Uuid,
    pub generated_at: NaiveDateTime,
    pub name: String,
    pub key_columns: Vec<String>,
    pub summary: ReconSummary,
    pub matched: Vec<MatchedPair>,
    pub missing_from_right: Vec<ReportRow>,
    pub missing_from_left: Vec<ReportRow>,
    pub discrepancies: Vec<Discrepancy>,
    pub warnings: Vec<AmbiguousKeyWarning>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ReconciliationReport {
    pub fn new(
        name: &str,
        matches: &MatchResult<'_>,
        discrepancies: &[Discrepancy],
        summary: &ReconSummary,
    ) -> Self {
        let matched = matches
            .matched()
            .iter()
            .map(|pair| MatchedPair {
                key: display_key(&pair.key),
                ..pair.clone()
            })
            .collect();
        let discrepancies = discrepancies
            .iter()
            .map(|d| Discrepancy {
                key: display_key(&d.key),
                ..d.clone()
            })
            .collect();
        let warnings = matches
            .warnings()
            .iter()
            .map(|w| AmbiguousKeyWarning {
                key: display_key(&w.key),
                ..w.clone()
            })
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            generated_at: chrono::Utc::now().naive_utc(),
            name: name.to_string(),
            key_columns: matches.key_columns().to_vec(),
            summary: summary.clone(),
            matched,
            missing_from_right: matches
                .missing_from_right()
                .iter()
                .map(|u| ReportRow::from_unmatched(matches.left(), u))
                .collect(),
            missing_from_left: matches
                .missing_from_left()
                .iter()
                .map(|u| ReportRow::from_unmatched(matches.right(), u))
                .collect(),
            discrepancies,
            warnings,
            diagnostics: matches.diagnostics().to_vec(),
        }
    }

    /// Discrepancies carrying `label`
    pub fn discrepancies_labelled<'r>(
        &'r self,
        label: &'r str,
    ) -> impl Iterator<Item = &'r Discrepancy> + 'r {
        self.discrepancies
            .iter()
            .filter(move |d| d.classification == label)
    }
}
