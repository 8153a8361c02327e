//! Step definitions: one closed variant per transformation kind

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::pipeline::expression;
use crate::types::*;
use crate::utils::{validate_column_list, validate_column_name, AmountFormat};

/// Date literal format accepted by `gt`/`lt` filter operands
pub const DATE_OPERAND_FORMAT: &str = "%Y-%m-%d";

/// A single deterministic transformation applied to a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Step {
    RenameColumn(RenameColumn),
    FilterRows(FilterRows),
    NormalizeAmount(NormalizeAmount),
    DeriveColumn(DeriveColumn),
    SplitColumn(SplitColumn),
    MergeColumns(MergeColumns),
    DropColumns(DropColumns),
    TrimWhitespace(TrimWhitespace),
    ParseDate(ParseDate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameColumn {
    pub from: String,
    pub to: String,
}

/// Comparison used by `filter-rows`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Contains,
    IsEmpty,
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "ne",
            FilterOperator::Gt => "gt",
            FilterOperator::Lt => "lt",
            FilterOperator::Contains => "contains",
            FilterOperator::IsEmpty => "is-empty",
        };
        write!(f, "{}", name)
    }
}

/// Keeps the rows for which `column <operator> value` holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRows {
    pub column: String,
    pub operator: FilterOperator,
    /// Operand; not used by `is-empty`
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeAmount {
    pub column: String,
    #[serde(default)]
    pub format: AmountFormat,
    /// Round to this many fractional digits
    #[serde(default)]
    pub scale: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeriveColumn {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitColumn {
    pub column: String,
    pub delimiter: String,
    /// Target columns; the last one receives the unsplit remainder
    pub into: Vec<String>,
    #[serde(default)]
    pub keep_source: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeColumns {
    pub columns: Vec<String>,
    pub into: String,
    #[serde(default)]
    pub separator: String,
    #[serde(default)]
    pub drop_sources: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropColumns {
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrimWhitespace {
    /// Columns to trim; empty means every column
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseDate {
    pub column: String,
    /// chrono format string, e.g. `%d/%m/%Y`
    pub format: String,
}

/// Parsed `gt`/`lt` operand
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OrderedOperand {
    Number(BigDecimal),
    Date(NaiveDate),
}

impl FilterRows {
    pub(crate) fn ordered_operand(&self) -> StepResult<OrderedOperand> {
        let raw = self.operand()?.trim();
        if let Ok(n) = BigDecimal::from_str(raw) {
            return Ok(OrderedOperand::Number(n));
        }
        NaiveDate::parse_from_str(raw, DATE_OPERAND_FORMAT)
            .map(OrderedOperand::Date)
            .map_err(|_| {
                StepError::Config(format!(
                    "filter-rows operator '{}' needs a numeric or YYYY-MM-DD value, got '{}'",
                    self.operator, raw
                ))
            })
    }

    pub(crate) fn operand(&self) -> StepResult<&str> {
        self.value.as_deref().ok_or_else(|| {
            StepError::Config(format!(
                "filter-rows operator '{}' requires a value",
                self.operator
            ))
        })
    }
}

impl Step {
    /// Kebab-case kind name, matching the serialized tag
    pub fn kind(&self) -> &'static str {
        match self {
            Step::RenameColumn(_) => "rename-column",
            Step::FilterRows(_) => "filter-rows",
            Step::NormalizeAmount(_) => "normalize-amount",
            Step::DeriveColumn(_) => "derive-column",
            Step::SplitColumn(_) => "split-column",
            Step::MergeColumns(_) => "merge-columns",
            Step::DropColumns(_) => "drop-columns",
            Step::TrimWhitespace(_) => "trim-whitespace",
            Step::ParseDate(_) => "parse-date",
        }
    }

    /// Reject malformed or missing parameters before any execution
    pub fn validate(&self) -> StepResult<()> {
        let config = |msg: String| StepError::Config(format!("{}: {}", self.kind(), msg));

        match self {
            Step::RenameColumn(c) => {
                validate_column_name(&c.from).map_err(config)?;
                validate_column_name(&c.to).map_err(config)?;
                if c.from == c.to {
                    return Err(config(format!("'{}' is renamed to itself", c.from)));
                }
            }
            Step::FilterRows(c) => {
                validate_column_name(&c.column).map_err(config)?;
                match c.operator {
                    FilterOperator::IsEmpty => {}
                    FilterOperator::Gt | FilterOperator::Lt => {
                        c.ordered_operand()?;
                    }
                    FilterOperator::Eq | FilterOperator::Ne | FilterOperator::Contains => {
                        c.operand()?;
                    }
                }
            }
            Step::NormalizeAmount(c) => {
                validate_column_name(&c.column).map_err(config)?;
                if let Some(scale) = c.scale {
                    if !(0..=18).contains(&scale) {
                        return Err(config(format!("scale {} is outside 0..=18", scale)));
                    }
                }
            }
            Step::DeriveColumn(c) => {
                validate_column_name(&c.name).map_err(config)?;
                expression::parse(&c.expression).map_err(config)?;
            }
            Step::SplitColumn(c) => {
                validate_column_name(&c.column).map_err(config)?;
                if c.delimiter.is_empty() {
                    return Err(config("delimiter cannot be empty".to_string()));
                }
                validate_column_list(&c.into, "into").map_err(config)?;
            }
            Step::MergeColumns(c) => {
                validate_column_list(&c.columns, "columns").map_err(config)?;
                if c.columns.len() < 2 {
                    return Err(config("at least two source columns are required".to_string()));
                }
                validate_column_name(&c.into).map_err(config)?;
            }
            Step::DropColumns(c) => {
                validate_column_list(&c.columns, "columns").map_err(config)?;
            }
            Step::TrimWhitespace(c) => {
                let mut seen = HashSet::new();
                for name in &c.columns {
                    validate_column_name(name).map_err(config)?;
                    if !seen.insert(name) {
                        return Err(config(format!("column '{}' listed twice", name)));
                    }
                }
            }
            Step::ParseDate(c) => {
                validate_column_name(&c.column).map_err(config)?;
                if c.format.trim().is_empty() {
                    return Err(config("format cannot be empty".to_string()));
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::RenameColumn(c) => write!(f, "rename-column({} -> {})", c.from, c.to),
            Step::FilterRows(c) => match &c.value {
                Some(v) => write!(f, "filter-rows({} {} {})", c.column, c.operator, v),
                None => write!(f, "filter-rows({} {})", c.column, c.operator),
            },
            Step::NormalizeAmount(c) => write!(f, "normalize-amount({})", c.column),
            Step::DeriveColumn(c) => write!(f, "derive-column({} = {})", c.name, c.expression),
            Step::SplitColumn(c) => {
                write!(f, "split-column({} -> {})", c.column, c.into.join(", "))
            }
            Step::MergeColumns(c) => {
                write!(f, "merge-columns({} -> {})", c.columns.join(", "), c.into)
            }
            Step::DropColumns(c) => write!(f, "drop-columns({})", c.columns.join(", ")),
            Step::TrimWhitespace(c) if c.columns.is_empty() => write!(f, "trim-whitespace(*)"),
            Step::TrimWhitespace(c) => write!(f, "trim-whitespace({})", c.columns.join(", ")),
            Step::ParseDate(c) => write!(f, "parse-date({} as {})", c.column, c.format),
        }
    }
}

/// Shorthand constructors used by callers building pipelines in code
pub mod steps {
    use super::*;

    pub fn rename(from: &str, to: &str) -> Step {
        Step::RenameColumn(RenameColumn {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    pub fn filter(column: &str, operator: FilterOperator, value: Option<&str>) -> Step {
        Step::FilterRows(FilterRows {
            column: column.to_string(),
            operator,
            value: value.map(str::to_string),
        })
    }

    pub fn normalize_amount(column: &str) -> Step {
        Step::NormalizeAmount(NormalizeAmount {
            column: column.to_string(),
            format: AmountFormat::Standard,
            scale: None,
        })
    }

    pub fn derive(name: &str, expression: &str) -> Step {
        Step::DeriveColumn(DeriveColumn {
            name: name.to_string(),
            expression: expression.to_string(),
        })
    }

    pub fn split(column: &str, delimiter: &str, into: &[&str]) -> Step {
        Step::SplitColumn(SplitColumn {
            column: column.to_string(),
            delimiter: delimiter.to_string(),
            into: into.iter().map(|s| s.to_string()).collect(),
            keep_source: false,
        })
    }

    pub fn merge(columns: &[&str], into: &str, separator: &str) -> Step {
        Step::MergeColumns(MergeColumns {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            into: into.to_string(),
            separator: separator.to_string(),
            drop_sources: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::steps::*;
    use super::*;

    #[test]
    fn test_valid_steps_pass() {
        assert!(rename("amt", "amount").validate().is_ok());
        assert!(filter("amount", FilterOperator::Gt, Some("0")).validate().is_ok());
        assert!(filter("date", FilterOperator::Lt, Some("2024-03-01")).validate().is_ok());
        assert!(filter("memo", FilterOperator::IsEmpty, None).validate().is_ok());
        assert!(derive("net", "gross - fee").validate().is_ok());
        assert!(merge(&["a", "b"], "ab", "-").validate().is_ok());
    }

    #[test]
    fn test_invalid_steps_are_config_errors() {
        let cases = vec![
            rename("amount", "amount"),
            rename("", "x"),
            filter("amount", FilterOperator::Gt, Some("lots")),
            filter("amount", FilterOperator::Eq, None),
            derive("net", "gross -"),
            split("id", "", &["a", "b"]),
            split("id", "-", &[]),
            merge(&["a"], "ab", "-"),
            Step::NormalizeAmount(NormalizeAmount {
                column: "amount".to_string(),
                format: AmountFormat::Standard,
                scale: Some(40),
            }),
            Step::DropColumns(DropColumns { columns: vec![] }),
        ];
        for step in cases {
            assert!(
                matches!(step.validate(), Err(StepError::Config(_))),
                "{} should be rejected",
                step
            );
        }
    }

    #[test]
    fn test_serde_tagging() {
        let step: Step = serde_json::from_str(
            r#"{"kind":"filter-rows","column":"status","operator":"ne","value":"void"}"#,
        )
        .unwrap();
        assert_eq!(step, filter("status", FilterOperator::Ne, Some("void")));
        assert_eq!(step.kind(), "filter-rows");

        let json = serde_json::to_value(normalize_amount("amount")).unwrap();
        assert_eq!(json["kind"], "normalize-amount");
        assert_eq!(json["format"], "standard");
    }

    #[test]
    fn test_display() {
        assert_eq!(rename("a", "b").to_string(), "rename-column(a -> b)");
        assert_eq!(
            filter("amount", FilterOperator::Gt, Some("0")).to_string(),
            "filter-rows(amount gt 0)"
        );
    }
}
