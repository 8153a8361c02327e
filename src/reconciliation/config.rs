//! TOML configuration for a reconciliation run

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::pipeline::executor::{ExecutionOptions, DEFAULT_BATCH_SIZE};
use crate::pipeline::step::Step;
use crate::reconciliation::classifier::{ClassificationRule, RuleSet};
use crate::reconciliation::matching::MatchOptions;
use crate::types::*;
use crate::utils::{validate_batch_size, validate_column_list, validate_key_columns};

fn default_name() -> String {
    "reconciliation".to_string()
}

fn default_compare_fields() -> Vec<String> {
    vec!["amount".to_string()]
}

fn default_fee_threshold() -> BigDecimal {
    BigDecimal::from_str("10.00").unwrap_or_else(|_| BigDecimal::from(10))
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Steps applied to one side before matching
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideConfig {
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub key_columns: Vec<String>,
    #[serde(default = "default_compare_fields")]
    pub compare_fields: Vec<String>,
    /// Largest shortfall still treated as a processing fee
    #[serde(default = "default_fee_threshold")]
    pub fee_threshold: BigDecimal,
    #[serde(default)]
    pub fail_on_ambiguous: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub left: SideConfig,
    #[serde(default)]
    pub right: SideConfig,
    /// Ordered rules; empty means the fee defaults built from `fee_threshold`
    #[serde(default)]
    pub rules: Vec<ClassificationRule>,
}

impl ReconConfig {
    /// Config with defaults for everything but the key columns
    pub fn new(key_columns: Vec<String>) -> Self {
        Self {
            name: default_name(),
            key_columns,
            compare_fields: default_compare_fields(),
            fee_threshold: default_fee_threshold(),
            fail_on_ambiguous: false,
            batch_size: DEFAULT_BATCH_SIZE,
            left: SideConfig::default(),
            right: SideConfig::default(),
            rules: Vec::new(),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> ReconResult<Self> {
        let config: ReconConfig =
            toml::from_str(text).map_err(|e| ReconError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> ReconResult<String> {
        toml::to_string(self).map_err(|e| ReconError::Config(e.to_string()))
    }

    pub fn validate(&self) -> ReconResult<()> {
        validate_key_columns(&self.key_columns)?;
        validate_batch_size(self.batch_size)?;
        validate_column_list(&self.compare_fields, "compare_fields").map_err(ReconError::Config)?;

        if self.fee_threshold < BigDecimal::from(0) {
            return Err(ReconError::Config(format!(
                "fee_threshold must not be negative, got {}",
                self.fee_threshold
            )));
        }

        for step in self.left.steps.iter().chain(&self.right.steps) {
            step.validate().map_err(ReconError::InvalidStep)?;
        }

        for (i, rule) in self.rules.iter().enumerate() {
            if rule.label.trim().is_empty() {
                return Err(ReconError::Config(format!("rule {} has an empty label", i)));
            }
        }

        Ok(())
    }

    pub fn steps(&self, side: Side) -> &[Step] {
        match side {
            Side::Left => &self.left.steps,
            Side::Right => &self.right.steps,
        }
    }

    pub fn rule_set(&self) -> RuleSet {
        if self.rules.is_empty() {
            RuleSet::fee_defaults(self.fee_threshold.clone())
        } else {
            RuleSet::new(self.rules.clone())
        }
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            fail_on_ambiguous: self.fail_on_ambiguous,
        }
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions::default().with_batch_size(self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::classifier::{Condition, PROCESSING_FEE_ERROR};

    const FULL: &str = r#"
name = "Stripe vs ledger"
key_columns = ["transaction_id"]
compare_fields = ["amount"]
fee_threshold = "10.00"
fail_on_ambiguous = true
batch_size = 500

[[left.steps]]
kind = "normalize-amount"
column = "amount"
format = "standard"

[[right.steps]]
kind = "rename-column"
from = "txn"
to = "transaction_id"

[[right.steps]]
kind = "normalize-amount"
column = "amount"
format = "european"
scale = 2

[[rules]]
field = "amount"
label = "Processing Fee Error"
when = [{ delta-below = "0" }, { abs-delta-at-most = "10.00" }]

[[rules]]
label = "Other"
when = ["delta-non-zero"]
"#;

    #[test]
    fn test_parse_full_config() {
        let config = ReconConfig::from_toml(FULL).unwrap();
        assert_eq!(config.name, "Stripe vs ledger");
        assert_eq!(config.batch_size, 500);
        assert!(config.match_options().fail_on_ambiguous);
        assert_eq!(config.steps(Side::Left).len(), 1);
        assert_eq!(config.steps(Side::Right).len(), 2);
        assert_eq!(config.steps(Side::Right)[0].kind(), "rename-column");

        let rules = config.rule_set();
        assert_eq!(rules.rules().len(), 2);
        assert_eq!(rules.rules()[0].label, PROCESSING_FEE_ERROR);
        assert_eq!(rules.rules()[0].when[0], Condition::DeltaBelow(BigDecimal::from(0)));
        assert_eq!(rules.rules()[1].field, None);
    }

    #[test]
    fn test_defaults() {
        let config = ReconConfig::from_toml(r#"key_columns = ["id"]"#).unwrap();
        assert_eq!(config.compare_fields, vec!["amount".to_string()]);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.fee_threshold, BigDecimal::from(10));
        assert!(!config.fail_on_ambiguous);
        assert_eq!(config.rule_set(), RuleSet::fee_defaults(BigDecimal::from(10)));
        assert_eq!(config, ReconConfig::new(vec!["id".to_string()]));
    }

    #[test]
    fn test_validation_failures() {
        assert!(matches!(
            ReconConfig::from_toml("key_columns = []"),
            Err(ReconError::NoKeyColumns)
        ));
        assert!(matches!(
            ReconConfig::from_toml("key_columns = [\"id\"]\nbatch_size = 0"),
            Err(ReconError::Config(_))
        ));
        assert!(matches!(
            ReconConfig::from_toml("key_columns = [\"id\"]\nfee_threshold = \"-1\""),
            Err(ReconError::Config(_))
        ));

        let bad_step = r#"
key_columns = ["id"]

[[left.steps]]
kind = "split-column"
column = "ref"
delimiter = ""
into = ["a", "b"]
"#;
        assert!(matches!(
            ReconConfig::from_toml(bad_step),
            Err(ReconError::InvalidStep(StepError::Config(_)))
        ));
    }

    #[test]
    fn test_unknown_step_kind_is_rejected() {
        let text = r#"
key_columns = ["id"]

[[left.steps]]
kind = "upper-case"
column = "id"
"#;
        assert!(matches!(ReconConfig::from_toml(text), Err(ReconError::Config(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ReconConfig::from_toml(FULL).unwrap();
        let text = config.to_toml().unwrap();
        assert_eq!(ReconConfig::from_toml(&text).unwrap(), config);
    }
}
