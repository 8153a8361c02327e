//! Ordered rule classification of matched-pair differences

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::reconciliation::matching::{MatchResult, MatchedPair};
use crate::table::Table;
use crate::types::*;

/// Label used when no rule matches
pub const UNCLASSIFIED: &str = "Unclassified";
pub const PROCESSING_FEE_ERROR: &str = "Processing Fee Error";
pub const RATE_DISCREPANCY: &str = "Rate Discrepancy";

/// Which side of a matched pair carries a value for the field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Presence {
    Both,
    LeftOnly,
    RightOnly,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Both => write!(f, "both"),
            Presence::LeftOnly => write!(f, "left-only"),
            Presence::RightOnly => write!(f, "right-only"),
        }
    }
}

/// A predicate over the signed delta and presence state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    /// delta < value
    DeltaBelow(BigDecimal),
    /// delta > value
    DeltaAbove(BigDecimal),
    /// |delta| <= value
    AbsDeltaAtMost(BigDecimal),
    /// |delta| > value
    AbsDeltaAbove(BigDecimal),
    DeltaNonZero,
    Presence(Presence),
}

impl Condition {
    /// Delta conditions never hold when there is no numeric delta
    pub fn holds(&self, delta: Option<&BigDecimal>, presence: Presence) -> bool {
        match (self, delta) {
            (Condition::Presence(expected), _) => *expected == presence,
            (_, None) => false,
            (Condition::DeltaBelow(limit), Some(d)) => d < limit,
            (Condition::DeltaAbove(limit), Some(d)) => d > limit,
            (Condition::AbsDeltaAtMost(limit), Some(d)) => d.abs() <= *limit,
            (Condition::AbsDeltaAbove(limit), Some(d)) => d.abs() > *limit,
            (Condition::DeltaNonZero, Some(d)) => *d != BigDecimal::from(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRule {
    /// Field the rule applies to; `None` applies to every compared field
    #[serde(default)]
    pub field: Option<String>,
    /// All conditions must hold; an empty list always matches
    #[serde(default)]
    pub when: Vec<Condition>,
    pub label: String,
}

impl ClassificationRule {
    pub fn new(label: impl Into<String>, when: Vec<Condition>) -> Self {
        Self {
            field: None,
            when,
            label: label.into(),
        }
    }

    pub fn for_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn matches(&self, field: &str, delta: Option<&BigDecimal>, presence: Presence) -> bool {
        if let Some(target) = &self.field {
            if target != field {
                return false;
            }
        }
        self.when.iter().all(|c| c.holds(delta, presence))
    }
}

/// Rules evaluated in declared order; the first match wins
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    rules: Vec<ClassificationRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Fee rules: small shortfalls are processing fees, anything larger is a rate issue
    pub fn fee_defaults(fee_threshold: BigDecimal) -> Self {
        Self::new(vec![
            ClassificationRule::new(
                PROCESSING_FEE_ERROR,
                vec![
                    Condition::DeltaBelow(BigDecimal::from(0)),
                    Condition::AbsDeltaAtMost(fee_threshold.clone()),
                ],
            ),
            ClassificationRule::new(
                RATE_DISCREPANCY,
                vec![Condition::DeltaNonZero, Condition::AbsDeltaAbove(fee_threshold)],
            ),
        ])
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn push(&mut self, rule: ClassificationRule) {
        self.rules.push(rule);
    }

    pub fn classify(&self, field: &str, delta: Option<&BigDecimal>, presence: Presence) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.matches(field, delta, presence))
            .map(|rule| rule.label.as_str())
            .unwrap_or(UNCLASSIFIED)
    }
}

/// A classified difference in one field of a matched pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Index into the match result's matched partition
    pub pair: usize,
    pub key: String,
    pub left_row: usize,
    pub right_row: usize,
    pub field: String,
    pub left: Value,
    pub right: Value,
    /// right - left, when both sides are numeric
    pub delta: Option<BigDecimal>,
    pub presence: Presence,
    pub classification: String,
}

fn field_value(table: &Table, row: usize, field: &str) -> Value {
    table.value(row, field).cloned().unwrap_or(Value::Null)
}

fn compare(left: &Value, right: &Value) -> Option<(Option<BigDecimal>, Presence)> {
    match (left.is_empty(), right.is_empty()) {
        (true, true) => None,
        (false, true) => Some((None, Presence::LeftOnly)),
        (true, false) => Some((None, Presence::RightOnly)),
        (false, false) => match (left.to_number(), right.to_number()) {
            (Some(l), Some(r)) => {
                let delta = &r - &l;
                (delta != BigDecimal::from(0)).then_some((Some(delta), Presence::Both))
            }
            _ => (left.render().trim() != right.render().trim()).then_some((None, Presence::Both)),
        },
    }
}

fn classify_pair(
    index: usize,
    pair: &MatchedPair,
    left: &Table,
    right: &Table,
    fields: &[String],
    rules: &RuleSet,
    out: &mut Vec<Discrepancy>,
) {
    for field in fields {
        let l = field_value(left, pair.left_row, field);
        let r = field_value(right, pair.right_row, field);
        let Some((delta, presence)) = compare(&l, &r) else {
            continue;
        };

        let classification = rules.classify(field, delta.as_ref(), presence).to_string();
        out.push(Discrepancy {
            pair: index,
            key: pair.key.clone(),
            left_row: pair.left_row,
            right_row: pair.right_row,
            field: field.clone(),
            left: l,
            right: r,
            delta,
            presence,
            classification,
        });
    }
}

/// Fail when either table lacks a compared field
pub fn check_compare_fields(left: &Table, right: &Table, fields: &[String]) -> ReconResult<()> {
    for (table, side) in [(left, Side::Left), (right, Side::Right)] {
        if let Some(field) = fields.iter().find(|field| !table.has_column(field)) {
            return Err(ReconError::MissingCompareField {
                side,
                field: field.clone(),
            });
        }
    }
    Ok(())
}

/// Compare every matched pair on `fields` and label each difference.
///
/// Equal values produce nothing; every other difference gets a label,
/// falling back to [`UNCLASSIFIED`].
pub fn classify(matches: &MatchResult<'_>, fields: &[String], rules: &RuleSet) -> Vec<Discrepancy> {
    let mut out = Vec::new();
    for (index, pair) in matches.matched().iter().enumerate() {
        classify_pair(index, pair, matches.left(), matches.right(), fields, rules, &mut out);
    }

    tracing::debug!(
        pairs = matches.matched().len(),
        fields = fields.len(),
        discrepancies = out.len(),
        "Classified matched pairs"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::matching::{match_tables, MatchOptions};
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn table(rows: Vec<Vec<Value>>) -> Table {
        Table::new(vec!["id".to_string(), "amount".to_string()], rows).unwrap()
    }

    fn fields() -> Vec<String> {
        vec!["amount".to_string()]
    }

    #[test]
    fn test_fee_defaults() {
        let rules = RuleSet::fee_defaults(dec("10.00"));
        let both = Presence::Both;
        assert_eq!(rules.classify("amount", Some(&dec("-3.18")), both), PROCESSING_FEE_ERROR);
        assert_eq!(rules.classify("amount", Some(&dec("-10.00")), both), PROCESSING_FEE_ERROR);
        assert_eq!(rules.classify("amount", Some(&dec("-10.01")), both), RATE_DISCREPANCY);
        assert_eq!(rules.classify("amount", Some(&dec("25")), both), RATE_DISCREPANCY);
        assert_eq!(rules.classify("amount", Some(&dec("3")), both), UNCLASSIFIED);
        assert_eq!(rules.classify("amount", None, Presence::LeftOnly), UNCLASSIFIED);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let rules = RuleSet::new(vec![
            ClassificationRule::new("Fee", vec![Condition::DeltaBelow(dec("0"))]).for_field("fee"),
            ClassificationRule::new("Short", vec![Condition::DeltaBelow(dec("0"))]),
            ClassificationRule::new("Any", vec![]),
        ]);
        assert_eq!(rules.classify("fee", Some(&dec("-1")), Presence::Both), "Fee");
        assert_eq!(rules.classify("amount", Some(&dec("-1")), Presence::Both), "Short");
        assert_eq!(rules.classify("amount", Some(&dec("1")), Presence::Both), "Any");
    }

    #[test]
    fn test_presence_condition() {
        let rules = RuleSet::new(vec![ClassificationRule::new(
            "Missing settlement amount",
            vec![Condition::Presence(Presence::LeftOnly)],
        )]);
        assert_eq!(
            rules.classify("amount", None, Presence::LeftOnly),
            "Missing settlement amount"
        );
        assert_eq!(rules.classify("amount", None, Presence::RightOnly), UNCLASSIFIED);
    }

    #[test]
    fn test_processing_fee_scenario() {
        let left = table(vec![vec![Value::text("TXN-9"), Value::number("127.50")]]);
        let right = table(vec![vec![Value::text("TXN-9"), Value::number("124.32")]]);
        let keys = vec!["id".to_string()];
        let matches = match_tables(&left, &right, &keys, &MatchOptions::default()).unwrap();

        let found = classify(&matches, &fields(), &RuleSet::fee_defaults(dec("10.00")));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].delta, Some(dec("-3.18")));
        assert_eq!(found[0].classification, PROCESSING_FEE_ERROR);
        assert_eq!(found[0].presence, Presence::Both);
    }

    #[test]
    fn test_equal_representations_are_not_discrepancies() {
        let left = table(vec![vec![Value::text("A"), Value::number("10.00")]]);
        let right = table(vec![vec![Value::text("A"), Value::text("10")]]);
        let keys = vec!["id".to_string()];
        let matches = match_tables(&left, &right, &keys, &MatchOptions::default()).unwrap();

        assert!(classify(&matches, &fields(), &RuleSet::fee_defaults(dec("10"))).is_empty());
    }

    #[test]
    fn test_one_sided_and_textual_differences() {
        let left = table(vec![
            vec![Value::text("A"), Value::number("5")],
            vec![Value::text("B"), Value::text("n/a")],
        ]);
        let right = table(vec![
            vec![Value::text("A"), Value::Null],
            vec![Value::text("B"), Value::text("pending")],
        ]);
        let keys = vec!["id".to_string()];
        let matches = match_tables(&left, &right, &keys, &MatchOptions::default()).unwrap();

        let found = classify(&matches, &fields(), &RuleSet::fee_defaults(dec("10")));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].presence, Presence::LeftOnly);
        assert_eq!(found[0].delta, None);
        assert_eq!(found[1].presence, Presence::Both);
        assert_eq!(found[1].classification, UNCLASSIFIED);
    }

    #[test]
    fn test_compare_fields_must_exist_on_both_sides() {
        let left = table(vec![vec![Value::text("A"), Value::number("5")]]);
        let right = Table::new(
            vec!["id".to_string(), "gross".to_string()],
            vec![vec![Value::text("A"), Value::number("5")]],
        )
        .unwrap();

        assert!(check_compare_fields(&left, &left, &fields()).is_ok());
        let err = check_compare_fields(&left, &right, &fields()).unwrap_err();
        assert!(matches!(
            err,
            ReconError::MissingCompareField { side: Side::Right, ref field } if field == "amount"
        ));
    }

    #[test]
    fn test_rules_deserialize_from_json() {
        let json = r#"{"label":"Fee","field":"amount","when":[{"delta-below":"0"},"delta-non-zero",{"presence":"both"}]}"#;
        let rule: ClassificationRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.field.as_deref(), Some("amount"));
        assert_eq!(rule.when.len(), 3);
        assert_eq!(rule.when[1], Condition::DeltaNonZero);
    }
}
