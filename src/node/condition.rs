//! Branch conditions
//!
//! Operands are either source keys (looked up in the node's input) or
//! literals. A string operand that names an input key resolves to that
//! value; anything else is taken literally.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DataValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "startsWith")]
    StartsWith,
    #[serde(rename = "endsWith")]
    EndsWith,
}

/// `data1 <operator> data2`, optionally negated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub data1: Value,
    pub operator: Operator,
    pub data2: Value,
    #[serde(default)]
    pub negation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default)]
    pub combined_with: Combinator,
    pub conditions: Vec<Comparison>,
}

/// Look a string operand up as an input key, else keep it literal
pub fn resolve_operand(operand: &Value, data: &DataValues) -> Value {
    if let Value::String(key) = operand {
        if let Some(value) = data.get(key) {
            return value.clone();
        }
    }
    operand.clone()
}

impl Comparison {
    pub fn new(data1: impl Into<Value>, operator: Operator, data2: impl Into<Value>) -> Self {
        Self {
            data1: data1.into(),
            operator,
            data2: data2.into(),
            negation: false,
        }
    }

    pub fn negated(mut self) -> Self {
        self.negation = !self.negation;
        self
    }

    pub fn holds(&self, data: &DataValues) -> bool {
        let left = resolve_operand(&self.data1, data);
        let right = resolve_operand(&self.data2, data);
        compare(self.operator, &left, &right) != self.negation
    }
}

impl Condition {
    pub fn all(conditions: Vec<Comparison>) -> Self {
        Self {
            combined_with: Combinator::And,
            conditions,
        }
    }

    pub fn any(conditions: Vec<Comparison>) -> Self {
        Self {
            combined_with: Combinator::Or,
            conditions,
        }
    }

    pub fn holds(&self, data: &DataValues) -> bool {
        match self.combined_with {
            Combinator::And => self.conditions.iter().all(|c| c.holds(data)),
            Combinator::Or => self.conditions.iter().any(|c| c.holds(data)),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare(operator: Operator, left: &Value, right: &Value) -> bool {
    let numbers = as_number(left).zip(as_number(right));
    match operator {
        Operator::Eq => equal(left, right, numbers),
        Operator::Ne => !equal(left, right, numbers),
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            let ordering = match numbers {
                Some((a, b)) => a.partial_cmp(&b),
                None => Some(as_text(left).cmp(&as_text(right))),
            };
            match ordering {
                Some(o) => match operator {
                    Operator::Lt => o.is_lt(),
                    Operator::Le => o.is_le(),
                    Operator::Gt => o.is_gt(),
                    _ => o.is_ge(),
                },
                None => false,
            }
        }
        Operator::Contains => match left {
            Value::Array(items) => items.iter().any(|item| equal(item, right, as_number(item).zip(as_number(right)))),
            Value::Object(map) => map.contains_key(&as_text(right)),
            other => as_text(other).contains(&as_text(right)),
        },
        Operator::StartsWith => as_text(left).starts_with(&as_text(right)),
        Operator::EndsWith => as_text(left).ends_with(&as_text(right)),
    }
}

fn equal(left: &Value, right: &Value, numbers: Option<(f64, f64)>) -> bool {
    match numbers {
        Some((a, b)) => a == b,
        None => left == right || as_text(left) == as_text(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> DataValues {
        let mut data = DataValues::new();
        data.insert("f/n".into(), json!(5));
        data.insert("f/name".into(), json!("alpha-beta"));
        data.insert("f/tags".into(), json!(["x", "y"]));
        data
    }

    #[test]
    fn resolves_keys_and_literals() {
        assert_eq!(resolve_operand(&json!("f/n"), &data()), json!(5));
        assert_eq!(resolve_operand(&json!("plain"), &data()), json!("plain"));
        assert_eq!(resolve_operand(&json!(3), &data()), json!(3));
    }

    #[test]
    fn numeric_comparisons_accept_numeric_strings() {
        let d = data();
        assert!(Comparison::new("f/n", Operator::Gt, 3).holds(&d));
        assert!(Comparison::new("f/n", Operator::Eq, "5").holds(&d));
        assert!(Comparison::new("f/n", Operator::Le, 5.0).holds(&d));
        assert!(!Comparison::new("f/n", Operator::Lt, 5).holds(&d));
    }

    #[test]
    fn string_operators() {
        let d = data();
        assert!(Comparison::new("f/name", Operator::StartsWith, "alpha").holds(&d));
        assert!(Comparison::new("f/name", Operator::EndsWith, "beta").holds(&d));
        assert!(Comparison::new("f/name", Operator::Contains, "a-b").holds(&d));
        assert!(Comparison::new("f/tags", Operator::Contains, "y").holds(&d));
        assert!(Comparison::new("f/tags", Operator::Contains, "z").negated().holds(&d));
    }

    #[test]
    fn combinators() {
        let d = data();
        let yes = Comparison::new("f/n", Operator::Eq, 5);
        let no = Comparison::new("f/n", Operator::Eq, 6);

        assert!(!Condition::all(vec![yes.clone(), no.clone()]).holds(&d));
        assert!(Condition::any(vec![yes, no]).holds(&d));
    }

    #[test]
    fn deserializes_operator_symbols() {
        let condition: Condition = serde_json::from_value(json!({
            "combinedWith": "or",
            "conditions": [{"data1": "f/n", "operator": ">=", "data2": 5}]
        }))
        .unwrap();
        assert_eq!(condition.combined_with, Combinator::Or);
        assert_eq!(condition.conditions[0].operator, Operator::Ge);
        assert!(condition.holds(&data()));
    }
}
