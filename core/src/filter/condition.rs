//! The compiled condition tree and its evaluation rules.

use std::fmt;

use regex_lite::Regex;
use serde_json::Value;

use crate::format::value_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOp {
    Like,
    NotLike,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// A compiled filter condition. `Logical` children are a list so `NOT`
/// carries one child while `AND`/`OR` chains stay flat.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Comparison {
        field: String,
        op: CompareOp,
        value: Value,
    },
    Pattern {
        field: String,
        op: PatternOp,
        pattern: String,
    },
    Logical {
        op: LogicalOp,
        children: Vec<Condition>,
    },
}

impl Condition {
    pub fn and(children: Vec<Condition>) -> Self {
        Condition::Logical {
            op: LogicalOp::And,
            children,
        }
    }

    pub fn or(children: Vec<Condition>) -> Self {
        Condition::Logical {
            op: LogicalOp::Or,
            children,
        }
    }

    pub fn negate(child: Condition) -> Self {
        Condition::Logical {
            op: LogicalOp::Not,
            children: vec![child],
        }
    }

    /// Evaluate against a nested-object context. Dotted field paths resolve
    /// component-wise; a missing field makes the enclosing comparison false.
    pub fn evaluate(&self, context: &Value) -> bool {
        match self {
            Condition::Comparison { field, op, value } => {
                let Some(actual) = resolve_path(context, field) else {
                    return false;
                };
                compare(actual, *op, value)
            }
            Condition::Pattern { field, op, pattern } => {
                let Some(actual) = resolve_path(context, field) else {
                    return false;
                };
                let text = value_text(actual);
                match op {
                    PatternOp::Like => like_matches(pattern, &text),
                    PatternOp::NotLike => !like_matches(pattern, &text),
                    PatternOp::Regex => Regex::new(pattern)
                        .map(|re| re.is_match(&text))
                        .unwrap_or(false),
                }
            }
            Condition::Logical { op, children } => match op {
                LogicalOp::And => children.iter().all(|child| child.evaluate(context)),
                LogicalOp::Or => children.iter().any(|child| child.evaluate(context)),
                LogicalOp::Not => match children.first() {
                    Some(child) => !child.evaluate(context),
                    None => true,
                },
            },
        }
    }
}

fn resolve_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for component in path.split('.') {
        current = current.as_object()?.get(component)?;
    }
    Some(current)
}

/// Loose equality: numbers compare numerically when both sides are numeric,
/// booleans equal the strings `"true"`/`"false"`, everything else compares
/// by string form.
fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return a == b;
    }
    value_text(actual) == value_text(expected)
}

fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match op {
        CompareOp::Eq => loose_eq(actual, expected),
        CompareOp::Ne => !loose_eq(actual, expected),
        CompareOp::Gt | CompareOp::Lt | CompareOp::Ge | CompareOp::Le => {
            let ordering = match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => Some(value_text(actual).cmp(&value_text(expected))),
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Ge => ordering.is_ge(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Eq | CompareOp::Ne => false,
            }
        }
    }
}

/// SQL `LIKE` with `%`/`_` wildcards, case-insensitive, anchored to the whole
/// string. The pattern is regex-escaped character-wise before the wildcards
/// are substituted, so the wildcards stay live.
fn like_matches(pattern: &str, text: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push_str("(?i)^");
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => regex.push_str(&regex_lite::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn comparison(field: &str, op: CompareOp, value: Value) -> Condition {
        Condition::Comparison {
            field: field.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn missing_field_is_false() {
        let condition = comparison("absent", CompareOp::Eq, json!(1));
        assert!(!condition.evaluate(&json!({"present": 1})));
    }

    #[test]
    fn dotted_paths_resolve() {
        let condition = comparison("metadata.topic", CompareOp::Eq, json!("a/b"));
        assert!(condition.evaluate(&json!({"metadata": {"topic": "a/b"}})));
        assert!(!condition.evaluate(&json!({"metadata": {}})));
    }

    #[test]
    fn numeric_equality_crosses_representations() {
        let condition = comparison("qos", CompareOp::Eq, json!(1));
        assert!(condition.evaluate(&json!({"qos": 1})));
        assert!(condition.evaluate(&json!({"qos": 1.0})));
        assert!(condition.evaluate(&json!({"qos": "1"})));
    }

    #[test]
    fn boolean_equals_its_string_form() {
        let condition = comparison("retained", CompareOp::Eq, json!("true"));
        assert!(condition.evaluate(&json!({"retained": true})));
        let condition = comparison("retained", CompareOp::Eq, json!(true));
        assert!(condition.evaluate(&json!({"retained": "true"})));
        assert!(!condition.evaluate(&json!({"retained": false})));
    }

    #[test]
    fn ordering_coerces_numbers_else_strings() {
        let condition = comparison("qos", CompareOp::Gt, json!(0));
        assert!(condition.evaluate(&json!({"qos": 1})));
        assert!(!condition.evaluate(&json!({"qos": 0})));
        let condition = comparison("name", CompareOp::Lt, json!("m"));
        assert!(condition.evaluate(&json!({"name": "alice"})));
        assert!(!condition.evaluate(&json!({"name": "zoe"})));
    }

    #[test]
    fn like_wildcards() {
        let condition = Condition::Pattern {
            field: "topic".to_string(),
            op: PatternOp::Like,
            pattern: "sensor/%".to_string(),
        };
        assert!(condition.evaluate(&json!({"topic": "sensor/temperature"})));
        assert!(!condition.evaluate(&json!({"topic": "actuator/valve"})));

        let condition = Condition::Pattern {
            field: "code".to_string(),
            op: PatternOp::Like,
            pattern: "E_0_".to_string(),
        };
        assert!(condition.evaluate(&json!({"code": "EX01"})));
        assert!(!condition.evaluate(&json!({"code": "EX001"})));
    }

    #[test]
    fn like_is_case_insensitive_and_escapes_regex_chars() {
        let condition = Condition::Pattern {
            field: "name".to_string(),
            op: PatternOp::Like,
            pattern: "A.B%".to_string(),
        };
        assert!(condition.evaluate(&json!({"name": "a.b-tail"})));
        assert!(!condition.evaluate(&json!({"name": "axb-tail"})));
    }

    #[test]
    fn regex_matches_unanchored() {
        let condition = Condition::Pattern {
            field: "source".to_string(),
            op: PatternOp::Regex,
            pattern: "^worker-[0-9]+$".to_string(),
        };
        assert!(condition.evaluate(&json!({"source": "worker-12"})));
        assert!(!condition.evaluate(&json!({"source": "worker-x"})));
    }

    #[test]
    fn invalid_regex_is_false() {
        let condition = Condition::Pattern {
            field: "source".to_string(),
            op: PatternOp::Regex,
            pattern: "(unclosed".to_string(),
        };
        assert!(!condition.evaluate(&json!({"source": "anything"})));
    }

    #[test]
    fn logical_combinators() {
        let tree = Condition::and(vec![
            comparison("type", CompareOp::Eq, json!("data")),
            Condition::or(vec![
                comparison("qos", CompareOp::Eq, json!(1)),
                comparison("retained", CompareOp::Eq, json!(true)),
            ]),
        ]);
        assert!(tree.evaluate(&json!({"type": "data", "qos": 1, "retained": false})));
        assert!(tree.evaluate(&json!({"type": "data", "qos": 0, "retained": true})));
        assert!(!tree.evaluate(&json!({"type": "system", "qos": 1})));
        assert!(!tree.evaluate(&json!({"type": "data", "qos": 0, "retained": false})));
    }

    #[test]
    fn not_negates_single_child() {
        let tree = Condition::negate(comparison("type", CompareOp::Eq, json!("error")));
        assert!(tree.evaluate(&json!({"type": "data"})));
        assert!(!tree.evaluate(&json!({"type": "error"})));
    }
}
