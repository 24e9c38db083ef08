//! Incrementally built filter expression: an ordered list of WHERE clauses
//! combined left-to-right into one condition tree.

use std::fmt;

use remsh_protocol::Message;

use super::FilterError;
use super::condition::Condition;
use super::parse::parse_condition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combiner {
    Base,
    And,
    Or,
    AndNot,
}

impl fmt::Display for Combiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Combiner::Base => "",
            Combiner::And => "AND",
            Combiner::Or => "OR",
            Combiner::AndNot => "AND NOT",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    text: String,
    combiner: Combiner,
    condition: Condition,
}

/// An ordered set of clauses compiled into a single condition.
///
/// The compiled tree is cached and rebuilt whenever a mutating call
/// (`set_where`, `add_and`, `add_or`, `add_and_not`, `remove`, `clear`)
/// changes the clause list, so `matches` never re-parses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpression {
    clauses: Vec<Clause>,
    compiled: Option<Condition>,
}

impl FilterExpression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole filter with a single base clause.
    pub fn set_where(&mut self, expression: &str) -> Result<(), FilterError> {
        let condition = parse_condition(expression)?;
        self.clauses = vec![Clause {
            text: expression.trim().to_string(),
            combiner: Combiner::Base,
            condition,
        }];
        self.recompile();
        Ok(())
    }

    pub fn add_and(&mut self, expression: &str) -> Result<(), FilterError> {
        self.add_clause(expression, Combiner::And)
    }

    pub fn add_or(&mut self, expression: &str) -> Result<(), FilterError> {
        self.add_clause(expression, Combiner::Or)
    }

    /// Append an `AND NOT` clause.
    pub fn add_and_not(&mut self, expression: &str) -> Result<(), FilterError> {
        self.add_clause(expression, Combiner::AndNot)
    }

    fn add_clause(&mut self, expression: &str, combiner: Combiner) -> Result<(), FilterError> {
        if self.clauses.is_empty() {
            return Err(FilterError::MissingBase);
        }
        let condition = parse_condition(expression)?;
        self.clauses.push(Clause {
            text: expression.trim().to_string(),
            combiner,
            condition,
        });
        self.recompile();
        Ok(())
    }

    /// Remove the clause whose text matches `expression`. Removing the base
    /// clause promotes the next clause to base. Returns true when a clause
    /// was removed.
    pub fn remove(&mut self, expression: &str) -> bool {
        let needle = expression.trim();
        let Some(index) = self.clauses.iter().position(|clause| clause.text == needle) else {
            return false;
        };
        self.clauses.remove(index);
        if index == 0 {
            if let Some(first) = self.clauses.first_mut() {
                first.combiner = Combiner::Base;
            }
        }
        self.recompile();
        true
    }

    pub fn clear(&mut self) {
        self.clauses.clear();
        self.compiled = None;
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clause_count(&self) -> usize {
        self.clauses.len()
    }

    /// Human-readable form, e.g. `type = 'data' AND NOT source = 'noisy'`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for clause in &self.clauses {
            if clause.combiner != Combiner::Base {
                out.push(' ');
                out.push_str(&clause.combiner.to_string());
                out.push(' ');
            }
            out.push_str(&clause.text);
        }
        out
    }

    /// The compiled condition; `None` when no clauses are set.
    pub fn condition(&self) -> Option<&Condition> {
        self.compiled.as_ref()
    }

    /// Evaluate against the canonical message context
    /// `{type, payload, source, timestamp, metadata}`. An empty expression
    /// matches everything.
    pub fn matches(&self, message: &Message) -> bool {
        match &self.compiled {
            Some(condition) => condition.evaluate(&message.context()),
            None => true,
        }
    }

    fn recompile(&mut self) {
        let mut clauses = self.clauses.iter();
        let Some(base) = clauses.next() else {
            self.compiled = None;
            return;
        };
        let mut tree = base.condition.clone();
        for clause in clauses {
            tree = match clause.combiner {
                Combiner::Base | Combiner::And => {
                    Condition::and(vec![tree, clause.condition.clone()])
                }
                Combiner::Or => Condition::or(vec![tree, clause.condition.clone()]),
                Combiner::AndNot => {
                    Condition::and(vec![tree, Condition::negate(clause.condition.clone())])
                }
            };
        }
        self.compiled = Some(tree);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn message(kind: &str, source: &str, qos: i64) -> Message {
        let mut metadata = BTreeMap::new();
        metadata.insert("qos".to_string(), json!(qos));
        let mut message = Message::data(json!("x"), source, metadata);
        message.kind = kind.to_string();
        message
    }

    #[test]
    fn empty_expression_matches_everything() {
        let filter = FilterExpression::new();
        assert!(filter.matches(&message("data", "a", 0)));
    }

    #[test]
    fn where_replaces_existing_clauses() {
        let mut filter = FilterExpression::new();
        filter.set_where("type = 'data'").unwrap();
        filter.add_and("source = 'a'").unwrap();
        filter.set_where("type = 'system'").unwrap();
        assert_eq!(filter.clause_count(), 1);
        assert!(!filter.matches(&message("data", "a", 0)));
    }

    #[test]
    fn clauses_combine_left_to_right() {
        let mut filter = FilterExpression::new();
        filter.set_where("type = 'data'").unwrap();
        filter.add_and("metadata.qos = 1").unwrap();
        filter.add_or("source = 'trusted'").unwrap();
        // ((type AND qos) OR trusted)
        assert!(filter.matches(&message("data", "x", 1)));
        assert!(filter.matches(&message("system", "trusted", 0)));
        assert!(!filter.matches(&message("data", "x", 0)));
    }

    #[test]
    fn and_not_wraps_the_new_clause() {
        let mut filter = FilterExpression::new();
        filter.set_where("type = 'data'").unwrap();
        filter.add_and_not("source = 'noisy'").unwrap();
        assert!(filter.matches(&message("data", "quiet", 0)));
        assert!(!filter.matches(&message("data", "noisy", 0)));
    }

    #[test]
    fn combining_without_base_fails() {
        let mut filter = FilterExpression::new();
        assert!(matches!(
            filter.add_and("type = 'data'"),
            Err(FilterError::MissingBase)
        ));
    }

    #[test]
    fn remove_promotes_next_clause_to_base() {
        let mut filter = FilterExpression::new();
        filter.set_where("type = 'data'").unwrap();
        filter.add_or("type = 'system'").unwrap();
        assert!(filter.remove("type = 'data'"));
        assert_eq!(filter.clause_count(), 1);
        assert!(filter.matches(&message("system", "a", 0)));
        assert!(!filter.matches(&message("data", "a", 0)));
        assert!(!filter.remove("type = 'data'"));
    }

    #[test]
    fn clear_empties_the_filter() {
        let mut filter = FilterExpression::new();
        filter.set_where("type = 'data'").unwrap();
        filter.clear();
        assert!(filter.is_empty());
        assert!(filter.condition().is_none());
        assert!(filter.matches(&message("system", "a", 0)));
    }

    #[test]
    fn describe_joins_clauses() {
        let mut filter = FilterExpression::new();
        filter.set_where("type = 'data'").unwrap();
        filter.add_and_not("source = 'noisy'").unwrap();
        assert_eq!(filter.describe(), "type = 'data' AND NOT source = 'noisy'");
    }

    #[test]
    fn parse_errors_leave_the_filter_unchanged() {
        let mut filter = FilterExpression::new();
        filter.set_where("type = 'data'").unwrap();
        assert!(filter.set_where("type ==== nope").is_err());
        assert!(filter.matches(&message("data", "a", 0)));
    }
}
