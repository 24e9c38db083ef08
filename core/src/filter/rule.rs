//! `SELECT field-list FROM 'topic' WHERE <condition>` rule grammar, used to
//! build server-side subscription rules.

use serde_json::Value;

use crate::format::value_text;

use super::FilterError;
use super::condition::Condition;
use super::parse::parse_condition;

/// A compiled subscription rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Projected fields; `["*"]` selects everything.
    pub fields: Vec<String>,
    /// Topic the rule subscribes to; `*` or empty matches any topic.
    pub topic: String,
    pub condition: Option<Condition>,
}

impl Rule {
    /// True when a message context satisfies topic and condition. The topic
    /// is read from `metadata.topic`.
    pub fn matches(&self, context: &Value) -> bool {
        if !self.topic.is_empty() && self.topic != "*" {
            let topic = context
                .get("metadata")
                .and_then(|metadata| metadata.get("topic"))
                .map(value_text)
                .unwrap_or_default();
            if topic != self.topic {
                return false;
            }
        }
        self.condition
            .as_ref()
            .is_none_or(|condition| condition.evaluate(context))
    }

    /// Apply the field projection to an object payload. `*` (or a
    /// non-object payload) passes through untouched; otherwise only the
    /// selected keys survive.
    pub fn project(&self, payload: Value) -> Value {
        if self.fields.iter().any(|field| field == "*") {
            return payload;
        }
        let Value::Object(object) = payload else {
            return payload;
        };
        let projected = object
            .into_iter()
            .filter(|(key, _)| self.fields.iter().any(|field| field == key))
            .collect();
        Value::Object(projected)
    }
}

/// Parse a rule. The `WHERE` clause is optional; keywords are
/// case-insensitive; the topic may be quoted with single or double quotes.
pub fn parse_rule(input: &str) -> Result<Rule, FilterError> {
    let input = input.trim();
    let rest = strip_leading_keyword(input, "select")
        .ok_or_else(|| FilterError::parse("rule must start with SELECT"))?;

    let (fields_text, rest) = split_once_keyword(rest, "from")
        .ok_or_else(|| FilterError::parse("rule is missing FROM"))?;

    let fields: Vec<String> = fields_text
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect();
    if fields.is_empty() {
        return Err(FilterError::parse("rule selects no fields"));
    }

    let (topic_text, where_text) = match split_once_keyword(rest, "where") {
        Some((topic, condition)) => (topic, Some(condition)),
        None => (rest, None),
    };

    let topic_text = topic_text.trim();
    let topic = unquote(topic_text);
    if topic.is_empty() {
        return Err(FilterError::parse("rule is missing a topic after FROM"));
    }

    let condition = match where_text {
        Some(text) => Some(parse_condition(text)?),
        None => None,
    };

    Ok(Rule {
        fields,
        topic,
        condition,
    })
}

fn strip_leading_keyword<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let head = input.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &input[keyword.len()..];
    rest.starts_with(char::is_whitespace).then_some(rest)
}

/// Split at the first standalone, unquoted occurrence of `keyword`.
fn split_once_keyword<'a>(input: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let bytes = input.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if b == b'\'' || b == b'"' {
            quote = Some(b);
            i += 1;
            continue;
        }
        if input[i..]
            .get(..keyword.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
            && (i == 0 || bytes[i - 1].is_ascii_whitespace())
            && bytes
                .get(i + keyword.len())
                .is_none_or(u8::is_ascii_whitespace)
        {
            return Some((&input[..i], &input[i + keyword.len()..]));
        }
        i += 1;
    }
    None
}

fn unquote(text: &str) -> String {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        if (first == b'\'' || first == b'"') && bytes[bytes.len() - 1] == first {
            return text[1..text.len() - 1].to_string();
        }
    }
    text.to_string()
}
