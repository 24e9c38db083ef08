//! Recursive-descent parser for the WHERE-clause condition grammar.
//!
//! `OR` binds looser than `AND`: the input is split on top-level `OR`
//! occurrences first, then on `AND`, scanning left to right while skipping
//! parenthesised and quoted regions. Leaves are comparisons
//! (`field <op> value`) or patterns (`field LIKE 'p'`, `NOT LIKE`, `REGEX`).
//!
//! A small set of time macros is expanded before parsing so expressions like
//! `timestamp > now() - interval '5m'` work against ISO-8601 timestamps.

use chrono::Duration;
use chrono::Local;
use regex_lite::Regex;
use serde_json::Value;

use super::FilterError;
use super::condition::CompareOp;
use super::condition::Condition;
use super::condition::PatternOp;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse one condition expression into a tree.
pub fn parse_condition(input: &str) -> Result<Condition, FilterError> {
    let prepared = expand_time_macros(input);
    parse_expr(prepared.trim())
}

fn parse_expr(input: &str) -> Result<Condition, FilterError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(FilterError::Empty);
    }

    let or_parts = split_top_level(input, "or");
    if or_parts.len() > 1 {
        let children = or_parts
            .into_iter()
            .map(parse_expr)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Condition::or(children));
    }

    let and_parts = split_top_level(input, "and");
    if and_parts.len() > 1 {
        let children = and_parts
            .into_iter()
            .map(parse_expr)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Condition::and(children));
    }

    if let Some(rest) = strip_keyword_prefix(input, "not") {
        return Ok(Condition::negate(parse_expr(rest)?));
    }

    if let Some(inner) = strip_outer_parens(input) {
        return parse_expr(inner);
    }

    parse_leaf(input)
}

/// Split on top-level standalone occurrences of `keyword`, ignoring
/// parenthesised and quoted regions. Case-insensitive.
fn split_top_level<'a>(input: &'a str, keyword: &str) -> Vec<&'a str> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            None => match b {
                b'\'' | b'"' => {
                    quote = Some(b);
                    i += 1;
                    continue;
                }
                b'(' => {
                    depth += 1;
                    i += 1;
                    continue;
                }
                b')' => {
                    depth = depth.saturating_sub(1);
                    i += 1;
                    continue;
                }
                _ => {}
            },
        }

        if depth == 0
            && input[i..]
                .get(..keyword.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
            && boundary_before(bytes, i)
            && boundary_after(bytes, i + keyword.len())
        {
            parts.push(&input[start..i]);
            i += keyword.len();
            start = i;
        } else {
            i += 1;
        }
    }
    parts.push(&input[start..]);
    parts
}

fn boundary_before(bytes: &[u8], index: usize) -> bool {
    index == 0 || matches!(bytes[index - 1], b' ' | b'\t' | b'\n' | b'(' | b')')
}

fn boundary_after(bytes: &[u8], index: usize) -> bool {
    index >= bytes.len() || matches!(bytes[index], b' ' | b'\t' | b'\n' | b'(' | b')')
}

/// Strip a leading keyword (`not`) when it stands alone before the rest.
fn strip_keyword_prefix<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let head = input.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &input[keyword.len()..];
    if rest.starts_with([' ', '\t', '(']) {
        Some(rest)
    } else {
        None
    }
}

/// `(...)` spanning the whole input, with balanced nesting.
fn strip_outer_parens(input: &str) -> Option<&str> {
    let inner = input.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    for b in inner.bytes() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

fn parse_leaf(input: &str) -> Result<Condition, FilterError> {
    // Pattern operators first; `NOT LIKE` must win over bare `LIKE`.
    for (keyword, op) in [
        ("not like", PatternOp::NotLike),
        ("like", PatternOp::Like),
        ("regex", PatternOp::Regex),
    ] {
        let parts = split_top_level(input, keyword);
        if parts.len() == 2 {
            let field = parts[0].trim();
            if field.is_empty() {
                return Err(error_with_hint(input, "missing field before operator"));
            }
            let pattern = parts[1].trim();
            let Some(pattern) = strip_quotes(pattern) else {
                return Err(FilterError::parse(format!(
                    "pattern for '{}' must be quoted: {pattern}",
                    keyword.to_uppercase()
                )));
            };
            return Ok(Condition::Pattern {
                field: field.to_string(),
                op,
                pattern: pattern.to_string(),
            });
        }
        if parts.len() > 2 {
            return Err(error_with_hint(input, "too many pattern operators"));
        }
    }

    // Longest comparison symbols first so `>=` is not read as `>`.
    for symbol in [">=", "<=", "!=", "=", ">", "<"] {
        if let Some((field, value)) = split_on_symbol(input, symbol) {
            let field = field.trim();
            if field.is_empty() {
                return Err(error_with_hint(input, "missing field before operator"));
            }
            let op = match symbol {
                ">=" => CompareOp::Ge,
                "<=" => CompareOp::Le,
                "!=" => CompareOp::Ne,
                "=" => CompareOp::Eq,
                ">" => CompareOp::Gt,
                _ => CompareOp::Lt,
            };
            return Ok(Condition::Comparison {
                field: field.to_string(),
                op,
                value: parse_value(value.trim())?,
            });
        }
    }

    Err(error_with_hint(
        input,
        format!("expected a comparison or pattern: {input}"),
    ))
}

/// First top-level occurrence of a comparison symbol outside quotes.
fn split_on_symbol<'a>(input: &'a str, symbol: &str) -> Option<(&'a str, &'a str)> {
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
        if input[i..].starts_with(symbol) {
            // A bare `=` must not split `!=`, `>=` or `<=`.
            if symbol == "=" && i > 0 && matches!(bytes[i - 1], b'!' | b'>' | b'<') {
                i += 1;
                continue;
            }
            return Some((&input[..i], &input[i + symbol.len()..]));
        }
        i += 1;
    }
    None
}

fn strip_quotes(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        if (first == b'\'' || first == b'"') && bytes[bytes.len() - 1] == first {
            return Some(&text[1..text.len() - 1]);
        }
    }
    None
}

/// Value typing: quoted strings stay strings, bare numerics become integers
/// (no dot) or floats (dot), `true`/`false` become booleans, anything else
/// is taken as a bare string.
fn parse_value(text: &str) -> Result<Value, FilterError> {
    if text.is_empty() {
        return Err(FilterError::parse("missing value after operator"));
    }
    if let Some(quoted) = strip_quotes(text) {
        return Ok(Value::String(quoted.to_string()));
    }
    if text.chars().any(char::is_whitespace) || text.contains('\'') || text.contains('"') {
        return Err(error_with_hint(text, format!("invalid value: {text}")));
    }
    if text.eq_ignore_ascii_case("true") {
        return Ok(Value::Bool(true));
    }
    if text.eq_ignore_ascii_case("false") {
        return Ok(Value::Bool(false));
    }
    if !text.contains('.') {
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::from(n));
        }
    } else if let Ok(f) = text.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(f) {
            return Ok(Value::Number(number));
        }
    }
    Ok(Value::String(text.to_string()))
}

const KEYWORDS: &[&str] = &["and", "or", "not", "like", "regex", "between", "where"];

fn error_with_hint(input: &str, message: impl Into<String>) -> FilterError {
    FilterError::Parse {
        message: message.into(),
        hint: typo_hint(input),
    }
}

/// Suggest a keyword when a token of the failed expression is one edit away
/// from one. `"type = 'a' adn qos = 1"` hints at `and`.
fn typo_hint(input: &str) -> Option<String> {
    for token in input.split_whitespace() {
        let token = token.to_ascii_lowercase();
        if KEYWORDS.contains(&token.as_str()) {
            continue;
        }
        for keyword in KEYWORDS {
            if edit_distance_at_most_one(&token, keyword) {
                return Some((*keyword).to_string());
            }
        }
    }
    None
}

fn edit_distance_at_most_one(a: &str, b: &str) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > 1 {
        return false;
    }
    if a.len() == b.len() {
        // Substitution or a single adjacent transposition.
        let diffs: Vec<usize> = (0..a.len()).filter(|&i| a[i] != b[i]).collect();
        return match diffs.len() {
            0 | 1 => diffs.len() == 1,
            2 => {
                let (i, j) = (diffs[0], diffs[1]);
                j == i + 1 && a[i] == b[j] && a[j] == b[i]
            }
            _ => false,
        };
    }
    let (short, long) = if a.len() < b.len() { (&a, &b) } else { (&b, &a) };
    let mut skipped = false;
    let mut s = 0usize;
    for l in 0..long.len() {
        if s < short.len() && short[s] == long[l] {
            s += 1;
        } else if skipped {
            return false;
        } else {
            skipped = true;
        }
    }
    true
}

/// Expand `now()`, `now() - interval 'Nu'`, `timestamp <op> 'HH:MM[:SS]'`
/// and `timestamp between 'A' and 'B'` into plain comparisons against
/// ISO-8601 text.
fn expand_time_macros(input: &str) -> String {
    let now = Local::now();
    let today = now.format("%Y-%m-%d").to_string();

    let mut text = input.to_string();

    if let Ok(re) =
        Regex::new(r"(?i)\btimestamp\s+between\s+'([^']+)'\s+and\s+'([^']+)'")
    {
        text = re
            .replace_all(&text, |caps: &regex_lite::Captures<'_>| {
                let low = normalize_time_endpoint(&caps[1], &today);
                let high = normalize_time_endpoint(&caps[2], &today);
                format!("(timestamp >= '{low}' and timestamp <= '{high}')")
            })
            .into_owned();
    }

    if let Ok(re) = Regex::new(r"(?i)now\(\)\s*-\s*interval\s*'(\d+)\s*([smh])'") {
        text = re
            .replace_all(&text, |caps: &regex_lite::Captures<'_>| {
                let amount: i64 = caps[1].parse().unwrap_or(0);
                let delta = match &caps[2].to_ascii_lowercase()[..] {
                    "s" => Duration::seconds(amount),
                    "m" => Duration::minutes(amount),
                    _ => Duration::hours(amount),
                };
                format!("'{}'", (now - delta).format(TIMESTAMP_FORMAT))
            })
            .into_owned();
    }

    if let Ok(re) = Regex::new(r"(?i)now\(\)") {
        text = re
            .replace_all(&text, format!("'{}'", now.format(TIMESTAMP_FORMAT)))
            .into_owned();
    }

    if let Ok(re) =
        Regex::new(r"(?i)\btimestamp\s*(>=|<=|!=|=|>|<)\s*'(\d{1,2}:\d{2}(?::\d{2})?)'")
    {
        text = re
            .replace_all(&text, |caps: &regex_lite::Captures<'_>| {
                let endpoint = normalize_time_endpoint(&caps[2], &today);
                format!("timestamp {} '{endpoint}'", &caps[1])
            })
            .into_owned();
    }

    text
}

/// `HH:MM` and `HH:MM:SS` endpoints get today's date in front; anything else
/// passes through untouched.
fn normalize_time_endpoint(endpoint: &str, today: &str) -> String {
    let looks_like_time = endpoint.len() <= 8
        && endpoint
            .chars()
            .all(|c| c.is_ascii_digit() || c == ':')
        && endpoint.contains(':');
    if !looks_like_time {
        return endpoint.to_string();
    }
    let with_seconds = if endpoint.matches(':').count() == 1 {
        format!("{endpoint}:00")
    } else {
        endpoint.to_string()
    };
    format!("{today}T{with_seconds}")
}
